//! Language names and the name-based heuristics used while building the catalog.

use super::Gender;

/// ISO 639 code → English display name, sorted by code.
pub const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("af", "Afrikaans"),
    ("am", "Amharic"),
    ("an", "Aragonese"),
    ("ar", "Arabic"),
    ("bg", "Bulgarian"),
    ("bn", "Bengali"),
    ("bs", "Bosnian"),
    ("ca", "Catalan"),
    ("cmn", "Chinese (Mandarin)"),
    ("cs", "Czech"),
    ("cy", "Welsh"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("eo", "Esperanto"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("eu", "Basque"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("ga", "Irish"),
    ("gd", "Scottish Gaelic"),
    ("gl", "Galician"),
    ("gu", "Gujarati"),
    ("hak", "Hakka Chinese"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hr", "Croatian"),
    ("hu", "Hungarian"),
    ("hy", "Armenian"),
    ("id", "Indonesian"),
    ("is", "Icelandic"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("jbo", "Lojban"),
    ("ka", "Georgian"),
    ("kk", "Kazakh"),
    ("kl", "Greenlandic"),
    ("kn", "Kannada"),
    ("ko", "Korean"),
    ("ku", "Kurdish"),
    ("ky", "Kyrgyz"),
    ("la", "Latin"),
    ("lfn", "Lingua Franca Nova"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("mi", "Maori"),
    ("mk", "Macedonian"),
    ("ml", "Malayalam"),
    ("mr", "Marathi"),
    ("ms", "Malay"),
    ("mt", "Maltese"),
    ("my", "Burmese"),
    ("nb", "Norwegian Bokmål"),
    ("ne", "Nepali"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("om", "Oromo"),
    ("or", "Oriya"),
    ("pa", "Punjabi"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sd", "Sindhi"),
    ("si", "Sinhala"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sq", "Albanian"),
    ("sr", "Serbian"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("ta", "Tamil"),
    ("te", "Telugu"),
    ("th", "Thai"),
    ("tk", "Turkmen"),
    ("tn", "Setswana"),
    ("tr", "Turkish"),
    ("tt", "Tatar"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("uz", "Uzbek"),
    ("vi", "Vietnamese"),
    ("yue", "Cantonese"),
    ("zh", "Chinese"),
];

const FEMALE_NAMES: &[&str] = &[
    "letícia", "leticia", "natalia", "anna", "elena", "irina", "lyubov", "marianna", "hana",
    "suze", "magda", "clb", "slt", "spomenka", "natia",
];

const MALE_NAMES: &[&str] = &[
    "antonio", "evgeniy", "alan", "bdl", "aleksandr", "artemiy", "anatol", "volodymyr", "zdenek",
    "natan", "kiko", "azamat", "talgat",
];

fn lookup(code: &str) -> Option<&'static str> {
    LANGUAGE_NAMES
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|i| LANGUAGE_NAMES[i].1)
}

/// Human-readable name for a language code such as `pt-BR` or `cmn`.
///
/// Tries the two-letter prefix first, then the full code; unknown codes are
/// returned unchanged.
pub fn lang_name(code: &str) -> String {
    let short: String = code.chars().take(2).collect::<String>().to_lowercase();
    lookup(&short)
        .or_else(|| lookup(code))
        .map(str::to_string)
        .unwrap_or_else(|| code.to_string())
}

/// Best-effort gender from a voice or speaker name.
pub fn guess_gender(name: &str) -> Gender {
    let name = name.to_lowercase();
    if FEMALE_NAMES.iter().any(|n| name.contains(n)) {
        Gender::Female
    } else if MALE_NAMES.iter().any(|n| name.contains(n)) {
        Gender::Male
    } else {
        Gender::Unknown
    }
}

/// Upper-case the first letter of every alphabetic run, lower-case the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Turn `-` and `_` into spaces.
pub fn humanize(s: &str) -> String {
    s.replace(['-', '_'], " ")
}

/// Lower-case and strip the accents used by the voice names we ship tables for.
///
/// Used only for duplicate detection between discovery sources.
pub fn fold_diacritics(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
            'ç' | 'ć' | 'č' => 'c',
            'ď' => 'd',
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
            'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => 'i',
            'ł' => 'l',
            'ñ' | 'ń' | 'ň' => 'n',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => 'o',
            'ř' => 'r',
            'ś' | 'š' | 'ș' | 'ş' => 's',
            'ť' | 'ț' | 'ţ' => 't',
            'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
            'ý' | 'ÿ' => 'y',
            'ź' | 'ż' | 'ž' => 'z',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_for_binary_search() {
        assert!(LANGUAGE_NAMES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn names_resolve_by_prefix_then_full_code() {
        assert_eq!(lang_name("pt-BR"), "Portuguese");
        assert_eq!(lang_name("EN"), "English");
        assert_eq!(lang_name("cmn"), "Chinese (Mandarin)");
        assert_eq!(lang_name("yue"), "Cantonese");
        assert_eq!(lang_name("xx-YY"), "xx-YY");
        assert_eq!(lang_name(""), "");
    }

    #[test]
    fn gender_heuristic_prefers_female_list() {
        assert_eq!(guess_gender("Leticia-F123"), Gender::Female);
        assert_eq!(guess_gender("evgeniy-eng"), Gender::Male);
        assert_eq!(guess_gender("cmu_us_slt"), Gender::Female);
        assert_eq!(guess_gender("amy"), Gender::Unknown);
    }

    #[test]
    fn title_case_matches_word_runs() {
        assert_eq!(title_case("leticia f123"), "Leticia F123");
        assert_eq!(title_case("en-US"), "En-Us");
        assert_eq!(title_case("o'neil"), "O'Neil");
    }

    #[test]
    fn folding_ignores_case_and_accents() {
        assert_eq!(fold_diacritics("Letícia-F123"), "leticia-f123");
        assert_eq!(fold_diacritics("Zdeněk"), "zdenek");
        assert_eq!(fold_diacritics("Leticia-F123"), fold_diacritics("leticia-f123"));
    }
}
