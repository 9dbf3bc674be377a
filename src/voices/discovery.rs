//! Probes that enumerate installed voices.
//!
//! Each backend is probed independently and a missing engine just contributes
//! nothing. Probe commands run with a timeout, so a hung engine cannot stall a
//! sweep. The parsers are plain functions over captured output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use super::language::{fold_diacritics, guess_gender, humanize, lang_name, title_case};
use super::{Gender, Quality, VoiceCatalog, VoiceInfo};
use crate::engines::piper::{find_piper_binary, model_config_path, VOICE_PREFIX as PIPER_PREFIX};
use crate::engines::process::run_probe;
use crate::engines::{espeak, BackendKind};
use crate::EngineConfig;

const RHVOICE_MODULE: &str = "rhvoice";
const RHVOICE_PACKAGE_PREFIX: &str = "rhvoice-voice-";
const RHVOICE_DESCRIPTION: &str = "RHVoice high quality local synthesis";

/// Voice directory name → (language, gender, display name).
const KNOWN_RHVOICE: &[(&str, &str, Gender, &str)] = &[
    ("Leticia-F123", "pt-BR", Gender::Female, "Letícia F123"),
    ("leticia-f123", "pt-BR", Gender::Female, "Letícia F123"),
    ("Evgeniy-Eng", "en", Gender::Male, "Evgeniy"),
    ("evgeniy-eng", "en", Gender::Male, "Evgeniy"),
    ("Natalia", "ru", Gender::Female, "Natalia"),
    ("Alan", "en", Gender::Male, "Alan"),
    ("Anna", "ru", Gender::Female, "Anna"),
    ("Elena", "ru", Gender::Female, "Elena"),
    ("Aleksandr", "ru", Gender::Male, "Aleksandr"),
    ("Artemiy", "ru", Gender::Male, "Artemiy"),
    ("Irina", "ru", Gender::Female, "Irina"),
    ("Lyubov", "ru", Gender::Female, "Lyubov"),
    ("Hana", "cs", Gender::Female, "Hana"),
    ("Volodymyr", "uk", Gender::Male, "Volodymyr"),
    ("Anatol", "uk", Gender::Male, "Anatol"),
    ("Natia", "ka", Gender::Female, "Natia"),
    ("Spomenka", "hr", Gender::Female, "Spomenka"),
    ("Kiko", "mk", Gender::Male, "Kiko"),
    ("Natan", "pl", Gender::Male, "Natan"),
    ("Magda", "pl", Gender::Female, "Magda"),
    ("Suze", "nl", Gender::Female, "Suze"),
    ("Azamat", "tt", Gender::Male, "Azamat"),
    ("Talgat", "ky", Gender::Male, "Talgat"),
    ("Zdenek", "cs", Gender::Male, "Zdeněk"),
];

/// Package suffix (after `rhvoice-voice-`) → (language, gender, display name).
const KNOWN_RHVOICE_PACKAGES: &[(&str, &str, Gender, &str)] = &[
    ("leticia-f123", "pt-BR", Gender::Female, "Letícia F123"),
    ("evgeniy-eng", "en", Gender::Male, "Evgeniy"),
    ("alan", "en", Gender::Male, "Alan"),
    ("natalia", "ru", Gender::Female, "Natalia"),
    ("anna", "ru", Gender::Female, "Anna"),
    ("elena", "ru", Gender::Female, "Elena"),
];

/// Probe every backend and build a fresh catalog.
///
/// Never fails: a backend whose probe errors or times out is treated as not
/// installed.
pub fn discover_voices(config: &EngineConfig) -> VoiceCatalog {
    let mut voices = speechd_voices(config);
    voices.extend(espeak_voices(config));
    voices.extend(piper_voices(config));

    let catalog = VoiceCatalog::new(voices);
    log::info!(
        "Discovered {} voices from {} backends",
        catalog.len(),
        catalog.backends().len()
    );
    catalog
}

/// Run a probe and return its stdout if it exited successfully.
fn probe(config: &EngineConfig, program: &Path, args: &[&str]) -> Option<String> {
    let resolved = match which::which(program) {
        Ok(path) => path,
        Err(_) => {
            log::debug!("{} not installed", program.display());
            return None;
        }
    };
    match run_probe(&resolved, args, config.probe_timeout()) {
        Ok(out) if out.success() => Some(out.stdout),
        Ok(out) => {
            log::debug!("{} {:?} exited with {}", program.display(), args, out.status);
            None
        }
        Err(e) => {
            log::debug!("{} {:?} failed: {e}", program.display(), args);
            None
        }
    }
}

fn speechd_voices(config: &EngineConfig) -> Vec<VoiceInfo> {
    let mut voices = rhvoice_voices(config);
    if let Some(listing) = probe(config, &config.binaries.spd_say, &["-L"]) {
        let known: HashSet<String> = voices.iter().map(|v| fold_diacritics(&v.voice_id)).collect();
        voices.extend(parse_spd_voice_list(&listing, &known));
    }
    voices
}

fn rhvoice_available(config: &EngineConfig) -> bool {
    probe(config, &config.binaries.spd_say, &["-o", RHVOICE_MODULE, "-L"]).is_some()
        || which::which(&config.binaries.rhvoice_test).is_ok()
}

fn rhvoice_voices(config: &EngineConfig) -> Vec<VoiceInfo> {
    if !rhvoice_available(config) {
        log::debug!("RHVoice not available");
        return Vec::new();
    }
    let voices = scan_rhvoice_dirs(&config.rhvoice_voice_dirs);
    if !voices.is_empty() {
        return voices;
    }
    probe(config, &config.binaries.pacman, &["-Qq"])
        .map(|out| parse_rhvoice_packages(&out))
        .unwrap_or_default()
}

fn rhvoice_info(voice_id: String, language: &str, gender: Gender, name: String) -> VoiceInfo {
    VoiceInfo {
        voice_id,
        name,
        language: language.to_string(),
        language_name: lang_name(language),
        backend: BackendKind::SpeechDispatcher,
        output_module: RHVOICE_MODULE.to_string(),
        gender,
        quality: Quality::High,
        description: RHVOICE_DESCRIPTION.to_string(),
    }
}

/// Catalog entry for an installed RHVoice voice directory.
pub fn rhvoice_voice(dirname: &str) -> VoiceInfo {
    match KNOWN_RHVOICE.iter().find(|(dir, ..)| *dir == dirname) {
        Some(&(_, language, gender, display)) => {
            rhvoice_info(dirname.to_string(), language, gender, display.to_string())
        }
        None => rhvoice_info(
            dirname.to_string(),
            "en",
            guess_gender(dirname),
            title_case(&humanize(dirname)),
        ),
    }
}

/// Every subdirectory of the RHVoice voice roots is a voice. A name found in
/// an earlier root shadows later ones.
pub fn scan_rhvoice_dirs(roots: &[PathBuf]) -> Vec<VoiceInfo> {
    let mut seen = HashSet::new();
    let mut voices = Vec::new();
    for root in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        for name in names {
            if seen.insert(name.clone()) {
                voices.push(rhvoice_voice(&name));
            }
        }
    }
    voices
}

/// Parse `pacman -Qq` output for `rhvoice-voice-*` packages.
pub fn parse_rhvoice_packages(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .filter_map(|line| line.trim().strip_prefix(RHVOICE_PACKAGE_PREFIX))
        .filter(|name| !name.is_empty())
        .map(|name| {
            let voice_id = title_case(name);
            match KNOWN_RHVOICE_PACKAGES.iter().find(|(pkg, ..)| *pkg == name) {
                Some(&(_, language, gender, display)) => {
                    rhvoice_info(voice_id, language, gender, display.to_string())
                }
                None => rhvoice_info(
                    voice_id,
                    "en",
                    guess_gender(name),
                    title_case(&name.replace('-', " ")),
                ),
            }
        })
        .collect()
}

static COLUMN_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("column pattern is valid"));

/// Parse `spd-say -L` rows (`NAME  LANGUAGE  VARIANT`, columns separated by
/// two or more spaces). Rows whose name folds to an entry of `known` are
/// skipped.
pub fn parse_spd_voice_list(listing: &str, known: &HashSet<String>) -> Vec<VoiceInfo> {
    let mut voices = Vec::new();
    for line in listing.lines().map(str::trim) {
        if line.is_empty() || line.contains("NAME") || line.contains("dummy") {
            continue;
        }
        let parts: Vec<&str> = COLUMN_GAP.split(line).collect();
        if parts.len() < 2 {
            continue;
        }
        let (name, language) = (parts[0].trim(), parts[1].trim());
        if known.contains(&fold_diacritics(name)) {
            continue;
        }
        voices.push(VoiceInfo {
            voice_id: name.to_string(),
            name: humanize(name),
            language: language.to_string(),
            language_name: lang_name(language),
            backend: BackendKind::SpeechDispatcher,
            output_module: "espeak-ng".to_string(),
            gender: guess_gender(name),
            quality: Quality::Standard,
            description: String::new(),
        });
    }
    voices
}

fn espeak_voices(config: &EngineConfig) -> Vec<VoiceInfo> {
    probe(config, &config.binaries.espeak, &["--voices"])
        .map(|out| parse_espeak_voices(&out))
        .unwrap_or_default()
}

/// Parse `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File          Other Languages
///  5  pt-BR           --/M      Portuguese_(Brazil) roa/pt-BR    (pt 5)
/// ```
pub fn parse_espeak_voices(listing: &str) -> Vec<VoiceInfo> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            let (language, age_gender, voice_name) = (parts[1], parts[2], parts[3]);
            let gender = if age_gender.contains("/M") {
                Gender::Male
            } else if age_gender.contains("/F") {
                Gender::Female
            } else {
                Gender::Unknown
            };
            Some(VoiceInfo {
                voice_id: format!("{}{language}", espeak::VOICE_PREFIX),
                name: title_case(&humanize(voice_name)),
                language: language.to_string(),
                language_name: lang_name(language),
                backend: BackendKind::EspeakNg,
                output_module: String::new(),
                gender,
                quality: Quality::Standard,
                description: String::new(),
            })
        })
        .collect()
}

fn piper_voices(config: &EngineConfig) -> Vec<VoiceInfo> {
    if find_piper_binary(&config.binaries.piper_candidates).is_none() {
        log::debug!("Piper binary not found");
        return Vec::new();
    }
    let voices = scan_piper_dirs(&config.piper_voice_dirs);
    log::info!("Piper: found {} voice models", voices.len());
    voices
}

/// Walk the Piper voice roots for `*.onnx` models that have a config beside them.
pub fn scan_piper_dirs(roots: &[PathBuf]) -> Vec<VoiceInfo> {
    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
        })
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "onnx")
        })
        .filter_map(|entry| piper_voice(entry.path()))
        .collect()
}

fn quality_label(quality: &str) -> String {
    match quality {
        "x_low" => "Extra Low".to_string(),
        "low" => "Low".to_string(),
        "medium" => "Medium".to_string(),
        "high" => "High".to_string(),
        other => title_case(other),
    }
}

/// Catalog entry for a model named `<lang_REGION>-<speaker>[-<quality>].onnx`.
/// Returns `None` when the name does not follow that pattern or the config
/// file is missing.
pub fn piper_voice(model: &Path) -> Option<VoiceInfo> {
    if !model_config_path(model).is_file() {
        return None;
    }
    let stem = model.file_stem()?.to_str()?;
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() < 2 {
        return None;
    }

    let language = parts[0].replace('_', "-");
    let short = language.split('-').next().unwrap_or_default();
    let speaker = parts[1];
    let label = quality_label(parts.get(2).copied().unwrap_or("medium"));

    Some(VoiceInfo {
        voice_id: format!("{PIPER_PREFIX}{}", model.display()),
        name: format!("{} ({label})", title_case(speaker)),
        language_name: lang_name(short),
        backend: BackendKind::Piper,
        output_module: String::new(),
        gender: guess_gender(speaker),
        quality: Quality::Neural,
        description: format!("Piper neural voice, {language} {label}"),
        language,
    })
}
