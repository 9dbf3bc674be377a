//! Voice catalog: every installed voice across backends.
//!
//! A [`VoiceCatalog`] is built wholesale by [`discover_voices`] and never
//! mutated afterwards; the controller shares it as an `Arc` snapshot and a new
//! sweep replaces it.

pub mod discovery;
pub mod language;

use std::cmp::Reverse;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engines::BackendKind;

pub use discovery::discover_voices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    #[default]
    Unknown,
}

/// Quality tier. Ordered so that the best tier compares greatest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    High,
    Neural,
}

/// Metadata for one installed voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Unique across the catalog. Encodes the backend: `espeak-<lang>` for
    /// espeak-ng, `piper:<model path>` for Piper, a bare voice name for
    /// speech-dispatcher.
    pub voice_id: String,
    pub name: String,
    pub language: String,
    pub language_name: String,
    pub backend: BackendKind,
    /// speech-dispatcher output module; empty for the other backends.
    #[serde(default)]
    pub output_module: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub description: String,
}

/// Immutable, ordered set of voices plus the backends that contributed any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoiceCatalog {
    voices: Vec<VoiceInfo>,
    backends: Vec<BackendKind>,
}

impl VoiceCatalog {
    /// Build a catalog. Later entries whose `voice_id` was already seen are
    /// dropped.
    pub fn new(voices: impl IntoIterator<Item = VoiceInfo>) -> Self {
        let mut seen = HashSet::new();
        let voices: Vec<VoiceInfo> = voices
            .into_iter()
            .filter(|v| {
                let fresh = seen.insert(v.voice_id.clone());
                if !fresh {
                    log::debug!("Dropping duplicate voice id {}", v.voice_id);
                }
                fresh
            })
            .collect();
        let backends = BackendKind::ALL
            .into_iter()
            .filter(|kind| voices.iter().any(|v| v.backend == *kind))
            .collect();
        Self { voices, backends }
    }

    pub fn voices(&self) -> &[VoiceInfo] {
        &self.voices
    }

    /// Backends with at least one voice, in backend order.
    pub fn backends(&self) -> &[BackendKind] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Voices whose language starts with `prefix` (`pt` matches `pt-BR`).
    pub fn by_language<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a VoiceInfo> + 'a {
        self.voices
            .iter()
            .filter(move |v| v.language.starts_with(prefix))
    }

    pub fn by_backend(&self, backend: BackendKind) -> impl Iterator<Item = &VoiceInfo> + '_ {
        self.voices.iter().filter(move |v| v.backend == backend)
    }

    pub fn find(&self, voice_id: &str) -> Option<&VoiceInfo> {
        self.voices.iter().find(|v| v.voice_id == voice_id)
    }

    /// Best voice for `language`: neural over high over standard, earlier
    /// entries winning ties. Falls back to English, then to `None`.
    pub fn default_voice_for(&self, language: &str) -> Option<&VoiceInfo> {
        let in_language =
            |prefix: &str| best(self.voices.iter().filter(|v| v.language.starts_with(prefix)));
        in_language(language).or_else(|| in_language("en"))
    }

    /// Best voice a backend offers, regardless of language.
    pub fn best_for_backend(&self, backend: BackendKind) -> Option<&VoiceInfo> {
        best(self.by_backend(backend))
    }

    /// `(two-letter code, display name)` for every language present, sorted
    /// by display name.
    pub fn languages(&self) -> Vec<(String, String)> {
        let mut seen = HashSet::new();
        let mut languages: Vec<(String, String)> = self
            .voices
            .iter()
            .filter_map(|v| {
                let code: String = v.language.chars().take(2).collect();
                seen.insert(code.clone())
                    .then(|| (code, v.language_name.clone()))
            })
            .collect();
        languages.sort_by(|a, b| a.1.cmp(&b.1));
        languages
    }
}

fn best<'a>(voices: impl Iterator<Item = &'a VoiceInfo>) -> Option<&'a VoiceInfo> {
    // `min_by_key` keeps the first of equal keys.
    voices.min_by_key(|v| Reverse(v.quality))
}

#[cfg(test)]
pub(crate) fn voice(voice_id: &str, language: &str, backend: BackendKind, quality: Quality) -> VoiceInfo {
    VoiceInfo {
        voice_id: voice_id.to_string(),
        name: voice_id.to_string(),
        language: language.to_string(),
        language_name: language::lang_name(language),
        backend,
        output_module: String::new(),
        gender: Gender::Unknown,
        quality,
        description: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VoiceCatalog {
        VoiceCatalog::new([
            voice("Leticia-F123", "pt-BR", BackendKind::SpeechDispatcher, Quality::High),
            voice("espeak-pt-br", "pt-br", BackendKind::EspeakNg, Quality::Standard),
            voice("piper:/v/pt_BR-faber-medium.onnx", "pt-BR", BackendKind::Piper, Quality::Neural),
            voice("espeak-en", "en", BackendKind::EspeakNg, Quality::Standard),
            voice("Alan", "en", BackendKind::SpeechDispatcher, Quality::High),
        ])
    }

    #[test]
    fn filters_by_language_prefix_and_backend() {
        let catalog = sample();
        assert_eq!(catalog.by_language("pt").count(), 3);
        assert_eq!(catalog.by_backend(BackendKind::EspeakNg).count(), 2);
        assert_eq!(catalog.find("Alan").map(|v| v.language.as_str()), Some("en"));
        assert!(catalog.find("alan").is_none());
    }

    #[test]
    fn default_voice_prefers_neural_then_high() {
        let catalog = sample();
        assert_eq!(
            catalog.default_voice_for("pt").unwrap().voice_id,
            "piper:/v/pt_BR-faber-medium.onnx"
        );
        assert_eq!(catalog.default_voice_for("en").unwrap().voice_id, "Alan");
    }

    #[test]
    fn default_voice_falls_back_to_english() {
        let catalog = VoiceCatalog::new([
            voice("espeak-en", "en", BackendKind::EspeakNg, Quality::Standard),
            voice("espeak-en-us", "en-US", BackendKind::EspeakNg, Quality::Standard),
        ]);
        assert_eq!(catalog.default_voice_for("fr").unwrap().voice_id, "espeak-en");
        assert!(VoiceCatalog::default().default_voice_for("fr").is_none());
    }

    #[test]
    fn duplicate_ids_keep_the_first_entry() {
        let catalog = VoiceCatalog::new([
            voice("Alan", "en", BackendKind::SpeechDispatcher, Quality::High),
            voice("Alan", "en", BackendKind::SpeechDispatcher, Quality::Standard),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.voices()[0].quality, Quality::High);
    }

    #[test]
    fn backend_set_follows_backend_order() {
        let catalog = VoiceCatalog::new([
            voice("piper:/m.onnx", "en", BackendKind::Piper, Quality::Neural),
            voice("espeak-en", "en", BackendKind::EspeakNg, Quality::Standard),
        ]);
        assert_eq!(catalog.backends(), [BackendKind::EspeakNg, BackendKind::Piper]);
        assert!(VoiceCatalog::default().backends().is_empty());
    }

    #[test]
    fn languages_are_unique_and_sorted_by_name() {
        let languages = sample().languages();
        assert_eq!(
            languages,
            [
                ("en".to_string(), "English".to_string()),
                ("pt".to_string(), "Portuguese".to_string()),
            ]
        );
    }

    #[test]
    fn voice_info_serializes_with_engine_tags() {
        let json = serde_json::to_value(voice("Alan", "en", BackendKind::SpeechDispatcher, Quality::High))
            .unwrap();
        assert_eq!(json["backend"], "speech-dispatcher");
        assert_eq!(json["quality"], "high");
        assert_eq!(json["gender"], "unknown");
    }
}
