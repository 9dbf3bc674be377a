//! espeak-ng command-line backend.
//!
//! One utterance is one `espeak-ng` process. The text is passed as the last
//! positional argument; stdin is not used.

use std::path::PathBuf;
use std::process::Stdio;

use super::process::{resolve_program, spawn_stage, ProcessChain};
use super::{BackendKind, CompletionNotifier, PlaybackHandle, SpeechAdapter, Utterance};
use crate::{EngineConfig, SpeechError};

/// Prefix that namespaces espeak-ng voice ids in the catalog.
pub const VOICE_PREFIX: &str = "espeak-";

pub struct EspeakAdapter {
    program: PathBuf,
}

impl EspeakAdapter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.binaries.espeak.clone(),
        }
    }
}

/// Build the espeak-ng argument list: `[-v VOICE] -s WPM -p PITCH -a AMP TEXT`.
pub fn espeak_args(utterance: &Utterance) -> Vec<String> {
    let mapped = utterance.params.to_espeak();
    let voice = utterance
        .voice_id
        .strip_prefix(VOICE_PREFIX)
        .unwrap_or(utterance.voice_id.as_str());

    let mut args = Vec::with_capacity(9);
    if !voice.is_empty() {
        args.push("-v".to_string());
        args.push(voice.to_string());
    }
    args.push("-s".to_string());
    args.push(mapped.words_per_minute.to_string());
    args.push("-p".to_string());
    args.push(mapped.pitch.to_string());
    args.push("-a".to_string());
    args.push(mapped.amplitude.to_string());
    args.push(utterance.text.clone());
    args
}

impl SpeechAdapter for EspeakAdapter {
    fn start(
        &mut self,
        utterance: &Utterance,
        _notifier: CompletionNotifier,
    ) -> Result<PlaybackHandle, SpeechError> {
        let program = resolve_program(BackendKind::EspeakNg, &self.program)?;
        let child = spawn_stage(
            BackendKind::EspeakNg,
            &program,
            &espeak_args(utterance),
            Stdio::null(),
            Stdio::null(),
        )?;
        log::debug!("espeak-ng started (pid {})", child.id());

        let mut chain = ProcessChain::new(BackendKind::EspeakNg);
        chain.push("espeak-ng", child);
        Ok(PlaybackHandle::Process(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SpeechParams;

    fn utterance(voice_id: &str, rate: i32, pitch: i32, volume: i32) -> Utterance {
        Utterance {
            text: "Hello world".to_string(),
            voice_id: voice_id.to_string(),
            output_module: String::new(),
            params: SpeechParams::new(rate, pitch, volume),
        }
    }

    #[test]
    fn maps_flags_and_passes_text_last() {
        let args = espeak_args(&utterance("espeak-pt-br", 0, 0, 75));
        assert_eq!(
            args,
            ["-v", "pt-br", "-s", "175", "-p", "50", "-a", "150", "Hello world"]
        );
    }

    #[test]
    fn omits_voice_when_unset() {
        let args = espeak_args(&utterance("", 100, -100, 100));
        assert_eq!(args, ["-s", "325", "-p", "0", "-a", "200", "Hello world"]);
    }

    #[test]
    fn accepts_unprefixed_voice_ids() {
        let args = espeak_args(&utterance("en-us", 0, 0, 50));
        assert_eq!(&args[..2], ["-v", "en-us"]);
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let mut config = EngineConfig::default();
        config.binaries.espeak = PathBuf::from("/nonexistent/espeak-ng");
        let mut adapter = EspeakAdapter::new(&config);
        let err = adapter
            .start(&utterance("", 0, 0, 50), CompletionNotifier::new(|_, _| {}))
            .unwrap_err();
        assert!(matches!(
            err,
            SpeechError::BackendUnavailable {
                backend: BackendKind::EspeakNg,
                ..
            }
        ));
    }
}
