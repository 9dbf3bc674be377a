//! Piper neural backend.
//!
//! An utterance is a chain of processes:
//!
//! ```text
//! piper --output-raw ──► [sox vol N] ──► aplay
//! ```
//!
//! The text is written to piper's stdin, which is closed right after so piper
//! sees end-of-input. The volume filter only runs when the gain differs from
//! 1.0 and `sox` is installed. Cancelling the handle stops every stage.

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread;

use super::process::{resolve_program, spawn_stage, ProcessChain};
use super::{BackendKind, CompletionNotifier, PlaybackHandle, SpeechAdapter, Utterance};
use crate::params::PiperParams;
use crate::{EngineConfig, SpeechError};

/// Prefix that namespaces Piper voice ids (`piper:/abs/path/model.onnx`).
pub const VOICE_PREFIX: &str = "piper:";

/// Sample rate assumed when a model has no readable config.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

pub struct PiperAdapter {
    candidates: Vec<PathBuf>,
    sox: PathBuf,
    aplay: PathBuf,
}

impl PiperAdapter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            candidates: config.binaries.piper_candidates.clone(),
            sox: config.binaries.sox.clone(),
            aplay: config.binaries.aplay.clone(),
        }
    }
}

/// First candidate that resolves to an executable.
pub fn find_piper_binary(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find_map(|c| which::which(c).ok())
}

/// Model path encoded in a Piper voice id.
pub fn model_path(voice_id: &str) -> &Path {
    Path::new(voice_id.strip_prefix(VOICE_PREFIX).unwrap_or(voice_id))
}

/// The model's config file: `<model>.onnx.json`.
pub fn model_config_path(model: &Path) -> PathBuf {
    let mut name = model.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Read `audio.sample_rate` from the model's config, defaulting to 22050 Hz.
pub fn model_sample_rate(model: &Path) -> u32 {
    let config_path = model_config_path(model);
    let rate = std::fs::read_to_string(&config_path)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|json| json.get("audio")?.get("sample_rate")?.as_u64())
        .and_then(|rate| u32::try_from(rate).ok());

    rate.unwrap_or_else(|| {
        log::debug!(
            "No sample rate in {}, assuming {DEFAULT_SAMPLE_RATE} Hz",
            config_path.display()
        );
        DEFAULT_SAMPLE_RATE
    })
}

pub fn piper_args(model: &Path, params: &PiperParams) -> Vec<String> {
    vec![
        "--model".to_string(),
        model.display().to_string(),
        "--output-raw".to_string(),
        "--length_scale".to_string(),
        format!("{:.2}", params.length_scale),
        "--noise_scale".to_string(),
        format!("{:.3}", params.noise_scale),
        "--noise_w".to_string(),
        format!("{:.2}", params.noise_w),
        "--sentence_silence".to_string(),
        format!("{:.1}", params.sentence_silence),
    ]
}

pub fn sox_args(sample_rate: u32, volume_factor: f64) -> Vec<String> {
    let rate = sample_rate.to_string();
    [
        "-t", "raw", "-r", &rate, "-e", "signed-integer", "-b", "16", "-c", "1", "-",
        "-t", "raw", "-", "vol",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(format!("{volume_factor:.2}")))
    .collect()
}

pub fn aplay_args(sample_rate: u32) -> Vec<String> {
    let rate = sample_rate.to_string();
    ["-r", &rate, "-f", "S16_LE", "-t", "raw", "-q", "-"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Piper reads line by line; make sure the last line is terminated.
fn canonicalize_stdin_payload(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

impl SpeechAdapter for PiperAdapter {
    fn start(
        &mut self,
        utterance: &Utterance,
        _notifier: CompletionNotifier,
    ) -> Result<PlaybackHandle, SpeechError> {
        let piper = find_piper_binary(&self.candidates).ok_or_else(|| {
            SpeechError::unavailable(BackendKind::Piper, "piper binary not found")
        })?;
        if utterance.voice_id.is_empty() {
            return Err(SpeechError::unavailable(
                BackendKind::Piper,
                "no Piper voice model selected",
            ));
        }
        let model = model_path(&utterance.voice_id);
        if !model.is_file() {
            return Err(SpeechError::unavailable(
                BackendKind::Piper,
                format!("model not found: {}", model.display()),
            ));
        }
        let player = resolve_program(BackendKind::Piper, &self.aplay)?;

        let params = utterance.params.to_piper();
        let sample_rate = model_sample_rate(model);
        let filter = if (params.volume_factor - 1.0).abs() > f64::EPSILON {
            match resolve_program(BackendKind::Piper, &self.sox) {
                Ok(sox) => Some(sox),
                Err(_) => {
                    log::debug!("sox not installed, playing Piper output at default volume");
                    None
                }
            }
        } else {
            None
        };

        log::debug!(
            "Piper: model={}, length_scale={:.2}, noise_scale={:.3}, volume_factor={:.2}",
            model.display(),
            params.length_scale,
            params.noise_scale,
            params.volume_factor
        );

        // Stages are pushed as soon as they exist; an error below drops the
        // chain, which kills anything already started.
        let mut chain = ProcessChain::new(BackendKind::Piper);
        let mut synth = spawn_stage(
            BackendKind::Piper,
            &piper,
            &piper_args(model, &params),
            Stdio::piped(),
            Stdio::piped(),
        )?;
        let stdin = synth.stdin.take();
        let synth_out = synth.stdout.take();
        chain.push("piper", synth);
        let mut upstream = Stdio::from(synth_out.ok_or_else(|| {
            SpeechError::start_failure(BackendKind::Piper, "piper stdout was not captured")
        })?);

        if let Some(sox) = filter {
            let mut stage = spawn_stage(
                BackendKind::Piper,
                &sox,
                &sox_args(sample_rate, params.volume_factor),
                upstream,
                Stdio::piped(),
            )?;
            let out = stage.stdout.take();
            chain.push("sox", stage);
            upstream = Stdio::from(out.ok_or_else(|| {
                SpeechError::start_failure(BackendKind::Piper, "sox stdout was not captured")
            })?);
        }

        let play = spawn_stage(
            BackendKind::Piper,
            &player,
            &aplay_args(sample_rate),
            upstream,
            Stdio::null(),
        )?;
        chain.push("aplay", play);

        let mut stdin = stdin.ok_or_else(|| {
            SpeechError::start_failure(BackendKind::Piper, "piper stdin was not captured")
        })?;
        let payload = canonicalize_stdin_payload(&utterance.text).into_owned();
        thread::Builder::new()
            .name("piper-stdin".into())
            .spawn(move || {
                if let Err(e) = stdin.write_all(payload.as_bytes()) {
                    log::debug!("Writing text to piper failed: {e}");
                }
                // `stdin` drops here, closing the pipe.
            })
            .map_err(|e| {
                SpeechError::start_failure(
                    BackendKind::Piper,
                    format!("could not spawn stdin writer: {e}"),
                )
            })?;

        log::debug!("Piper chain started (pids {:?})", chain.pids());
        Ok(PlaybackHandle::Process(chain))
    }
}
