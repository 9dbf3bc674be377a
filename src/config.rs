use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engines::BackendKind;
use crate::error::SpeechError;

/// Executables the backends and discovery probes invoke.
///
/// Each entry is either a bare program name (looked up on `PATH`) or an
/// absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryPaths {
    pub spd_say: PathBuf,
    pub espeak: PathBuf,
    /// Tried in order; the first one that resolves wins.
    pub piper_candidates: Vec<PathBuf>,
    pub sox: PathBuf,
    pub aplay: PathBuf,
    pub pacman: PathBuf,
    pub rhvoice_test: PathBuf,
}

impl Default for BinaryPaths {
    fn default() -> Self {
        Self {
            spd_say: PathBuf::from("spd-say"),
            espeak: PathBuf::from("espeak-ng"),
            piper_candidates: vec![
                PathBuf::from("piper-tts"),
                PathBuf::from("piper"),
                PathBuf::from("/usr/bin/piper-tts"),
                PathBuf::from("/opt/piper-tts/piper"),
            ],
            sox: PathBuf::from("sox"),
            aplay: PathBuf::from("aplay"),
            pacman: PathBuf::from("pacman"),
            rhvoice_test: PathBuf::from("RHVoice-test"),
        }
    }
}

/// Engine-wide configuration shared by adapters, discovery and the controller.
///
/// Every field has a default, so a JSON file only needs the keys it wants to
/// override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub binaries: BinaryPaths,
    pub rhvoice_voice_dirs: Vec<PathBuf>,
    pub piper_voice_dirs: Vec<PathBuf>,
    /// Explicit speech-dispatcher socket. `None` uses the daemon's own lookup rules.
    pub speechd_socket: Option<PathBuf>,
    pub client_name: String,
    /// Try a persistent SSIP session before falling back to `spd-say`.
    pub prefer_session: bool,
    pub poll_interval_ms: u64,
    pub stop_grace_ms: u64,
    pub probe_timeout_ms: u64,
    pub session_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut piper_voice_dirs = vec![
            PathBuf::from("/usr/share/piper-voices"),
            PathBuf::from("/usr/local/share/piper-voices"),
        ];
        if let Some(home) = dirs::home_dir() {
            piper_voice_dirs.push(home.join(".local").join("share").join("piper-voices"));
        }

        Self {
            binaries: BinaryPaths::default(),
            rhvoice_voice_dirs: vec![
                PathBuf::from("/usr/share/RHVoice/voices"),
                PathBuf::from("/usr/local/share/RHVoice/voices"),
            ],
            piper_voice_dirs,
            speechd_socket: None,
            client_name: "tts-hub".to_string(),
            prefer_session: true,
            poll_interval_ms: 300,
            stop_grace_ms: 2000,
            probe_timeout_ms: 5000,
            session_timeout_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Load the configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, SpeechError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| SpeechError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        log::debug!("Engine configuration loaded from {}", path.display());
        Ok(config)
    }

    fn validate(&self) -> Result<(), SpeechError> {
        if self.poll_interval_ms == 0 {
            return Err(SpeechError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.client_name.trim().is_empty() {
            return Err(SpeechError::Config("client_name must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Caller-side speech defaults, used when a request leaves a field unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechDefaults {
    pub rate: i32,
    pub pitch: i32,
    pub volume: i32,
    pub voice_id: String,
    pub backend: BackendKind,
    pub output_module: String,
}

impl Default for SpeechDefaults {
    fn default() -> Self {
        Self {
            rate: -25,
            pitch: -25,
            volume: 75,
            voice_id: String::new(),
            backend: BackendKind::SpeechDispatcher,
            output_module: "rhvoice".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "poll_interval_ms": 50, "binaries": {{ "espeak": "/opt/espeak/bin/espeak-ng" }} }}"#
        )
        .unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.binaries.espeak, PathBuf::from("/opt/espeak/bin/espeak-ng"));
        assert_eq!(config.binaries.spd_say, PathBuf::from("spd-say"));
        assert_eq!(config.stop_grace_ms, 2000);
        assert!(config.prefer_session);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "poll_interval_ms": 0 }}"#).unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(SpeechError::Config(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(file.path()),
            Err(SpeechError::Config(_))
        ));
    }

    #[test]
    fn speech_defaults_match_shipped_settings() {
        let defaults = SpeechDefaults::default();
        assert_eq!((defaults.rate, defaults.pitch, defaults.volume), (-25, -25, 75));
        assert_eq!(defaults.backend, BackendKind::SpeechDispatcher);
        assert_eq!(defaults.output_module, "rhvoice");
    }
}
