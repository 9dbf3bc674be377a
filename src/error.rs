use crate::engines::BackendKind;

/// Errors produced by the speech backends and the playback controller.
///
/// Adapter failures never escape `speak`/`stop`/`toggle`; the controller
/// turns them into [`PlaybackState::Error`](crate::PlaybackState::Error).
#[derive(thiserror::Error, Debug)]
pub enum SpeechError {
    #[error("{backend} is not available: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },
    #[error("failed to start {backend}: {reason}")]
    BackendStartFailure { backend: BackendKind, reason: String },
    #[error("{backend} failed while speaking: {reason}")]
    BackendRuntimeFailure { backend: BackendKind, reason: String },
    #[error("Invalid speech request: {0}")]
    InvalidRequest(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Playback controller is no longer running")]
    ControllerGone,
}

impl SpeechError {
    pub(crate) fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn start_failure(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendStartFailure {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn runtime_failure(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendRuntimeFailure {
            backend,
            reason: reason.into(),
        }
    }

    /// Map a spawn error: a missing executable is "unavailable", anything
    /// else is a start failure.
    pub(crate) fn from_spawn(backend: BackendKind, program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::unavailable(backend, format!("`{program}` not found"))
        } else {
            Self::start_failure(backend, format!("could not spawn `{program}`: {err}"))
        }
    }
}

#[cfg(unix)]
impl From<crate::engines::speechd::ssip::SsipError> for SpeechError {
    fn from(err: crate::engines::speechd::ssip::SsipError) -> Self {
        use crate::engines::speechd::ssip::SsipError;

        let backend = BackendKind::SpeechDispatcher;
        match err {
            SsipError::Io(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                Self::unavailable(backend, err.to_string())
            }
            SsipError::Disconnected => Self::runtime_failure(backend, err.to_string()),
            other => Self::start_failure(backend, other.to_string()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::engines::speechd::ssip::SsipError;

    #[test]
    fn missing_socket_maps_to_unavailable() {
        let err = SpeechError::from(SsipError::Io(std::io::Error::from(
            std::io::ErrorKind::NotFound,
        )));
        assert!(matches!(err, SpeechError::BackendUnavailable { .. }));
    }

    #[test]
    fn rejected_command_maps_to_start_failure() {
        let err = SpeechError::from(SsipError::Rejected {
            command: "SET self OUTPUT_MODULE x".into(),
            code: 410,
            message: "ERR".into(),
        });
        assert!(matches!(
            err,
            SpeechError::BackendStartFailure {
                backend: BackendKind::SpeechDispatcher,
                ..
            }
        ));
    }
}
