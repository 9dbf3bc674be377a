//! Speech backends.
//!
//! The set of backends is closed; the controller picks an adapter with an
//! exhaustive `match` on [`BackendKind`].
//!
//! | Backend             | Module       | Handle                      |
//! |---------------------|--------------|-----------------------------|
//! | `speech-dispatcher` | [`speechd`]  | SSIP session or `spd-say`   |
//! | `espeak-ng`         | [`espeak`]   | one process per utterance   |
//! | `piper`             | [`piper`]    | synthesizer → [sox →] aplay |

pub mod espeak;
pub mod piper;
pub mod process;
pub mod speechd;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::SpeechParams;
use crate::SpeechError;

pub use espeak::EspeakAdapter;
pub use piper::PiperAdapter;
pub use process::ProcessChain;
pub use speechd::SpeechdAdapter;

/// Identifies a speech backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "speech-dispatcher")]
    SpeechDispatcher,
    #[serde(rename = "espeak-ng")]
    EspeakNg,
    #[serde(rename = "piper")]
    Piper,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [Self::SpeechDispatcher, Self::EspeakNg, Self::Piper];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpeechDispatcher => "speech-dispatcher",
            Self::EspeakNg => "espeak-ng",
            Self::Piper => "piper",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SpeechError::InvalidRequest(format!("unknown backend '{s}'")))
    }
}

/// A fully resolved utterance, ready to hand to an adapter.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Backend-specific voice id (may be empty for the engine default).
    pub voice_id: String,
    /// speech-dispatcher output module; ignored by the other backends.
    pub output_module: String,
    pub params: SpeechParams,
}

/// How an asynchronous session utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Finished,
    Cancelled,
    /// The daemon connection dropped while the message was in flight.
    Disconnected,
}

/// Callback a session adapter invokes from its reader thread.
///
/// The controller's notifier only posts a message to the control thread; it
/// never touches controller state directly.
#[derive(Clone)]
pub struct CompletionNotifier {
    inner: Arc<dyn Fn(u64, SessionOutcome) + Send + Sync>,
}

impl CompletionNotifier {
    pub fn new(f: impl Fn(u64, SessionOutcome) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// Report the outcome of message `msg_id`.
    pub fn notify(&self, msg_id: u64, outcome: SessionOutcome) {
        (self.inner)(msg_id, outcome);
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionNotifier")
    }
}

/// Everything the controller owns for the utterance in flight.
#[derive(Debug)]
pub enum PlaybackHandle {
    /// One or more spawned OS processes; completion is polled.
    Process(ProcessChain),
    /// A message queued on a daemon session; completion arrives as an event.
    Session { msg_id: u64 },
}

impl PlaybackHandle {
    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session { .. })
    }
}

/// Common interface for the speech backends.
pub trait SpeechAdapter: Send {
    /// Start speaking `utterance`. Session adapters report completion through
    /// `notifier`; process adapters ignore it.
    fn start(
        &mut self,
        utterance: &Utterance,
        notifier: CompletionNotifier,
    ) -> Result<PlaybackHandle, SpeechError>;

    /// Best-effort cancellation. Must not block longer than `grace` plus a
    /// small constant and must never fail.
    fn cancel(&mut self, handle: PlaybackHandle, grace: Duration) {
        if let PlaybackHandle::Process(mut chain) = handle {
            chain.terminate(grace);
        }
    }

    /// Release long-lived resources (open sessions) on teardown.
    fn shutdown(&mut self) {}
}

/// The closed set of adapters, one per backend.
pub struct Adapters {
    pub session: Box<dyn SpeechAdapter>,
    pub command_line: Box<dyn SpeechAdapter>,
    pub pipeline: Box<dyn SpeechAdapter>,
}

impl Adapters {
    pub fn from_config(config: &crate::EngineConfig) -> Self {
        Self {
            session: Box::new(SpeechdAdapter::new(config)),
            command_line: Box::new(EspeakAdapter::new(config)),
            pipeline: Box::new(PiperAdapter::new(config)),
        }
    }

    pub fn get_mut(&mut self, kind: BackendKind) -> &mut dyn SpeechAdapter {
        match kind {
            BackendKind::SpeechDispatcher => self.session.as_mut(),
            BackendKind::EspeakNg => self.command_line.as_mut(),
            BackendKind::Piper => self.pipeline.as_mut(),
        }
    }

    pub fn shutdown(&mut self) {
        self.session.shutdown();
        self.command_line.shutdown();
        self.pipeline.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tags_round_trip_through_strings() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("festival".parse::<BackendKind>().is_err());
    }

    #[test]
    fn backend_tags_serialize_as_engine_names() {
        let json = serde_json::to_string(&BackendKind::EspeakNg).unwrap();
        assert_eq!(json, "\"espeak-ng\"");
        let kind: BackendKind = serde_json::from_str("\"speech-dispatcher\"").unwrap();
        assert_eq!(kind, BackendKind::SpeechDispatcher);
    }

    #[test]
    fn speech_dispatcher_is_the_default_backend() {
        assert_eq!(BackendKind::default(), BackendKind::SpeechDispatcher);
        assert_eq!(BackendKind::default(), crate::SpeechDefaults::default().backend);
    }
}
