//! Playback controller: the single owner of whatever is speaking.
//!
//! All state lives on one control thread. [`PlaybackController`] is a
//! `Send + Sync` proxy that forwards every call as a [`Command`] over an
//! `mpsc` channel and, where a result is needed, waits on a one-shot reply
//! channel. Session completion callbacks and background discovery post
//! commands to the same channel, so every state transition is serialized
//! through one place.
//!
//! ```text
//!          speak ok                 exit / END
//!  IDLE ─────────────► SPEAKING ─────────────► IDLE
//!   ▲  ╲ speak fails      │  stop / preempt      ▲
//!   │   ╲                 └──────────────────────┘
//!   │    ▼
//!   └── ERROR  (stop, or the next successful speak)
//! ```

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::engines::{
    Adapters, BackendKind, CompletionNotifier, PlaybackHandle, SessionOutcome, Utterance,
};
use crate::params::SpeechParams;
use crate::voices::{discover_voices, VoiceCatalog};
use crate::{EngineConfig, SpeechDefaults, SpeechError};

/// Characters of the spoken text carried by [`ControllerEvent::Started`].
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Speaking,
    /// The last attempt failed. Cleared by `stop` or the next successful speak.
    Error,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Speaking => "speaking",
            Self::Error => "error",
        })
    }
}

/// Cleanup the text collaborator applied before handing text over.
///
/// The controller does not transform text; the flags are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextFlags {
    pub expand_abbreviations: bool,
    pub process_special_chars: bool,
    pub process_urls: bool,
    pub strip_formatting: bool,
}

/// One call to [`PlaybackController::speak`].
///
/// Unset fields take the values of [`SpeechDefaults::default`].
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
#[builder(setter(into))]
pub struct SpeechRequest {
    /// Already-cleaned text.
    pub text: String,
    /// Catalog voice id. When it resolves, it overrides `voice_id`, `backend`
    /// and `output_module`.
    #[builder(default, setter(into, strip_option))]
    pub voice: Option<String>,
    #[builder(default = "SpeechDefaults::default().voice_id")]
    pub voice_id: String,
    #[builder(default = "SpeechDefaults::default().backend")]
    pub backend: BackendKind,
    #[builder(default = "SpeechDefaults::default().output_module")]
    pub output_module: String,
    #[builder(default = "SpeechDefaults::default().rate")]
    pub rate: i32,
    #[builder(default = "SpeechDefaults::default().pitch")]
    pub pitch: i32,
    #[builder(default = "SpeechDefaults::default().volume")]
    pub volume: i32,
    #[builder(default)]
    pub flags: TextFlags,
}

impl SpeechRequest {
    pub fn builder() -> SpeechRequestBuilder {
        SpeechRequestBuilder::default()
    }

    /// A request for `text` using `defaults` for everything else.
    pub fn with_defaults(text: impl Into<String>, defaults: &SpeechDefaults) -> Self {
        Self {
            text: text.into(),
            voice: None,
            voice_id: defaults.voice_id.clone(),
            backend: defaults.backend,
            output_module: defaults.output_module.clone(),
            rate: defaults.rate,
            pitch: defaults.pitch,
            volume: defaults.volume,
            flags: TextFlags::default(),
        }
    }
}

/// Notifications delivered to [`PlaybackController::subscribe`] receivers.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Emitted only when the state actually changes.
    StateChanged(PlaybackState),
    /// An utterance started; `preview` is its first [`PREVIEW_CHARS`] characters.
    Started { preview: String },
    /// A discovery sweep replaced the catalog.
    CatalogUpdated(Arc<VoiceCatalog>),
}

enum Command {
    Speak {
        request: SpeechRequest,
        reply: Sender<bool>,
    },
    Stop {
        reply: Sender<()>,
    },
    Toggle {
        request: SpeechRequest,
        reply: Sender<bool>,
    },
    State {
        reply: Sender<PlaybackState>,
    },
    Catalog {
        reply: Sender<Arc<VoiceCatalog>>,
    },
    Subscribe(Sender<ControllerEvent>),
    RefreshVoices,
    CatalogReady(Arc<VoiceCatalog>),
    SessionDone {
        generation: u64,
        msg_id: u64,
        outcome: SessionOutcome,
    },
    Shutdown,
}

/// Handle to the control thread.
pub struct PlaybackController {
    cmd_tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackController {
    /// Start a controller with the real backend adapters.
    pub fn spawn(config: EngineConfig, catalog: VoiceCatalog) -> Result<Self, SpeechError> {
        let adapters = Adapters::from_config(&config);
        Self::with_adapters(config, adapters, catalog)
    }

    pub fn with_adapters(
        config: EngineConfig,
        adapters: Adapters,
        catalog: VoiceCatalog,
    ) -> Result<Self, SpeechError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let worker = Worker::new(config, adapters, catalog, cmd_tx.clone());
        let thread = thread::Builder::new()
            .name("tts-playback".into())
            .spawn(move || worker.run(cmd_rx))?;
        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Start speaking, preempting anything in flight. Returns `false` for
    /// empty text (state unchanged) or when the backend failed (state ERROR).
    pub fn speak(&self, request: SpeechRequest) -> bool {
        self.query(|reply| Command::Speak { request, reply })
            .unwrap_or(false)
    }

    /// Cancel whatever is speaking. Always ends in IDLE.
    pub fn stop(&self) {
        let _ = self.query(|reply| Command::Stop { reply });
    }

    /// Stop if speaking, otherwise speak `request`. Returns whether the state
    /// changed.
    pub fn toggle(&self, request: SpeechRequest) -> bool {
        self.query(|reply| Command::Toggle { request, reply })
            .unwrap_or(false)
    }

    pub fn state(&self) -> PlaybackState {
        self.query(|reply| Command::State { reply })
            .unwrap_or_default()
    }

    pub fn is_speaking(&self) -> bool {
        self.state() == PlaybackState::Speaking
    }

    /// Current catalog snapshot.
    pub fn catalog(&self) -> Arc<VoiceCatalog> {
        self.query(|reply| Command::Catalog { reply })
            .unwrap_or_default()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Result<Receiver<ControllerEvent>, SpeechError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(Command::Subscribe(tx))
            .map_err(|_| SpeechError::ControllerGone)?;
        Ok(rx)
    }

    /// Re-run voice discovery in the background. The new catalog arrives as
    /// [`ControllerEvent::CatalogUpdated`].
    pub fn refresh_voices(&self) -> Result<(), SpeechError> {
        self.cmd_tx
            .send(Command::RefreshVoices)
            .map_err(|_| SpeechError::ControllerGone)
    }

    /// Stop playback, close sessions and join the control thread.
    pub fn shutdown(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Playback thread panicked");
            }
        }
    }

    fn query<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T, SpeechError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| SpeechError::ControllerGone)?;
        rx.recv().map_err(|_| SpeechError::ControllerGone)
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Active {
    generation: u64,
    backend: BackendKind,
    handle: PlaybackHandle,
}

struct Worker {
    config: EngineConfig,
    adapters: Adapters,
    state: PlaybackState,
    active: Option<Active>,
    generation: u64,
    /// Next liveness check for a process handle; `None` while nothing is polled.
    poll_at: Option<Instant>,
    catalog: Arc<VoiceCatalog>,
    subscribers: Vec<Sender<ControllerEvent>>,
    cmd_tx: Sender<Command>,
    discovery: Vec<JoinHandle<()>>,
}

impl Worker {
    fn new(
        config: EngineConfig,
        adapters: Adapters,
        catalog: VoiceCatalog,
        cmd_tx: Sender<Command>,
    ) -> Self {
        Self {
            config,
            adapters,
            state: PlaybackState::Idle,
            active: None,
            generation: 0,
            poll_at: None,
            catalog: Arc::new(catalog),
            subscribers: Vec::new(),
            cmd_tx,
            discovery: Vec::new(),
        }
    }

    fn run(mut self, cmd_rx: Receiver<Command>) {
        log::debug!("Playback thread started");
        loop {
            let command = match self.poll_at {
                Some(at) => match cmd_rx.recv_timeout(at.saturating_duration_since(Instant::now())) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match cmd_rx.recv() {
                    Ok(command) => Some(command),
                    Err(_) => break,
                },
            };

            match command {
                Some(Command::Shutdown) => break,
                Some(command) => self.handle(command),
                None => {}
            }

            if self.poll_at.is_some_and(|at| Instant::now() >= at) {
                self.poll_active();
            }
        }
        self.teardown();
        log::debug!("Playback thread stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Speak { request, reply } => {
                let _ = reply.send(self.speak(request));
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::Toggle { request, reply } => {
                let _ = reply.send(self.toggle(request));
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Catalog { reply } => {
                let _ = reply.send(Arc::clone(&self.catalog));
            }
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::RefreshVoices => self.refresh_voices(),
            Command::CatalogReady(catalog) => {
                log::debug!("Voice catalog replaced ({} voices)", catalog.len());
                self.catalog = Arc::clone(&catalog);
                self.emit(ControllerEvent::CatalogUpdated(catalog));
            }
            Command::SessionDone {
                generation,
                msg_id,
                outcome,
            } => self.session_done(generation, msg_id, outcome),
            Command::Shutdown => {}
        }
    }

    fn speak(&mut self, request: SpeechRequest) -> bool {
        if request.text.trim().is_empty() {
            log::debug!("No text to speak");
            return false;
        }
        if self.active.is_some() {
            self.stop();
        }

        let (backend, utterance) = self.resolve(&request);
        log::debug!(
            "speak: backend={backend}, voice_id={:?}, module={:?}, flags={:?}",
            utterance.voice_id,
            utterance.output_module,
            request.flags
        );

        self.generation += 1;
        let generation = self.generation;
        let tx = self.cmd_tx.clone();
        let notifier = CompletionNotifier::new(move |msg_id, outcome| {
            let _ = tx.send(Command::SessionDone {
                generation,
                msg_id,
                outcome,
            });
        });

        match self.adapters.get_mut(backend).start(&utterance, notifier) {
            Ok(handle) => {
                if !handle.is_session() {
                    self.poll_at = Some(Instant::now() + self.config.poll_interval());
                }
                self.active = Some(Active {
                    generation,
                    backend,
                    handle,
                });
                self.set_state(PlaybackState::Speaking);
                self.emit(ControllerEvent::Started {
                    preview: preview(&utterance.text),
                });
                true
            }
            Err(e) => {
                log::error!("Speech failed: {e}");
                self.set_state(PlaybackState::Error);
                false
            }
        }
    }

    /// Explicit catalog selection first, then the stored fields, then the
    /// best Piper model when Piper has no voice.
    fn resolve(&self, request: &SpeechRequest) -> (BackendKind, Utterance) {
        let mut backend = request.backend;
        let mut voice_id = request.voice_id.clone();
        let mut output_module = request.output_module.clone();

        if let Some(selector) = request.voice.as_deref().filter(|s| !s.is_empty()) {
            match self.catalog.find(selector) {
                Some(voice) => {
                    backend = voice.backend;
                    voice_id = voice.voice_id.clone();
                    output_module = voice.output_module.clone();
                }
                None => log::warn!("Voice {selector:?} is not in the catalog, using stored settings"),
            }
        }

        if backend == BackendKind::Piper && voice_id.is_empty() {
            if let Some(voice) = self.catalog.best_for_backend(BackendKind::Piper) {
                voice_id = voice.voice_id.clone();
            }
        }

        let utterance = Utterance {
            text: request.text.clone(),
            voice_id,
            output_module,
            params: SpeechParams::new(request.rate, request.pitch, request.volume),
        };
        (backend, utterance)
    }

    fn stop(&mut self) {
        self.poll_at = None;
        if let Some(active) = self.active.take() {
            log::debug!("Stopping {} playback", active.backend);
            self.adapters
                .get_mut(active.backend)
                .cancel(active.handle, self.config.stop_grace());
        }
        self.set_state(PlaybackState::Idle);
    }

    fn toggle(&mut self, request: SpeechRequest) -> bool {
        // A process may have exited since the last poll.
        if self.poll_at.is_some() {
            self.poll_active();
        }
        if self.active.is_some() {
            self.stop();
            return true;
        }
        self.speak(request)
    }

    fn poll_active(&mut self) {
        let (backend, result) = match self.active.as_mut() {
            Some(Active {
                backend,
                handle: PlaybackHandle::Process(chain),
                ..
            }) => (*backend, chain.poll()),
            _ => {
                self.poll_at = None;
                return;
            }
        };

        match result {
            Ok(None) => {
                self.poll_at = Some(Instant::now() + self.config.poll_interval());
            }
            Ok(Some(status)) => {
                if status.success() {
                    log::debug!("{backend} finished");
                } else {
                    log::warn!("{backend} exited with {status}");
                }
                self.poll_at = None;
                self.active = None;
                self.set_state(PlaybackState::Idle);
            }
            Err(e) => {
                log::error!("{}", SpeechError::runtime_failure(backend, e.to_string()));
                self.poll_at = None;
                if let Some(active) = self.active.take() {
                    self.adapters
                        .get_mut(active.backend)
                        .cancel(active.handle, self.config.stop_grace());
                }
                self.set_state(PlaybackState::Error);
            }
        }
    }

    fn session_done(&mut self, generation: u64, msg_id: u64, outcome: SessionOutcome) {
        let current = match &self.active {
            Some(Active {
                generation: g,
                handle: PlaybackHandle::Session { msg_id: m },
                ..
            }) => *g == generation && (*m == msg_id || outcome == SessionOutcome::Disconnected),
            _ => false,
        };
        if !current {
            log::debug!("Ignoring stale completion (generation {generation}, message {msg_id})");
            return;
        }
        let Some(active) = self.active.take() else {
            return;
        };

        match outcome {
            SessionOutcome::Finished | SessionOutcome::Cancelled => {
                log::debug!("{} message {msg_id} {outcome:?}", active.backend);
                self.set_state(PlaybackState::Idle);
            }
            SessionOutcome::Disconnected => {
                log::error!(
                    "{}",
                    SpeechError::runtime_failure(active.backend, "session closed while speaking")
                );
                self.adapters.get_mut(active.backend).shutdown();
                self.set_state(PlaybackState::Error);
            }
        }
    }

    fn refresh_voices(&mut self) {
        self.discovery.retain(|handle| !handle.is_finished());
        let config = self.config.clone();
        let tx = self.cmd_tx.clone();
        let spawned = thread::Builder::new()
            .name("voice-discovery".into())
            .spawn(move || {
                let catalog = discover_voices(&config);
                let _ = tx.send(Command::CatalogReady(Arc::new(catalog)));
            });
        match spawned {
            Ok(handle) => self.discovery.push(handle),
            Err(e) => log::error!("Could not start voice discovery: {e}"),
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        log::debug!("Playback state {} -> {}", self.state, state);
        self.state = state;
        self.emit(ControllerEvent::StateChanged(state));
    }

    fn emit(&mut self, event: ControllerEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn teardown(&mut self) {
        self.stop();
        self.adapters.shutdown();
        for handle in self.discovery.drain(..) {
            let _ = handle.join();
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::SpeechAdapter;
    use crate::voices::{voice, Quality};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start { voice_id: String, module: String },
        Cancel(u64),
    }

    /// Session-style adapter that records calls and never finishes on its own.
    struct Recording {
        kind: BackendKind,
        calls: Arc<Mutex<Vec<Call>>>,
        fail: bool,
        next_id: u64,
    }

    impl SpeechAdapter for Recording {
        fn start(
            &mut self,
            utterance: &Utterance,
            _notifier: CompletionNotifier,
        ) -> Result<PlaybackHandle, SpeechError> {
            if self.fail {
                return Err(SpeechError::unavailable(self.kind, "not installed"));
            }
            self.next_id += 1;
            self.calls.lock().unwrap().push(Call::Start {
                voice_id: utterance.voice_id.clone(),
                module: utterance.output_module.clone(),
            });
            Ok(PlaybackHandle::Session {
                msg_id: self.next_id,
            })
        }

        fn cancel(&mut self, handle: PlaybackHandle, _grace: Duration) {
            if let PlaybackHandle::Session { msg_id } = handle {
                self.calls.lock().unwrap().push(Call::Cancel(msg_id));
            }
        }
    }

    struct Harness {
        worker: Worker,
        calls: Arc<Mutex<Vec<Call>>>,
        events: Receiver<ControllerEvent>,
        commands: Receiver<Command>,
    }

    fn harness(catalog: VoiceCatalog) -> Harness {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let adapter = |kind, fail| -> Box<dyn SpeechAdapter> {
            Box::new(Recording {
                kind,
                calls: Arc::clone(&calls),
                fail,
                next_id: 0,
            })
        };
        let adapters = Adapters {
            session: adapter(BackendKind::SpeechDispatcher, false),
            command_line: adapter(BackendKind::EspeakNg, false),
            pipeline: adapter(BackendKind::Piper, true),
        };
        let (cmd_tx, commands) = mpsc::channel();
        let mut worker = Worker::new(EngineConfig::default(), adapters, catalog, cmd_tx);
        let (tx, events) = mpsc::channel();
        worker.subscribers.push(tx);
        Harness {
            worker,
            calls,
            events,
            commands,
        }
    }

    fn request(text: &str) -> SpeechRequest {
        SpeechRequest::builder()
            .text(text)
            .build()
            .unwrap()
    }

    fn states(events: &Receiver<ControllerEvent>) -> Vec<PlaybackState> {
        events
            .try_iter()
            .filter_map(|e| match e {
                ControllerEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn builder_fills_in_defaults() {
        let req = request("Olá");
        let defaults = SpeechDefaults::default();
        assert_eq!(req, SpeechRequest::with_defaults("Olá", &defaults));
        assert_eq!(req.backend, BackendKind::SpeechDispatcher);
        assert_eq!(req.output_module, "rhvoice");
        assert_eq!((req.rate, req.pitch, req.volume), (-25, -25, 75));
        assert!(SpeechRequest::builder().build().is_err());
    }

    #[test]
    fn empty_text_changes_nothing() {
        let mut h = harness(VoiceCatalog::default());
        assert!(!h.worker.speak(request("  \n\t ")));
        assert_eq!(h.worker.state, PlaybackState::Idle);
        assert!(h.events.try_recv().is_err());
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn speak_emits_state_and_truncated_preview() {
        let mut h = harness(VoiceCatalog::default());
        let text = "x".repeat(250);
        assert!(h.worker.speak(request(&text)));
        assert_eq!(h.worker.state, PlaybackState::Speaking);

        let events: Vec<ControllerEvent> = h.events.try_iter().collect();
        assert!(matches!(
            events[0],
            ControllerEvent::StateChanged(PlaybackState::Speaking)
        ));
        match &events[1] {
            ControllerEvent::Started { preview } => assert_eq!(preview.chars().count(), 100),
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn second_speak_releases_the_first_handle_first() {
        let mut h = harness(VoiceCatalog::default());
        assert!(h.worker.speak(request("one")));
        assert!(h.worker.speak(request("two")));
        let calls = h.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            [
                Call::Start {
                    voice_id: String::new(),
                    module: "rhvoice".into()
                },
                Call::Cancel(1),
                Call::Start {
                    voice_id: String::new(),
                    module: "rhvoice".into()
                },
            ]
        );
        assert_eq!(
            states(&h.events),
            [PlaybackState::Speaking, PlaybackState::Idle, PlaybackState::Speaking]
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let mut h = harness(VoiceCatalog::default());
        h.worker.stop();
        h.worker.stop();
        assert_eq!(h.worker.state, PlaybackState::Idle);
        assert!(states(&h.events).is_empty());

        assert!(h.worker.speak(request("hi")));
        h.worker.stop();
        h.worker.stop();
        assert_eq!(states(&h.events), [PlaybackState::Speaking, PlaybackState::Idle]);
        assert_eq!(h.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn toggle_twice_ends_idle() {
        let mut h = harness(VoiceCatalog::default());
        assert!(h.worker.toggle(request("hi")));
        assert!(h.worker.toggle(request("hi")));
        assert_eq!(h.worker.state, PlaybackState::Idle);
        assert!(!h.worker.toggle(request("")));
    }

    #[test]
    fn failure_enters_error_until_the_next_success() {
        let mut h = harness(VoiceCatalog::default());
        let piper = SpeechRequest::builder()
            .text("hi")
            .backend(BackendKind::Piper)
            .build()
            .unwrap();
        assert!(!h.worker.speak(piper));
        assert_eq!(h.worker.state, PlaybackState::Error);
        assert!(h.worker.active.is_none());

        assert!(h.worker.speak(request("hi")));
        assert_eq!(h.worker.state, PlaybackState::Speaking);

        h.worker.stop();
        assert!(!h.worker.speak(
            SpeechRequest::builder()
                .text("hi")
                .backend(BackendKind::Piper)
                .build()
                .unwrap()
        ));
        h.worker.stop();
        assert_eq!(h.worker.state, PlaybackState::Idle);
    }

    #[test]
    fn explicit_voice_overrides_stored_settings() {
        let mut h = harness(VoiceCatalog::new([voice(
            "espeak-en",
            "en",
            BackendKind::EspeakNg,
            Quality::Standard,
        )]));

        let req = SpeechRequest::builder()
            .text("hi")
            .voice("espeak-en")
            .voice_id("Leticia-F123")
            .build()
            .unwrap();
        let (backend, utterance) = h.worker.resolve(&req);
        assert_eq!(backend, BackendKind::EspeakNg);
        assert_eq!(utterance.voice_id, "espeak-en");
        assert_eq!(utterance.output_module, "");

        let unknown = SpeechRequest::builder()
            .text("hi")
            .voice("nope")
            .voice_id("Leticia-F123")
            .build()
            .unwrap();
        let (backend, utterance) = h.worker.resolve(&unknown);
        assert_eq!(backend, BackendKind::SpeechDispatcher);
        assert_eq!(utterance.voice_id, "Leticia-F123");
        assert!(h.worker.speak(unknown));
    }

    #[test]
    fn piper_without_a_voice_uses_the_best_model() {
        let h = harness(VoiceCatalog::new([
            voice("espeak-en", "en", BackendKind::EspeakNg, Quality::Standard),
            voice("piper:/v/en_US-amy-low.onnx", "en-US", BackendKind::Piper, Quality::Neural),
        ]));
        let req = SpeechRequest::builder()
            .text("hi")
            .backend(BackendKind::Piper)
            .voice_id("")
            .build()
            .unwrap();
        let (backend, utterance) = h.worker.resolve(&req);
        assert_eq!(backend, BackendKind::Piper);
        assert_eq!(utterance.voice_id, "piper:/v/en_US-amy-low.onnx");
    }

    #[test]
    fn stale_session_completions_are_ignored() {
        let mut h = harness(VoiceCatalog::default());
        assert!(h.worker.speak(request("one")));
        let first = h.worker.generation;
        assert!(h.worker.speak(request("two")));

        // END for the preempted utterance.
        h.worker.session_done(first, 1, SessionOutcome::Finished);
        assert_eq!(h.worker.state, PlaybackState::Speaking);
        // Right generation, wrong message.
        h.worker
            .session_done(h.worker.generation, 99, SessionOutcome::Finished);
        assert_eq!(h.worker.state, PlaybackState::Speaking);

        h.worker
            .session_done(h.worker.generation, 2, SessionOutcome::Finished);
        assert_eq!(h.worker.state, PlaybackState::Idle);
        assert!(h.worker.active.is_none());
    }

    #[test]
    fn session_disconnect_is_an_error() {
        let mut h = harness(VoiceCatalog::default());
        assert!(h.worker.speak(request("one")));
        h.worker
            .session_done(h.worker.generation, 0, SessionOutcome::Disconnected);
        assert_eq!(h.worker.state, PlaybackState::Error);
    }

    #[test]
    fn notifier_posts_to_the_control_channel() {
        let mut h = harness(VoiceCatalog::default());
        assert!(h.worker.speak(request("one")));
        let generation = h.worker.generation;
        let tx = h.worker.cmd_tx.clone();
        tx.send(Command::SessionDone {
            generation,
            msg_id: 1,
            outcome: SessionOutcome::Finished,
        })
        .unwrap();
        let command = h.commands.recv().unwrap();
        h.worker.handle(command);
        assert_eq!(h.worker.state, PlaybackState::Idle);
    }

    #[cfg(unix)]
    mod session {
        use super::*;
        use crate::engines::speechd::ssip::fake::{FakeDaemon, FakeOptions};

        fn controller(daemon: &FakeDaemon) -> (PlaybackController, Receiver<ControllerEvent>) {
            let mut config = EngineConfig::default();
            config.speechd_socket = Some(daemon.socket.clone());
            config.binaries.spd_say = "/nonexistent/spd-say".into();
            let controller = PlaybackController::spawn(config, VoiceCatalog::default()).unwrap();
            let events = controller.subscribe().unwrap();
            (controller, events)
        }

        fn wait_for_state(events: &Receiver<ControllerEvent>, want: PlaybackState) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if let Ok(ControllerEvent::StateChanged(s)) =
                    events.recv_timeout(Duration::from_millis(100))
                {
                    if s == want {
                        return;
                    }
                }
            }
            panic!("never reached {want}");
        }

        #[test]
        fn end_event_returns_to_idle() {
            let daemon = FakeDaemon::start(FakeOptions {
                finish_immediately: true,
                ..FakeOptions::default()
            });
            let (controller, events) = controller(&daemon);
            assert!(controller.speak(request("Olá mundo")));
            wait_for_state(&events, PlaybackState::Speaking);
            wait_for_state(&events, PlaybackState::Idle);
            assert!(daemon.commands().contains(&"BODY Olá mundo".to_string()));
        }

        #[test]
        fn stop_cancels_the_session_message() {
            let daemon = FakeDaemon::start(FakeOptions::default());
            let (controller, _events) = controller(&daemon);
            assert!(controller.speak(request("long text")));
            assert!(controller.is_speaking());
            controller.stop();
            assert_eq!(controller.state(), PlaybackState::Idle);
            assert!(daemon.commands().contains(&"CANCEL self".to_string()));
        }

        #[test]
        fn hang_up_while_speaking_is_an_error() {
            let daemon = FakeDaemon::start(FakeOptions {
                hang_up_after_speak: true,
                ..FakeOptions::default()
            });
            let (controller, events) = controller(&daemon);
            assert!(controller.speak(request("hello")));
            wait_for_state(&events, PlaybackState::Error);
            assert!(controller.speak(request("again")));
        }
    }
}
