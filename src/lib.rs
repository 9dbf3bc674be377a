//! # tts-hub
//!
//! A Rust library that drives the local speech engines of a Linux desktop
//! behind one playback controller.
//!
//! ## Features
//!
//! - **speech-dispatcher**: persistent SSIP session with a `spd-say` fallback
//! - **espeak-ng**: one process per utterance
//! - **Piper**: neural synthesis piped through an optional volume filter into `aplay`
//! - **Voice catalog**: discovery across every installed backend
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! tts-hub = "2026.2"
//! ```
//!
//! ```ignore
//! use tts_hub::{BackendKind, EngineConfig, SpeechContext, SpeechRequest};
//!
//! let context = SpeechContext::init(EngineConfig::default())?;
//! let request = SpeechRequest::builder()
//!     .text("Hello, world!")
//!     .backend(BackendKind::EspeakNg)
//!     .build()?;
//! context.controller().speak(request);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod controller;
pub mod engines;
pub mod error;
pub mod params;
pub mod voices;

pub use config::{EngineConfig, SpeechDefaults};
pub use controller::{
    ControllerEvent, PlaybackController, PlaybackState, SpeechRequest, SpeechRequestBuilder,
    TextFlags,
};
pub use engines::BackendKind;
pub use error::SpeechError;
pub use params::SpeechParams;
pub use voices::{discover_voices, VoiceCatalog, VoiceInfo};

/// Everything a running application needs, created once at startup.
///
/// `init` starts the playback controller and a first voice sweep in the
/// background; `teardown` stops playback and joins every thread the context
/// started.
pub struct SpeechContext {
    config: EngineConfig,
    defaults: SpeechDefaults,
    controller: PlaybackController,
}

impl SpeechContext {
    pub fn init(config: EngineConfig) -> Result<Self, SpeechError> {
        Self::init_with_defaults(config, SpeechDefaults::default())
    }

    pub fn init_with_defaults(
        config: EngineConfig,
        defaults: SpeechDefaults,
    ) -> Result<Self, SpeechError> {
        log::info!("Starting speech context ({})", config.client_name);
        let controller = PlaybackController::spawn(config.clone(), VoiceCatalog::default())?;
        controller.refresh_voices()?;
        Ok(Self {
            config,
            defaults,
            controller,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn defaults(&self) -> &SpeechDefaults {
        &self.defaults
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    /// A request for `text` carrying this context's defaults.
    pub fn request(&self, text: impl Into<String>) -> SpeechRequest {
        SpeechRequest::with_defaults(text, &self.defaults)
    }

    pub fn teardown(mut self) {
        self.controller.shutdown();
        log::info!("Speech context stopped");
    }
}
