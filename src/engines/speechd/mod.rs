//! speech-dispatcher backend.
//!
//! Utterances go over a persistent SSIP session when the daemon socket is
//! reachable; completion then arrives as an END event instead of a process
//! exit. When the session cannot be opened or configured the adapter falls
//! back to one `spd-say --wait` process per utterance.

#[cfg(unix)]
pub mod ssip;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use super::process::{resolve_program, spawn_stage, ProcessChain};
use super::{BackendKind, CompletionNotifier, PlaybackHandle, SpeechAdapter, Utterance};
use crate::{EngineConfig, SpeechError};

#[cfg(unix)]
use ssip::{SsipConnection, SsipError};

pub struct SpeechdAdapter {
    spd_say: PathBuf,
    socket: Option<PathBuf>,
    client_name: String,
    prefer_session: bool,
    timeout: Duration,
    #[cfg(unix)]
    connection: Option<SsipConnection>,
}

impl SpeechdAdapter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            spd_say: config.binaries.spd_say.clone(),
            socket: config.speechd_socket.clone(),
            client_name: config.client_name.clone(),
            prefer_session: config.prefer_session,
            timeout: config.session_timeout(),
            #[cfg(unix)]
            connection: None,
        }
    }

    /// Whether an SSIP session is currently open.
    pub fn has_session(&self) -> bool {
        #[cfg(unix)]
        {
            self.connection.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Speak over the session, reconnecting once when a reused connection
    /// turns out to be dead.
    #[cfg(unix)]
    fn speak_session(
        &mut self,
        utterance: &Utterance,
        notifier: CompletionNotifier,
    ) -> Result<u64, SsipError> {
        let reused = self
            .connection
            .as_ref()
            .is_some_and(SsipConnection::is_alive);
        if !reused {
            self.drop_session();
        }
        match self.try_speak_session(utterance, notifier.clone()) {
            Err(e @ (SsipError::Disconnected | SsipError::Io(_))) if reused => {
                log::debug!("speech-dispatcher session lost ({e}), reconnecting");
                self.drop_session();
                self.try_speak_session(utterance, notifier)
            }
            result => result,
        }
    }

    #[cfg(unix)]
    fn try_speak_session(
        &mut self,
        utterance: &Utterance,
        notifier: CompletionNotifier,
    ) -> Result<u64, SsipError> {
        if self.connection.is_none() {
            let socket = self
                .socket
                .clone()
                .or_else(ssip::default_socket_path)
                .ok_or_else(|| {
                    SsipError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no speech-dispatcher socket address",
                    ))
                })?;
            self.connection = Some(SsipConnection::connect(
                &socket,
                &self.client_name,
                self.timeout,
            )?);
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(SsipError::Disconnected);
        };

        if !utterance.output_module.is_empty() {
            conn.set_output_module(&utterance.output_module)?;
        }
        if !utterance.voice_id.is_empty() {
            conn.set_voice(&utterance.voice_id)?;
        }
        let mapped = utterance.params.to_speechd();
        conn.set_prosody(mapped.rate, mapped.pitch, mapped.volume)?;
        conn.set_listener(Some(notifier));
        conn.speak(&utterance.text)
    }

    fn drop_session(&mut self) {
        #[cfg(unix)]
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        };
    }

    fn speak_cli(&self, utterance: &Utterance) -> Result<PlaybackHandle, SpeechError> {
        let program = resolve_program(BackendKind::SpeechDispatcher, &self.spd_say)?;
        let child = spawn_stage(
            BackendKind::SpeechDispatcher,
            &program,
            &spd_say_args(utterance),
            Stdio::null(),
            Stdio::null(),
        )?;
        log::debug!("spd-say started (pid {})", child.id());

        let mut chain = ProcessChain::new(BackendKind::SpeechDispatcher);
        chain.push("spd-say", child);
        // Killing the client leaves the daemon speaking; flush its queue too.
        chain.set_cancel_command(program, vec!["-C".to_string()]);
        Ok(PlaybackHandle::Process(chain))
    }
}

/// `spd-say --wait [-o MODULE] [-y VOICE] [-r RATE] [-p PITCH] [-i VOLUME] -- TEXT`
///
/// Rate and pitch are left to the daemon when neutral (0), volume when the
/// requested volume is 0.
pub fn spd_say_args(utterance: &Utterance) -> Vec<String> {
    let mapped = utterance.params.to_speechd();
    let mut args = vec!["--wait".to_string()];
    if !utterance.output_module.is_empty() {
        args.extend(["-o".to_string(), utterance.output_module.clone()]);
    }
    if !utterance.voice_id.is_empty() {
        args.extend(["-y".to_string(), utterance.voice_id.clone()]);
    }
    if mapped.rate != 0 {
        args.extend(["-r".to_string(), mapped.rate.to_string()]);
    }
    if mapped.pitch != 0 {
        args.extend(["-p".to_string(), mapped.pitch.to_string()]);
    }
    if utterance.params.volume != 0 {
        args.extend(["-i".to_string(), mapped.volume.to_string()]);
    }
    args.push("--".to_string());
    args.push(utterance.text.clone());
    args
}

impl SpeechAdapter for SpeechdAdapter {
    fn start(
        &mut self,
        utterance: &Utterance,
        notifier: CompletionNotifier,
    ) -> Result<PlaybackHandle, SpeechError> {
        #[cfg(unix)]
        if self.prefer_session {
            match self.speak_session(utterance, notifier) {
                Ok(msg_id) => {
                    log::debug!("speech-dispatcher queued message {msg_id}");
                    return Ok(PlaybackHandle::Session { msg_id });
                }
                Err(e) => {
                    log::warn!("{}; using spd-say", SpeechError::from(e));
                    self.drop_session();
                }
            }
        }
        #[cfg(not(unix))]
        let _ = notifier;

        self.speak_cli(utterance)
    }

    fn cancel(&mut self, handle: PlaybackHandle, grace: Duration) {
        match handle {
            PlaybackHandle::Process(mut chain) => chain.terminate(grace),
            PlaybackHandle::Session { msg_id } => {
                log::debug!("Cancelling speech-dispatcher message {msg_id}");
                #[cfg(unix)]
                if let Some(conn) = self.connection.as_mut() {
                    if let Err(e) = conn.cancel() {
                        log::warn!("CANCEL failed ({e}), dropping session");
                        self.drop_session();
                    }
                };
            }
        }
    }

    fn shutdown(&mut self) {
        self.drop_session();
    }
}
