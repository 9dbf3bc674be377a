//! Minimal SSIP client for a persistent speech-dispatcher session.
//!
//! SSIP is a CRLF line protocol over a Unix socket. A reply is zero or more
//! `NNN-data` lines followed by a final `NNN message` line; `2xx` means
//! success. Lines with `7xx` codes are asynchronous events:
//!
//! ```text
//! 702-<msg_id>
//! 702-<client_id>
//! 702 END
//! ```
//!
//! A reader thread owns the receiving half of the socket. Replies are handed
//! to the command side over a channel; END/CANCELED events are handed to the
//! registered [`CompletionNotifier`]. The reader never closes the connection
//! itself; [`SsipConnection::close`] runs on the owner's thread and joins it.

use std::io::{self, BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engines::{CompletionNotifier, SessionOutcome};

const EVENT_BEGIN: u16 = 701;
const EVENT_END: u16 = 702;
const EVENT_CANCELED: u16 = 703;

#[derive(thiserror::Error, Debug)]
pub enum SsipError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no reply from speech-dispatcher within {0:?}")]
    Timeout(Duration),
    #[error("speech-dispatcher rejected `{command}`: {code} {message}")]
    Rejected {
        command: String,
        code: u16,
        message: String,
    },
    #[error("connection to speech-dispatcher closed")]
    Disconnected,
    #[error("malformed SSIP line: {0:?}")]
    Malformed(String),
}

/// A complete reply to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Payload of the `NNN-` continuation lines.
    pub data: Vec<String>,
    pub message: String,
}

impl Reply {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Line<'a> {
    code: u16,
    last: bool,
    text: &'a str,
}

fn parse_line(line: &str) -> Result<Line<'_>, SsipError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let malformed = || SsipError::Malformed(line.to_string());
    if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
        return Err(malformed());
    }
    let code = line[..3].parse::<u16>().map_err(|_| malformed())?;
    let last = match &line[3..4] {
        " " => true,
        "-" => false,
        _ => return Err(malformed()),
    };
    Ok(Line {
        code,
        last,
        text: &line[4..],
    })
}

/// Encode a message body: one CRLF line per text line, a leading `.` doubled,
/// terminated by a lone `.` line.
fn escape_body(text: &str) -> String {
    let mut body = String::with_capacity(text.len() + 8);
    for line in text.lines() {
        if line.starts_with('.') {
            body.push('.');
        }
        body.push_str(line);
        body.push_str("\r\n");
    }
    body.push_str(".\r\n");
    body
}

/// CLIENT_NAME components must not contain separators.
fn name_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Where the speech-dispatcher daemon listens.
///
/// Honours `SPEECHD_ADDRESS=unix_socket:<path>`; otherwise uses the runtime
/// directory, then the cache directory. Returns `None` when the address is a
/// non-Unix transport.
pub fn default_socket_path() -> Option<PathBuf> {
    if let Ok(address) = std::env::var("SPEECHD_ADDRESS") {
        return address.strip_prefix("unix_socket:").map(PathBuf::from);
    }
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("speech-dispatcher").join("speechd.sock"))
}

type Listener = Arc<Mutex<Option<CompletionNotifier>>>;

/// An open SSIP session.
pub struct SsipConnection {
    stream: UnixStream,
    replies: Receiver<Reply>,
    listener: Listener,
    reader: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl SsipConnection {
    /// Connect, identify as `client_name` and enable END/CANCEL events.
    pub fn connect(path: &Path, client_name: &str, timeout: Duration) -> Result<Self, SsipError> {
        let stream = UnixStream::connect(path)?;
        stream.set_write_timeout(Some(timeout))?;
        let read_half = stream.try_clone()?;

        let (reply_tx, replies) = mpsc::channel();
        let listener: Listener = Arc::new(Mutex::new(None));
        let reader = thread::Builder::new()
            .name("ssip-reader".into())
            .spawn({
                let listener = Arc::clone(&listener);
                move || read_loop(read_half, reply_tx, listener)
            })?;

        let mut conn = Self {
            stream,
            replies,
            listener,
            reader: Some(reader),
            timeout,
        };

        let user = std::env::var("USER").unwrap_or_else(|_| "user".to_string());
        conn.command(&format!(
            "SET self CLIENT_NAME {}:{}:main",
            name_component(&user),
            name_component(client_name)
        ))?;
        conn.command("SET self NOTIFICATION END on")?;
        conn.command("SET self NOTIFICATION CANCEL on")?;
        log::debug!("SSIP session open on {}", path.display());
        Ok(conn)
    }

    /// Send one command and wait for a successful reply.
    pub fn command(&mut self, command: &str) -> Result<Reply, SsipError> {
        self.send_line(command)?;
        let reply = self.await_reply()?;
        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(SsipError::Rejected {
                command: command.to_string(),
                code: reply.code,
                message: reply.message,
            })
        }
    }

    pub fn set_output_module(&mut self, module: &str) -> Result<(), SsipError> {
        self.command(&format!("SET self OUTPUT_MODULE {module}"))
            .map(drop)
    }

    pub fn set_voice(&mut self, voice: &str) -> Result<(), SsipError> {
        self.command(&format!("SET self SYNTHESIS_VOICE {voice}"))
            .map(drop)
    }

    pub fn set_prosody(&mut self, rate: i32, pitch: i32, volume: i32) -> Result<(), SsipError> {
        self.command(&format!("SET self RATE {rate}"))?;
        self.command(&format!("SET self PITCH {pitch}"))?;
        self.command(&format!("SET self VOLUME {volume}"))?;
        Ok(())
    }

    /// Route END/CANCELED events to `notifier` (or drop them with `None`).
    pub fn set_listener(&self, notifier: Option<CompletionNotifier>) {
        if let Ok(mut slot) = self.listener.lock() {
            *slot = notifier;
        }
    }

    /// Queue `text` and return the daemon's message id.
    pub fn speak(&mut self, text: &str) -> Result<u64, SsipError> {
        self.command("SPEAK")?;
        self.stream.write_all(escape_body(text).as_bytes())?;
        let reply = self.await_reply()?;
        if !reply.is_ok() {
            return Err(SsipError::Rejected {
                command: "SPEAK".to_string(),
                code: reply.code,
                message: reply.message,
            });
        }
        reply
            .data
            .first()
            .and_then(|id| id.trim().parse().ok())
            .ok_or_else(|| SsipError::Malformed(format!("{} {}", reply.code, reply.message)))
    }

    /// Cancel whatever this client is speaking.
    pub fn cancel(&mut self) -> Result<(), SsipError> {
        self.command("CANCEL self").map(drop)
    }

    /// Whether the reader thread is still running. It exits once the daemon
    /// closes the socket.
    pub fn is_alive(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }

    /// Detach the listener, say goodbye and join the reader thread.
    pub fn close(&mut self) {
        self.set_listener(None);
        if self.reader.is_none() {
            return;
        }
        let _ = self.send_line("QUIT");
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        log::debug!("SSIP session closed");
    }

    fn send_line(&mut self, line: &str) -> Result<(), SsipError> {
        self.stream.write_all(format!("{line}\r\n").as_bytes())?;
        Ok(())
    }

    fn await_reply(&self) -> Result<Reply, SsipError> {
        match self.replies.recv_timeout(self.timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(SsipError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(SsipError::Disconnected),
        }
    }
}

impl Drop for SsipConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop(stream: UnixStream, replies: Sender<Reply>, listener: Listener) {
    let reader = BufReader::new(stream);
    let mut data = Vec::new();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::debug!("SSIP read failed: {e}");
                break;
            }
        };
        let parsed = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Ignoring {e}");
                continue;
            }
        };
        if !parsed.last {
            data.push(parsed.text.to_string());
            continue;
        }

        let data = std::mem::take(&mut data);
        if (700..800).contains(&parsed.code) {
            dispatch_event(&listener, parsed.code, &data);
        } else if replies
            .send(Reply {
                code: parsed.code,
                data,
                message: parsed.text.to_string(),
            })
            .is_err()
        {
            break;
        }
    }

    // Only reached on EOF or a read error; `close` detaches the listener first.
    if let Some(notifier) = listener.lock().ok().and_then(|slot| slot.clone()) {
        notifier.notify(0, SessionOutcome::Disconnected);
    }
}

fn dispatch_event(listener: &Listener, code: u16, data: &[String]) {
    let outcome = match code {
        EVENT_END => SessionOutcome::Finished,
        EVENT_CANCELED => SessionOutcome::Cancelled,
        EVENT_BEGIN => {
            log::debug!("speech-dispatcher began message {:?}", data.first());
            return;
        }
        _ => return,
    };
    let Some(msg_id) = data.first().and_then(|id| id.trim().parse::<u64>().ok()) else {
        log::warn!("SSIP event {code} without a message id");
        return;
    };
    if let Some(notifier) = listener.lock().ok().and_then(|slot| slot.clone()) {
        notifier.notify(msg_id, outcome);
    }
}
