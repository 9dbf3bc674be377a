//! Owned OS processes: spawning, liveness polling and bounded shutdown.
//!
//! Only processes recorded in a [`ProcessChain`] are ever signalled; nothing
//! here scans the system process table.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use super::BackendKind;
use crate::SpeechError;

const WAIT_STEP: Duration = Duration::from_millis(20);

/// Grace given to upstream stages once the terminal stage has exited.
const UPSTREAM_GRACE: Duration = Duration::from_millis(500);

/// Resolve `program` on `PATH` (or check an absolute path is executable).
pub fn resolve_program(backend: BackendKind, program: &Path) -> Result<PathBuf, SpeechError> {
    which::which(program).map_err(|e| {
        SpeechError::unavailable(backend, format!("`{}` not found: {e}", program.display()))
    })
}

/// Spawn one stage with stderr discarded.
pub(crate) fn spawn_stage(
    backend: BackendKind,
    program: &Path,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child, SpeechError> {
    log::debug!("Spawning {} {:?}", program.display(), args);
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| SpeechError::from_spawn(backend, &program.display().to_string(), e))
}

#[derive(Debug)]
struct Stage {
    label: String,
    child: Child,
}

/// A command run after the chain is cancelled (e.g. flushing a daemon queue).
#[derive(Debug, Clone)]
struct CancelCommand {
    program: PathBuf,
    args: Vec<String>,
}

/// One utterance's processes, ordered from the first stage to the terminal one.
///
/// Each stage's stdout feeds the next stage's stdin. The utterance is done
/// when the terminal stage exits. Dropping a chain kills whatever is still
/// running, so a partially started pipeline never leaks.
#[derive(Debug)]
pub struct ProcessChain {
    backend: BackendKind,
    stages: Vec<Stage>,
    cancel_command: Option<CancelCommand>,
}

impl ProcessChain {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            stages: Vec::new(),
            cancel_command: None,
        }
    }

    pub fn push(&mut self, label: impl Into<String>, child: Child) {
        self.stages.push(Stage {
            label: label.into(),
            child,
        });
    }

    /// Run `program args` (bounded) after this chain is cancelled.
    pub fn set_cancel_command(&mut self, program: PathBuf, args: Vec<String>) {
        self.cancel_command = Some(CancelCommand { program, args });
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.child.id()).collect()
    }

    /// Check whether the terminal stage has exited.
    ///
    /// Once it has, the upstream stages are reaped (and killed if they linger)
    /// and the terminal exit status is returned. An empty chain counts as
    /// finished.
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        let Some(terminal) = self.stages.last_mut() else {
            return Ok(Some(ExitStatus::default()));
        };
        match terminal.child.try_wait()? {
            None => Ok(None),
            Some(status) => {
                self.release(UPSTREAM_GRACE);
                Ok(Some(status))
            }
        }
    }

    /// Stop every stage: SIGTERM all of them, wait up to `grace`, then SIGKILL
    /// the survivors. Runs the cancel command afterwards, if any.
    pub fn terminate(&mut self, grace: Duration) {
        log::debug!("Stopping {} ({} stages)", self.backend, self.stages.len());
        self.release(grace);
        if let Some(cancel) = self.cancel_command.take() {
            let args: Vec<&str> = cancel.args.iter().map(String::as_str).collect();
            if let Err(e) = run_probe(&cancel.program, &args, grace) {
                log::debug!("{} cancel command failed: {e}", cancel.program.display());
            }
        }
    }

    fn release(&mut self, grace: Duration) {
        let mut running = Vec::new();
        for mut stage in self.stages.drain(..) {
            match stage.child.try_wait() {
                Ok(Some(status)) => log_exit(&stage.label, status),
                Ok(None) | Err(_) => running.push(stage),
            }
        }

        for stage in &mut running {
            request_exit(&mut stage.child);
        }

        let deadline = Instant::now() + grace;
        while !running.is_empty() && Instant::now() < deadline {
            running.retain_mut(|stage| match stage.child.try_wait() {
                Ok(Some(status)) => {
                    log_exit(&stage.label, status);
                    false
                }
                Ok(None) | Err(_) => true,
            });
            if !running.is_empty() {
                thread::sleep(WAIT_STEP);
            }
        }

        for mut stage in running {
            log::warn!(
                "{} (pid {}) still running after {:?}, killing",
                stage.label,
                stage.child.id(),
                grace
            );
            let _ = stage.child.kill();
            let _ = stage.child.wait();
        }
    }
}

impl Drop for ProcessChain {
    fn drop(&mut self) {
        for stage in &mut self.stages {
            let _ = stage.child.kill();
            let _ = stage.child.wait();
        }
    }
}

fn log_exit(label: &str, status: ExitStatus) {
    if status.success() {
        log::debug!("{label} exited cleanly");
    } else {
        log::debug!("{label} exited with {status}");
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
        if e != nix::errno::Errno::ESRCH {
            log::debug!("SIGTERM to pid {pid} failed: {e}");
        }
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

/// Captured result of a short-lived probe command.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub status: ExitStatus,
    pub stdout: String,
}

impl ProbeOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run a command to completion, capturing stdout, killing it after `timeout`.
pub fn run_probe(program: &Path, args: &[&str], timeout: Duration) -> io::Result<ProbeOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("probe stdout was not captured"))?;
    // Drain concurrently so a chatty probe cannot fill the pipe and stall.
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(WAIT_STEP);
    };

    let stdout = reader.join().unwrap_or_default();
    match status {
        Some(status) => Ok(ProbeOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
        }),
        None => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {timeout:?}", program.display()),
        )),
    }
}
