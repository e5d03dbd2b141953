//! Counter-utility subprocess supervision
//!
//! Each adapter owns exactly one external process. A reader thread drains
//! the utility's output into a channel so per-interval pulls stay bounded
//! even when the utility wedges or stops reporting.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::source::SourceError;

/// Builds command invocations for counter utilities, optionally routed
/// through `sudo -n` for tools that read privileged hardware counters.
///
/// Handed to adapter constructors as a capability. The workload process is
/// never spawned through it.
#[derive(Debug, Clone)]
pub struct Launcher {
    elevate: bool,
}

impl Launcher {
    pub fn new(elevate: bool) -> Self {
        Self { elevate }
    }

    /// Build a command for `program`, prefixed with `sudo -n` when elevated.
    pub fn command(&self, program: &str) -> Command {
        if self.elevate {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(program);
            cmd
        } else {
            Command::new(program)
        }
    }
}

/// Which of the child's streams carries the counter data.
///
/// perf prints interval reports to stderr; most one-shot tools use stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A spawned counter utility plus the thread draining its output.
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    lines: Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl AgentProcess {
    /// Spawn `command` and start draining `stream` line by line.
    pub fn spawn(mut command: Command, stream: OutputStream) -> Result<Self, SourceError> {
        match stream {
            OutputStream::Stdout => {
                command.stdout(Stdio::piped()).stderr(Stdio::null());
            }
            OutputStream::Stderr => {
                command.stderr(Stdio::piped()).stdout(Stdio::null());
            }
        }
        command.stdin(Stdio::null());

        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command.spawn().map_err(|source| SourceError::Spawn {
            command: program,
            source,
        })?;

        let pipe: Box<dyn Read + Send> = match stream {
            OutputStream::Stdout => match child.stdout.take() {
                Some(pipe) => Box::new(pipe),
                None => {
                    let _ = child.kill();
                    return Err(SourceError::Unavailable);
                }
            },
            OutputStream::Stderr => match child.stderr.take() {
                Some(pipe) => Box::new(pipe),
                None => {
                    let _ = child.kill();
                    return Err(SourceError::Unavailable);
                }
            },
        };

        let (tx, rx) = unbounded();
        let reader = std::thread::spawn(move || {
            for line in BufReader::new(pipe).lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            // sender drops here; receivers see Disconnected after the
            // buffered lines are drained
        });

        Ok(Self {
            child,
            lines: rx,
            reader: Some(reader),
        })
    }

    /// Next output line, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the wait timed out. `Err(Unavailable)` means the
    /// stream closed: the utility exited or lost its pipe.
    pub fn next_line(&self, timeout: Duration) -> Result<Option<String>, SourceError> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Unavailable),
        }
    }

    /// Signal the utility to stop, escalating to SIGKILL after `grace`.
    pub fn stop(&mut self, grace: Duration) {
        let pid = Pid::from_raw(self.child.id() as i32);
        let _ = kill(pid, Signal::SIGINT);

        let deadline = Instant::now() + grace;
        let mut exited = false;
        while Instant::now() < deadline {
            match self.child.try_wait() {
                Ok(Some(_)) => {
                    exited = true;
                    break;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
        }
        if !exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }

        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
