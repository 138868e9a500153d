//! Process backends for terminal sessions.
//!
//! The registry never touches a child process directly. It talks to a
//! [`SessionProcess`] handle (write, resize, kill) and consumes
//! [`ProcessEvent`]s (output, exit) from a channel. Session kind dispatch
//! is resolved at spawn time: `system` runs the configured login shell,
//! `claude` runs the configured AI CLI — both through the same PTY
//! mechanics.
//!
//! [`PtyFactory`] is the production [`ProcessFactory`]; tests inject a
//! channel-backed fake.

pub mod pty;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::os::unix::process::ExitStatusExt;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::ShellConfig;
use crate::registry::session::SessionKind;

/// Events flowing from a session's process back to the registry.
#[derive(Debug)]
pub enum ProcessEvent {
    /// A chunk of PTY output (lossy UTF-8).
    Data(String),
    /// The process exited. Terminal — the session is never restarted.
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

/// Capability surface the registry needs from a backing process.
pub trait SessionProcess: Send + Sync {
    /// Queue input for the process. Fails when the stdin channel is full
    /// or the writer task is gone.
    fn write(&self, data: &str) -> Result<(), String>;
    /// Resize the terminal.
    fn resize(&self, rows: u16, cols: u16) -> Result<(), String>;
    /// SIGKILL the process group and stop the I/O tasks. Fire-and-forget:
    /// the registry does not wait for the process to die.
    fn kill(&self);
    /// OS pid of the child (0 for fakes).
    fn pid(&self) -> u32;
}

/// A freshly spawned process: its control handle plus the event stream.
pub struct SpawnedProcess {
    pub handle: Box<dyn SessionProcess>,
    pub events: mpsc::Receiver<ProcessEvent>,
}

/// Spawns backing processes for new sessions.
pub trait ProcessFactory: Send + Sync + 'static {
    fn spawn(
        &self,
        session_id: &str,
        kind: SessionKind,
        working_dir: &str,
    ) -> Result<SpawnedProcess, String>;
}

/// Production factory: real PTYs, commands resolved from [`ShellConfig`].
pub struct PtyFactory {
    shell: ShellConfig,
}

impl PtyFactory {
    pub fn new(shell: ShellConfig) -> Self {
        Self { shell }
    }

    /// Resolve the command line for a session kind.
    ///
    /// `claude_command` may carry arguments (`"claude --resume"`); the
    /// system shell is always started as a login shell so rc files are
    /// sourced, matching standard terminal emulators.
    fn command_for(&self, kind: SessionKind) -> (String, Vec<String>) {
        match kind {
            SessionKind::System => (self.shell.system_shell.clone(), vec!["-l".to_string()]),
            SessionKind::Claude => {
                let mut parts = self.shell.claude_command.split_whitespace();
                let program = parts
                    .next()
                    .unwrap_or(&self.shell.claude_command)
                    .to_string();
                (program, parts.map(ToString::to_string).collect())
            }
        }
    }
}

impl ProcessFactory for PtyFactory {
    fn spawn(
        &self,
        session_id: &str,
        kind: SessionKind,
        working_dir: &str,
    ) -> Result<SpawnedProcess, String> {
        let pty_pair = pty::allocate_pty(self.shell.rows, self.shell.cols)
            .map_err(|e| format!("Failed to allocate PTY: {e}"))?;

        let (program, args) = self.command_for(kind);

        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());

        let child = pty::spawn_on_pty(&pty_pair, &program, &args, working_dir, &env)
            .map_err(|e| format!("Failed to spawn {program}: {e}"))?;

        PtyProcess::start(session_id.to_string(), child, pty_pair.master)
    }
}

/// A PTY-backed session process.
///
/// Three background tasks route I/O: a stdin writer (mpsc → PTY master), an
/// output reader (PTY master → [`ProcessEvent::Data`]), and an exit watcher
/// (`child.wait()` → [`ProcessEvent::Exit`]). Killing the process aborts
/// all three.
struct PtyProcess {
    pid: u32,
    /// Process group id — equals pid since the child is a session leader.
    pgid: u32,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    /// Kept alive for resize; the I/O tasks use dup'd fds.
    pty_master: OwnedFd,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl PtyProcess {
    fn start(
        session_id: String,
        mut child: Child,
        pty_master: OwnedFd,
    ) -> Result<SpawnedProcess, String> {
        let pid = child.id().unwrap_or(0);

        let master_raw: RawFd = pty_master.as_raw_fd();

        // Dup the master fd: one for writing, one for reading, the original
        // kept for resize.
        let writer_fd: RawFd = unsafe { libc::dup(master_raw) };
        if writer_fd < 0 {
            return Err(format!(
                "dup() failed for PTY master writer: {}",
                std::io::Error::last_os_error()
            ));
        }
        let reader_fd: RawFd = unsafe { libc::dup(master_raw) };
        if reader_fd < 0 {
            unsafe {
                libc::close(writer_fd);
            }
            return Err(format!(
                "dup() failed for PTY master reader: {}",
                std::io::Error::last_os_error()
            ));
        }

        // SAFETY: we own these file descriptors via dup
        let master_write =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
        let master_read =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

        let (events_tx, events_rx) = mpsc::channel::<ProcessEvent>(256);

        // stdin writer task: mpsc → PTY master (write side)
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let stdin_task = tokio::spawn(async move {
            let mut writer = master_write;
            while let Some(data) = stdin_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Output reader task: PTY master (read side) → event channel
        let sid_out = session_id.clone();
        let out_tx = events_tx.clone();
        let output_task = tokio::spawn(async move {
            let mut reader = master_read;
            let mut tmp = [0u8; 4096];
            loop {
                match reader.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&tmp[..n]).into_owned();
                        if out_tx.send(ProcessEvent::Data(data)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("Session {sid_out} PTY output closed");
        });

        // Exit watcher task
        let sid_exit = session_id;
        let exit_task = tokio::spawn(async move {
            let event = match child.wait().await {
                Ok(status) => {
                    info!(
                        "Session {sid_exit} exited (code={:?}, signal={:?})",
                        status.code(),
                        status.signal()
                    );
                    ProcessEvent::Exit {
                        code: status.code(),
                        signal: status.signal(),
                    }
                }
                Err(e) => {
                    error!("Session {sid_exit} wait error: {e}");
                    ProcessEvent::Exit {
                        code: Some(-1),
                        signal: None,
                    }
                }
            };
            let _ = events_tx.send(event).await;
        });

        let handle = PtyProcess {
            pid,
            pgid: pid,
            stdin_tx,
            pty_master,
            tasks: vec![stdin_task, output_task, exit_task],
        };

        Ok(SpawnedProcess {
            handle: Box::new(handle),
            events: events_rx,
        })
    }
}

impl SessionProcess for PtyProcess {
    fn write(&self, data: &str) -> Result<(), String> {
        self.stdin_tx
            .try_send(data.as_bytes().to_vec())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => "Session stdin backlog full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "Session stdin closed".to_string(),
            })
    }

    fn resize(&self, rows: u16, cols: u16) -> Result<(), String> {
        pty::resize_pty(&self.pty_master, rows, cols).map_err(|e| e.to_string())
    }

    fn kill(&self) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pgid as i32;
        if pgid > 0 {
            // kill(-pgid, SIGKILL) reaches the whole process tree
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
        for task in &self.tasks {
            task.abort();
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}
