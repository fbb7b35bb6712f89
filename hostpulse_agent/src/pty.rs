//! Pseudo-terminal processes.
//!
//! [`PtySpawner`] is the seam between the session manager and the OS: the
//! native spawner runs a real shell through `portable-pty`, tests plug in fakes.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::TerminalConfig;
use crate::error::SessionError;

const OUTPUT_BUFFER: usize = 256;

/// A running process attached to a pseudo-terminal.
pub trait PtyProcess: Send + Sync {
    /// Queues bytes for the process's stdin. Never drops input; fails only
    /// once the process can no longer accept it.
    fn write(&self, data: &[u8]) -> io::Result<()>;
    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError>;
    fn kill(&self) -> io::Result<()>;
}

/// A freshly spawned process and its two outbound streams.
pub struct SpawnedPty {
    pub process: Box<dyn PtyProcess>,
    /// Raw terminal output. Closes when the terminal's reader hits EOF.
    pub output: mpsc::Receiver<Vec<u8>>,
    /// Exit code, sent once when the process exits.
    pub exit: oneshot::Receiver<i32>,
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, cols: u16, rows: u16) -> Result<SpawnedPty, SessionError>;
}

fn pty_err(e: impl std::fmt::Display) -> SessionError {
    SessionError::Pty(e.to_string())
}

/// Spawns the configured shell on a native pseudo-terminal.
#[derive(Debug, Clone)]
pub struct NativePtySpawner {
    shell: String,
    args: Vec<String>,
    term: String,
    cwd: Option<PathBuf>,
}

impl NativePtySpawner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            args: Vec::new(),
            term: "xterm-color".into(),
            cwd: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    pub fn from_config(cfg: &TerminalConfig) -> Self {
        Self::new(cfg.shell.clone()).term(cfg.term.clone())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, cols: u16, rows: u16) -> Result<SpawnedPty, SessionError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.args(&self.args);
        cmd.env("TERM", &self.term);
        if let Some(dir) = &self.cwd {
            cmd.cwd(dir);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn {
                shell: self.shell.clone(),
                message: e.to_string(),
            })?;
        // the child holds its own copy; ours would keep the reader from seeing EOF
        drop(pair.slave);
        let killer = child.clone_killer();
        debug!(shell = %self.shell, pid = ?child.process_id(), cols, rows, "spawned pty shell");

        let mut reader = pair.master.try_clone_reader().map_err(pty_err)?;
        let (output_tx, output) = mpsc::channel::<Vec<u8>>(OUTPUT_BUFFER);
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 8192];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "pty read ended");
                        break;
                    }
                }
            }
        });

        let writer = Arc::new(Mutex::new(pair.master.take_writer().map_err(pty_err)?));
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(bytes) = input_rx.recv().await {
                let writer = writer.clone();
                let res = tokio::task::spawn_blocking(move || -> io::Result<()> {
                    let mut w = writer
                        .lock()
                        .map_err(|_| io::Error::new(ErrorKind::Other, "pty writer poisoned"))?;
                    w.write_all(&bytes)?;
                    w.flush()
                })
                .await;
                match res {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "pty write failed");
                        break;
                    }
                    Err(_) => break,
                }
            }
        });

        let (exit_tx, exit) = oneshot::channel::<i32>();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => status.exit_code() as i32,
                Err(e) => {
                    warn!(error = %e, "waiting on pty child failed");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedPty {
            process: Box::new(NativePty {
                master: Mutex::new(pair.master),
                killer: Mutex::new(killer),
                input: input_tx,
            }),
            output,
            exit,
        })
    }
}

struct NativePty {
    master: Mutex<Box<dyn MasterPty + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    input: mpsc::UnboundedSender<Vec<u8>>,
}

impl PtyProcess for NativePty {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "pty input closed"))
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        let master = self
            .master
            .lock()
            .map_err(|_| SessionError::Pty("pty master poisoned".into()))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_err)
    }

    fn kill(&self) -> io::Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| io::Error::new(ErrorKind::Other, "pty killer poisoned"))?;
        killer.kill()
    }
}
