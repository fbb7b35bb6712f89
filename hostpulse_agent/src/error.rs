//! Error types shared by the command executor and the terminal session manager.

use std::time::Duration;
use thiserror::Error;

/// Failure while running an external program.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be started at all.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran longer than its budget and was killed.
    #[error("`{program}` timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    /// The program exited unsuccessfully.
    #[error("`{program}` failed with exit code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while creating or driving a terminal session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open pseudo-terminal: {0}")]
    Open(String),

    #[error("failed to start `{shell}`: {message}")]
    Spawn { shell: String, message: String },

    #[error("pty error: {0}")]
    Pty(String),
}
