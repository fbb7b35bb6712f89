//! Command executor: runs an external program with a time budget and captures its output.
//!
//! The collector uses it for `ps`/`df`, the process-control endpoints for `kill`.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ExecError;

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program args...` and returns its trimmed stdout.
    ///
    /// Spawn failure, a non-zero exit status and exceeding `timeout` are all errors;
    /// on timeout the child is killed.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> Result<String, ExecError>;
}

/// Runs programs on the local host via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String, ExecError> {
        debug!(program, ?args, "executing");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(program, ?timeout, "command timed out");
                return Err(ExecError::Timeout {
                    program: program.to_string(),
                    after: timeout,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ExecError::Failed {
                program: program.to_string(),
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!(program, %stderr, "command wrote to stderr");
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
