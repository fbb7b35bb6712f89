//! Where raw telemetry text comes from.
//!
//! The collector never touches the OS directly; it asks a [`HostSource`] for the
//! raw text of each source and runs the parsers on it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExecError;
use crate::exec::CommandRunner;

#[async_trait]
pub trait HostSource: Send + Sync {
    async fn meminfo(&self) -> Result<String, ExecError>;
    async fn cpu_stat(&self) -> Result<String, ExecError>;
    async fn uptime(&self) -> Result<String, ExecError>;
    async fn os_release(&self) -> Result<String, ExecError>;
    /// `ps aux` style table, busiest first.
    async fn process_table(&self) -> Result<String, ExecError>;
    /// `df -B1 --output=source,size,used,avail,pcent,target` style table.
    async fn disk_usage(&self) -> Result<String, ExecError>;
}

/// Reads `/proc` and `/etc` directly and shells out to `ps` and `df`.
pub struct LinuxHost {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl LinuxHost {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

async fn read(path: &str) -> Result<String, ExecError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

#[async_trait]
impl HostSource for LinuxHost {
    async fn meminfo(&self) -> Result<String, ExecError> {
        read("/proc/meminfo").await
    }

    async fn cpu_stat(&self) -> Result<String, ExecError> {
        read("/proc/stat").await
    }

    async fn uptime(&self) -> Result<String, ExecError> {
        read("/proc/uptime").await
    }

    async fn os_release(&self) -> Result<String, ExecError> {
        match read("/etc/os-release").await {
            Ok(s) => Ok(s),
            // Some minimal images only ship the /usr/lib copy
            Err(_) => read("/usr/lib/os-release").await,
        }
    }

    async fn process_table(&self) -> Result<String, ExecError> {
        self.runner
            .run("ps", &["aux", "--sort=-%cpu"], self.timeout)
            .await
    }

    async fn disk_usage(&self) -> Result<String, ExecError> {
        self.runner
            .run(
                "df",
                &[
                    "-B1",
                    "--output=source,size,used,avail,pcent,target",
                    "-x",
                    "tmpfs",
                    "-x",
                    "devtmpfs",
                ],
                self.timeout,
            )
            .await
    }
}
