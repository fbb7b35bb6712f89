//! Data types sent to viewers over WebSocket and REST.
//! Keep this module minimal and stable; it defines the wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stats {
    /// Utilization over the last sample window, 0..=100.
    pub cpu: f64,
    pub ram_total: u64,
    pub ram_used: u64,
    pub ram_free: u64,
    pub uptime: u64,
    pub os_name: String,
    pub os_version: String,
    pub os_pretty_name: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Stats {
    /// Degraded snapshot published when the host could not be read.
    pub fn unavailable(error: impl Into<String>, timestamp: i64) -> Self {
        Self {
            cpu: 0.0,
            ram_total: 0,
            ram_used: 0,
            ram_free: 0,
            uptime: 0,
            os_name: "Error".into(),
            os_version: "N/A".into(),
            os_pretty_name: "System monitoring error".into(),
            timestamp,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    Unknown,
}

impl ProcessStatus {
    /// Maps a `ps` STAT column to a status; only the first character matters.
    pub fn from_stat(stat: &str) -> Self {
        match stat.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('R') => Self::Running,
            Some('S' | 'D' | 'I') => Self::Sleeping,
            Some('T') => Self::Stopped,
            Some('Z') => Self::Zombie,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub status: ProcessStatus,
    pub cpu: f32,
    /// Resident set size in MB.
    pub memory: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProcessList {
    pub processes: Vec<ProcessRecord>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRecord {
    /// Source device.
    pub name: String,
    pub mount_point: String,
    pub size: String,
    pub used: String,
    pub avail: String,
    pub use_percent: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorageReport {
    // GB, one decimal
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub partitions: Vec<PartitionRecord>,
    pub timestamp: i64,
}

/// One published telemetry value. Serialized as `{"event": .., "data": ..}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TelemetrySnapshot {
    Stats(Stats),
    Processes(ProcessList),
    Storage(StorageReport),
}

impl TelemetrySnapshot {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stats(_) => "stats",
            Self::Processes(_) => "processes",
            Self::Storage(_) => "storage",
        }
    }
}

/// Control messages a viewer sends on the terminal channel (text frames).
/// Raw keystrokes may also arrive as binary frames.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TerminalRequest {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
}

/// Control messages the agent sends on the terminal channel (text frames).
/// Terminal output itself travels in binary frames.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TerminalEvent {
    Error { message: String },
    Exit { code: i32 },
}
