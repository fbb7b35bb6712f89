//! Parsers for raw OS command output and `/proc` files.
//!
//! These are pure functions that turn text into structured records. None of
//! them fail: malformed lines are skipped or contribute zeroes, so a partially
//! garbled input still yields whatever could be read.

use crate::types::{PartitionRecord, ProcessRecord, ProcessStatus};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const MAX_PROCESS_NAME: usize = 50;

/// Memory figures from `/proc/meminfo`, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: u64,
    pub used: u64,
}

/// Parses `/proc/meminfo` (`Key:   value kB` lines).
///
/// Kernels older than 3.14 have no `MemAvailable`; it is then estimated as
/// `MemFree + Buffers + Cached`.
pub fn parse_meminfo(content: &str) -> MemInfo {
    let mut total = 0u64;
    let mut free = 0u64;
    let mut available: Option<u64> = None;
    let mut buffers = 0u64;
    let mut cached = 0u64;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let bytes = value.parse::<u64>().unwrap_or(0).saturating_mul(1024);
        match key.trim_end_matches(':') {
            "MemTotal" => total = bytes,
            "MemFree" => free = bytes,
            "MemAvailable" => available = Some(bytes),
            "Buffers" => buffers = bytes,
            "Cached" => cached = bytes,
            _ => {}
        }
    }

    let available =
        available.unwrap_or_else(|| free.saturating_add(buffers).saturating_add(cached));
    MemInfo {
        total,
        free,
        available,
        used: total.saturating_sub(available),
    }
}

/// Aggregate jiffy counters from the `cpu ` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    /// Sum of every time bucket.
    pub total: u64,
    /// idle + iowait.
    pub idle: u64,
}

impl CpuTimes {
    /// Busy percentage between `prev` and `self`, rounded to two decimals.
    /// Returns 0 when no time elapsed or the counters went backwards.
    pub fn utilization_since(&self, prev: &CpuTimes) -> f64 {
        let total = self.total.saturating_sub(prev.total);
        if total == 0 {
            return 0.0;
        }
        let idle = self.idle.saturating_sub(prev.idle).min(total);
        let pct = 100.0 * (1.0 - idle as f64 / total as f64);
        (pct * 100.0).round() / 100.0
    }
}

/// Parses the aggregate CPU line of `/proc/stat`.
///
/// Format: `cpu  user nice system idle iowait irq softirq steal ...`
pub fn parse_cpu_times(content: &str) -> CpuTimes {
    let Some(line) = content.lines().find(|l| l.starts_with("cpu ")) else {
        return CpuTimes::default();
    };
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().unwrap_or(0))
        .collect();
    let at = |i: usize| values.get(i).copied().unwrap_or(0);
    CpuTimes {
        total: values.iter().fold(0u64, |acc, v| acc.saturating_add(*v)),
        idle: at(3).saturating_add(at(4)),
    }
}

/// Filesystem usage assembled from `df` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskUsage {
    // GB, one decimal
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub partitions: Vec<PartitionRecord>,
}

fn gb_label(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / BYTES_PER_GB)
}

fn gb_rounded(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GB * 10.0).round() / 10.0
}

/// Parses `df -B1 --output=source,size,used,avail,pcent,target`.
///
/// The header line is skipped. Everything after the fifth column is the
/// mount point, so targets containing spaces survive.
pub fn parse_df(content: &str) -> DiskUsage {
    let mut total_bytes = 0u64;
    let mut used_bytes = 0u64;
    let mut partitions = Vec::new();

    for line in content.trim().lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            continue;
        }
        let size = parts[1].parse::<u64>().unwrap_or(0);
        let used = parts[2].parse::<u64>().unwrap_or(0);
        let avail = parts[3]
            .parse::<u64>()
            .unwrap_or_else(|_| size.saturating_sub(used));
        let use_percent = parts[4].trim_end_matches('%').parse::<u32>().unwrap_or(0);

        total_bytes = total_bytes.saturating_add(size);
        used_bytes = used_bytes.saturating_add(used);

        partitions.push(PartitionRecord {
            name: parts[0].to_string(),
            mount_point: parts[5..].join(" "),
            size: gb_label(size),
            used: gb_label(used),
            avail: gb_label(avail),
            use_percent,
        });
    }

    DiskUsage {
        total: gb_rounded(total_bytes),
        used: gb_rounded(used_bytes),
        free: gb_rounded(total_bytes.saturating_sub(used_bytes)),
        partitions,
    }
}

/// Parses `ps aux` output.
///
/// Columns: `USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND...`.
/// Rows with fewer than 11 columns or a non-numeric pid are dropped.
pub fn parse_ps(content: &str) -> Vec<ProcessRecord> {
    content
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 11 {
                return None;
            }
            let pid = parts[1].parse::<u32>().ok()?;
            let rss_kb = parts[5].parse::<u64>().unwrap_or(0);
            let command = parts[10..].join(" ");
            Some(ProcessRecord {
                pid,
                name: command.chars().take(MAX_PROCESS_NAME).collect(),
                user: parts[0].to_string(),
                status: ProcessStatus::from_stat(parts[7]),
                cpu: parts[2].parse().unwrap_or(0.0),
                memory: rss_kb as f64 / 1024.0,
            })
        })
        .collect()
}

/// Whole seconds from the first field of `/proc/uptime`.
pub fn parse_uptime(content: &str) -> u64 {
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub name: String,
    pub version: String,
    pub pretty_name: String,
}

impl Default for OsRelease {
    fn default() -> Self {
        Self {
            name: "Unknown".into(),
            version: "Unknown".into(),
            pretty_name: "Unknown".into(),
        }
    }
}

/// Parses `/etc/os-release` for `NAME`, `VERSION_ID` and `PRETTY_NAME`.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut out = OsRelease::default();
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if value.is_empty() {
            continue;
        }
        match key {
            "NAME" => out.name = value.to_string(),
            "VERSION_ID" => out.version = value.to_string(),
            "PRETTY_NAME" => out.pretty_name = value.to_string(),
            _ => {}
        }
    }
    out
}
