//! Turns raw host text into the three telemetry payloads.

use chrono::Utc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ExecError;
use crate::host::HostSource;
use crate::parsers::{
    parse_cpu_times, parse_df, parse_meminfo, parse_os_release, parse_ps, parse_uptime, CpuTimes,
    OsRelease,
};
use crate::types::{ProcessList, Stats, StorageReport};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Keeps the previous `/proc/stat` sample so utilization is a delta over the
/// whole tick instead of a fresh short window every time.
#[derive(Debug, Default)]
pub struct CpuTracker {
    last: Mutex<Option<(CpuTimes, Instant)>>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `/proc/stat` and returns utilization since the previous call.
    /// Without a previous sample, or one older than `max_age`, takes two reads
    /// `window` apart.
    pub async fn sample(
        &self,
        host: &dyn HostSource,
        window: Duration,
        max_age: Duration,
    ) -> Result<f64, ExecError> {
        let prev = self
            .last
            .lock()
            .ok()
            .and_then(|g| *g)
            .filter(|(_, at)| at.elapsed() <= max_age)
            .map(|(times, _)| times);
        let prev = match prev {
            Some(p) => p,
            None => {
                let first = parse_cpu_times(&host.cpu_stat().await?);
                tokio::time::sleep(window).await;
                first
            }
        };
        let now = parse_cpu_times(&host.cpu_stat().await?);
        if let Ok(mut g) = self.last.lock() {
            *g = Some((now, Instant::now()));
        }
        Ok(now.utilization_since(&prev))
    }

    pub fn reset(&self) {
        if let Ok(mut g) = self.last.lock() {
            *g = None;
        }
    }
}

/// CPU, memory, uptime and OS identification.
pub async fn collect_stats(
    host: &dyn HostSource,
    cpu: &CpuTracker,
    cpu_window: Duration,
    baseline_max_age: Duration,
) -> Result<Stats, ExecError> {
    let mem = parse_meminfo(&host.meminfo().await?);
    let cpu_pct = cpu.sample(host, cpu_window, baseline_max_age).await?;
    let uptime = parse_uptime(&host.uptime().await?);
    // A missing os-release is not worth failing the snapshot for
    let os = match host.os_release().await {
        Ok(s) => parse_os_release(&s),
        Err(_) => OsRelease::default(),
    };

    Ok(Stats {
        cpu: cpu_pct,
        ram_total: mem.total,
        ram_used: mem.used,
        ram_free: mem.available,
        uptime,
        os_name: os.name,
        os_version: os.version,
        os_pretty_name: os.pretty_name,
        timestamp: now_millis(),
        error: None,
    })
}

/// Process table, busiest first, capped at `limit` rows.
pub async fn collect_processes(
    host: &dyn HostSource,
    limit: usize,
) -> Result<ProcessList, ExecError> {
    let mut processes = parse_ps(&host.process_table().await?);
    processes.sort_by(|a, b| b.cpu.total_cmp(&a.cpu));
    processes.truncate(limit);
    Ok(ProcessList {
        processes,
        timestamp: now_millis(),
    })
}

pub async fn collect_storage(host: &dyn HostSource) -> Result<StorageReport, ExecError> {
    let usage = parse_df(&host.disk_usage().await?);
    Ok(StorageReport {
        total: usage.total,
        used: usage.used,
        free: usage.free,
        partitions: usage.partitions,
        timestamp: now_millis(),
    })
}
