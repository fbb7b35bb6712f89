//! Lazy, reference-counted telemetry collector.
//!
//! Polling only runs while at least one viewer is subscribed. Every fetch
//! publishes into one broadcast channel that all viewers share, so N viewers
//! cost the same OS work as one. The latest value of each signal is cached and
//! replayed to anyone who subscribes later.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::ExecError;
use crate::host::HostSource;
use crate::metrics::{collect_processes, collect_stats, collect_storage, now_millis, CpuTracker};
use crate::sampler::{self, Samplers};
use crate::types::{ProcessList, Stats, StorageReport, TelemetrySnapshot};

const UPDATE_BUFFER: usize = 64;

#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

/// Non-owning handle held by the sampler tasks.
#[derive(Clone)]
pub struct WeakCollector(Weak<Inner>);

impl WeakCollector {
    pub fn upgrade(&self) -> Option<Collector> {
        self.0.upgrade().map(|inner| Collector { inner })
    }
}

struct Inner {
    host: Arc<dyn HostSource>,
    config: CollectorConfig,
    cpu: CpuTracker,
    latest: Mutex<Latest>,
    updates: broadcast::Sender<TelemetrySnapshot>,
    poll: Mutex<PollState>,
}

#[derive(Default)]
struct PollState {
    subscribers: usize,
    samplers: Option<Samplers>,
}

#[derive(Default)]
struct Latest {
    stats: Option<Stats>,
    processes: Option<ProcessList>,
    storage: Option<StorageReport>,
}

impl Latest {
    /// Stores `snap` unless a newer value of the same kind is already cached.
    fn accept(&mut self, snap: &TelemetrySnapshot) -> bool {
        fn newer<T>(slot: &mut Option<T>, value: &T, ts: impl Fn(&T) -> i64) -> bool
        where
            T: Clone,
        {
            if slot.as_ref().is_some_and(|cur| ts(cur) > ts(value)) {
                return false;
            }
            *slot = Some(value.clone());
            true
        }
        match snap {
            TelemetrySnapshot::Stats(s) => newer(&mut self.stats, s, |v| v.timestamp),
            TelemetrySnapshot::Processes(p) => newer(&mut self.processes, p, |v| v.timestamp),
            TelemetrySnapshot::Storage(s) => newer(&mut self.storage, s, |v| v.timestamp),
        }
    }

    fn snapshots(&self) -> Vec<TelemetrySnapshot> {
        let mut out = Vec::with_capacity(3);
        if let Some(s) = &self.stats {
            out.push(TelemetrySnapshot::Stats(s.clone()));
        }
        if let Some(p) = &self.processes {
            out.push(TelemetrySnapshot::Processes(p.clone()));
        }
        if let Some(s) = &self.storage {
            out.push(TelemetrySnapshot::Storage(s.clone()));
        }
        out
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Collector {
    pub fn new(host: Arc<dyn HostSource>, config: CollectorConfig) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            inner: Arc::new(Inner {
                host,
                config,
                cpu: CpuTracker::new(),
                latest: Mutex::new(Latest::default()),
                updates,
                poll: Mutex::new(PollState::default()),
            }),
        }
    }

    fn downgrade(&self) -> WeakCollector {
        WeakCollector(Arc::downgrade(&self.inner))
    }

    /// Registers a viewer. The first one starts the three samplers (each fetches
    /// immediately, then on its cadence).
    ///
    /// The returned subscription replays the latest cached value of every signal,
    /// then yields each new publication in order.
    pub fn subscribe(&self) -> Subscription {
        // Replay and receiver are taken under the lock publish() sends under,
        // so nothing published in between is lost or seen twice.
        let (replay, updates) = {
            let latest = lock(&self.inner.latest);
            (latest.snapshots(), self.inner.updates.subscribe())
        };

        let mut poll = lock(&self.inner.poll);
        poll.subscribers += 1;
        info!(subscribers = poll.subscribers, "viewer subscribed");
        if poll.subscribers == 1 {
            info!("starting lazy system monitoring");
            let c = &self.inner.config;
            poll.samplers = Some(sampler::spawn_all(
                self.downgrade(),
                c.stats_interval,
                c.processes_interval,
                c.storage_interval,
            ));
        }
        drop(poll);

        Subscription {
            collector: self.clone(),
            replay,
            updates,
        }
    }

    /// Drops one viewer; the last one stops all samplers. Clamped at zero.
    pub fn unsubscribe(&self) {
        let mut poll = lock(&self.inner.poll);
        poll.subscribers = poll.subscribers.saturating_sub(1);
        info!(subscribers = poll.subscribers, "viewer unsubscribed");
        if poll.subscribers == 0 {
            if let Some(samplers) = poll.samplers.take() {
                info!("stopping lazy system monitoring");
                samplers.abort();
                self.inner.cpu.reset();
            }
        }
    }

    /// Stops polling no matter how many viewers remain.
    pub fn shutdown(&self) {
        let mut poll = lock(&self.inner.poll);
        if let Some(samplers) = poll.samplers.take() {
            info!(subscribers = poll.subscribers, "collector shutting down");
            samplers.abort();
        }
        self.inner.cpu.reset();
        poll.subscribers = 0;
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.poll).subscribers
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poll).samplers.is_some()
    }

    /// Latest cached value of every signal that has been published at least once.
    pub fn latest(&self) -> Vec<TelemetrySnapshot> {
        lock(&self.inner.latest).snapshots()
    }

    fn publish(&self, snap: TelemetrySnapshot) {
        let mut latest = lock(&self.inner.latest);
        if !latest.accept(&snap) {
            debug!(kind = snap.kind(), "dropping out-of-order snapshot");
            return;
        }
        // No receivers is fine: nobody is watching right now.
        let _ = self.inner.updates.send(snap);
    }

    pub async fn sample_stats(&self) -> Result<Stats, ExecError> {
        let c = &self.inner.config;
        // a baseline older than two stats ticks no longer describes "recent" load
        collect_stats(
            self.inner.host.as_ref(),
            &self.inner.cpu,
            c.cpu_window,
            c.stats_interval * 2,
        )
        .await
    }

    pub async fn sample_processes(&self) -> Result<ProcessList, ExecError> {
        collect_processes(self.inner.host.as_ref(), self.inner.config.process_limit).await
    }

    pub async fn sample_storage(&self) -> Result<StorageReport, ExecError> {
        collect_storage(self.inner.host.as_ref()).await
    }

    /// Samples and publishes stats. Failures publish a zeroed snapshot carrying the error.
    pub async fn fetch_stats(&self) {
        let stats = match self.sample_stats().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to fetch system stats");
                self.inner.cpu.reset();
                Stats::unavailable(e.to_string(), now_millis())
            }
        };
        self.publish(TelemetrySnapshot::Stats(stats));
    }

    /// Samples and publishes the process list. On failure the previous list stays current.
    pub async fn fetch_processes(&self) {
        match self.sample_processes().await {
            Ok(p) => self.publish(TelemetrySnapshot::Processes(p)),
            Err(e) => warn!(error = %e, "failed to fetch processes"),
        }
    }

    /// Samples and publishes storage. On failure the previous report stays current.
    pub async fn fetch_storage(&self) {
        match self.sample_storage().await {
            Ok(s) => self.publish(TelemetrySnapshot::Storage(s)),
            Err(e) => warn!(error = %e, "failed to fetch storage"),
        }
    }

    /// Out-of-cadence process refresh, e.g. after a signal was delivered.
    /// Waits the configured grace period first so the process table has settled.
    pub async fn trigger_immediate_process_refresh(&self) {
        tokio::time::sleep(self.inner.config.refresh_grace).await;
        self.fetch_processes().await;
    }
}

/// One viewer's registration. Dropping it unsubscribes.
pub struct Subscription {
    collector: Collector,
    replay: Vec<TelemetrySnapshot>,
    updates: broadcast::Receiver<TelemetrySnapshot>,
}

impl Subscription {
    /// Cached values captured at subscribe time. Empty on the second call.
    pub fn take_replay(&mut self) -> Vec<TelemetrySnapshot> {
        std::mem::take(&mut self.replay)
    }

    /// Next published snapshot. A viewer that fell too far behind skips ahead
    /// to the oldest value still buffered. `None` once the collector is gone.
    pub async fn recv(&mut self) -> Option<TelemetrySnapshot> {
        loop {
            match self.updates.recv().await {
                Ok(snap) => return Some(snap),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "viewer lagging, skipped snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.collector.unsubscribe();
    }
}
