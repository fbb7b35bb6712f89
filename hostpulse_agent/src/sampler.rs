//! Background samplers: one periodic task per cadence, started and stopped by the
//! collector as viewers come and go.
//!
//! Every tick hands its fetch to a fresh task, so a slow `ps` or `df` never delays
//! the next tick or the other cadences.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

use crate::collector::{Collector, WeakCollector};

/// The three running poll loops. Aborting them stops future ticks only;
/// fetches already in flight still complete and publish.
#[derive(Debug)]
pub struct Samplers {
    stats: JoinHandle<()>,
    processes: JoinHandle<()>,
    storage: JoinHandle<()>,
}

impl Samplers {
    pub fn abort(self) {
        self.stats.abort();
        self.processes.abort();
        self.storage.abort();
    }
}

pub fn spawn_all(
    collector: WeakCollector,
    stats: Duration,
    processes: Duration,
    storage: Duration,
) -> Samplers {
    Samplers {
        stats: spawn_stats_sampler(collector.clone(), stats),
        processes: spawn_process_sampler(collector.clone(), processes),
        storage: spawn_storage_sampler(collector, storage),
    }
}

// 2s: cpu/mem/uptime
pub fn spawn_stats_sampler(collector: WeakCollector, period: Duration) -> JoinHandle<()> {
    spawn_periodic("stats", period, collector, |c| async move { c.fetch_stats().await })
}

// 5s: process table
pub fn spawn_process_sampler(collector: WeakCollector, period: Duration) -> JoinHandle<()> {
    spawn_periodic("processes", period, collector, |c| async move {
        c.fetch_processes().await
    })
}

// 60s: disks
pub fn spawn_storage_sampler(collector: WeakCollector, period: Duration) -> JoinHandle<()> {
    spawn_periodic("storage", period, collector, |c| async move {
        c.fetch_storage().await
    })
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    collector: WeakCollector,
    fetch: F,
) -> JoinHandle<()>
where
    F: Fn(Collector) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // first tick completes immediately
            ticker.tick().await;
            let Some(c) = collector.upgrade() else {
                break;
            };
            tokio::spawn(fetch(c));
        }
        debug!(sampler = name, "collector dropped, sampler exiting");
    })
}
