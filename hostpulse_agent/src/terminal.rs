//! Terminal session registry: one pseudo-terminal shell per connection,
//! reaped when idle.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::TerminalConfig;
use crate::error::SessionError;
use crate::pty::{PtyProcess, PtySpawner};

struct TerminalSession {
    process: Box<dyn PtyProcess>,
    cols: u16,
    rows: u16,
    created_at: DateTime<Utc>,
    last_activity: Instant,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionInfo {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// What the owning connection gets back from [`SessionManager::create_session`].
pub struct SessionHandle {
    pub id: String,
    pub output: mpsc::Receiver<Vec<u8>>,
    pub exit: oneshot::Receiver<i32>,
}

pub struct SessionManager {
    sessions: DashMap<String, TerminalSession>,
    spawner: Arc<dyn PtySpawner>,
    config: TerminalConfig,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(spawner: Arc<dyn PtySpawner>, config: TerminalConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            spawner,
            config,
            reaper: Mutex::new(None),
        }
    }

    /// Spawns a shell for `id`. Missing geometry falls back to the configured
    /// defaults. An existing session with the same id is killed first.
    pub fn create_session(
        &self,
        id: &str,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> Result<SessionHandle, SessionError> {
        let cols = cols.filter(|c| *c > 0).unwrap_or(self.config.default_cols);
        let rows = rows.filter(|r| *r > 0).unwrap_or(self.config.default_rows);

        if self.kill_session(id) {
            warn!(session = id, "replaced existing terminal session");
        }

        let spawned = self.spawner.spawn(cols, rows)?;
        self.sessions.insert(
            id.to_string(),
            TerminalSession {
                process: spawned.process,
                cols,
                rows,
                created_at: Utc::now(),
                last_activity: Instant::now(),
            },
        );
        info!(session = id, cols, rows, "terminal session created");
        Ok(SessionHandle {
            id: id.to_string(),
            output: spawned.output,
            exit: spawned.exit,
        })
    }

    /// Forwards input to the shell. False if the session is unknown or its input is gone.
    pub fn write_to_session(&self, id: &str, data: &[u8]) -> bool {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.last_activity = Instant::now();
        match session.process.write(data) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = id, error = %e, "terminal write failed");
                false
            }
        }
    }

    pub fn resize_session(&self, id: &str, cols: u16, rows: u16) -> bool {
        if cols == 0 || rows == 0 {
            return false;
        }
        let Some(mut session) = self.sessions.get_mut(id) else {
            return false;
        };
        session.last_activity = Instant::now();
        match session.process.resize(cols, rows) {
            Ok(()) => {
                session.cols = cols;
                session.rows = rows;
                true
            }
            Err(e) => {
                warn!(session = id, cols, rows, error = %e, "terminal resize failed");
                false
            }
        }
    }

    /// Removes the session and kills its process. Returns false if it was already gone.
    pub fn kill_session(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        if let Err(e) = session.process.kill() {
            // usually the child already exited
            debug!(session = id, error = %e, "kill failed");
        }
        info!(session = id, "terminal session killed");
        true
    }

    pub fn get_session(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|s| SessionInfo {
            id: id.to_string(),
            cols: s.cols,
            rows: s.rows,
            created_at: s.created_at,
            idle_secs: s.last_activity.elapsed().as_secs(),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn kill_all_sessions(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.kill_session(id)).count()
    }

    /// Kills every session idle for longer than the session timeout.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.config.session_timeout;
        // collect first: killing while iterating would deadlock the shard
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.last_activity.elapsed() > timeout)
            .map(|e| e.key().clone())
            .collect();
        let reaped = idle.iter().filter(|id| self.kill_session(id)).count();
        if reaped > 0 {
            info!(reaped, remaining = self.session_count(), "reaped idle terminal sessions");
        }
        reaped
    }

    /// Starts the periodic idle sweep. Calling it again replaces the running sweep.
    pub fn start_reaper(self: &Arc<Self>) {
        let period = self.config.reap_interval;
        let manager: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_idle();
            }
        });
        let mut slot = self.reaper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub fn stop_reaper(&self) {
        let mut slot = self.reaper.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    pub fn session_timeout(&self) -> Duration {
        self.config.session_timeout
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_reaper();
        self.kill_all_sessions();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSpawner;

    fn manager(spawner: &Arc<FakeSpawner>) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(spawner.clone(), TerminalConfig::default()))
    }

    #[tokio::test]
    async fn create_uses_default_geometry() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.create_session("a", None, None).unwrap();
        let info = m.get_session("a").unwrap();
        assert_eq!((info.cols, info.rows), (80, 30));
        assert_eq!(spawner.last().unwrap().geometry(), (80, 30));

        m.create_session("b", Some(120), Some(40)).unwrap();
        assert_eq!(m.get_session("b").map(|i| (i.cols, i.rows)), Some((120, 40)));
        assert_eq!(m.session_count(), 2);
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.create_session("a", None, None).unwrap();
        assert!(m.kill_session("a"));
        assert!(!m.kill_session("a"));
        assert!(spawner.last().unwrap().was_killed());
        assert!(m.get_session("a").is_none());
    }

    #[tokio::test]
    async fn unknown_session_operations_fail_softly() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        assert!(!m.write_to_session("nope", b"ls\n"));
        assert!(!m.resize_session("nope", 100, 40));
        assert!(!m.kill_session("nope"));
        assert!(m.get_session("nope").is_none());
    }

    #[tokio::test]
    async fn write_reaches_the_process_and_echoes() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        let mut handle = m.create_session("a", None, None).unwrap();
        assert!(m.write_to_session("a", b"ls\n"));
        assert_eq!(spawner.last().unwrap().input(), b"ls\n");
        assert_eq!(handle.output.recv().await.unwrap(), b"ls\n");
    }

    #[tokio::test]
    async fn resize_updates_geometry_or_reports_failure() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.create_session("a", None, None).unwrap();
        assert!(m.resize_session("a", 132, 50));
        assert_eq!(m.get_session("a").map(|i| (i.cols, i.rows)), Some((132, 50)));
        assert!(!m.resize_session("a", 0, 50));

        spawner.last().unwrap().reject_resize(true);
        assert!(!m.resize_session("a", 100, 20));
        assert_eq!(m.get_session("a").map(|i| (i.cols, i.rows)), Some((132, 50)));
    }

    #[tokio::test]
    async fn spawn_failure_leaves_registry_untouched() {
        let spawner = Arc::new(FakeSpawner::new());
        spawner.fail_spawn(true);
        let m = manager(&spawner);
        assert!(m.create_session("a", None, None).is_err());
        assert_eq!(m.session_count(), 0);
    }

    #[tokio::test]
    async fn recreating_an_id_kills_the_old_process() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.create_session("a", None, None).unwrap();
        let first = spawner.last().unwrap();
        m.create_session("a", None, None).unwrap();
        assert!(first.was_killed());
        assert_eq!(m.session_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_reaped_by_next_sweep() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.start_reaper();
        m.create_session("idle", None, None).unwrap();

        // 15 min timeout, 5 min sweeps: the 20 min sweep is the first to see it expired
        tokio::time::sleep(Duration::from_secs(15 * 60 + 30)).await;
        assert_eq!(m.session_count(), 1);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(m.session_count(), 0);
        assert!(spawner.last().unwrap().was_killed());
        m.stop_reaper();
    }

    #[tokio::test(start_paused = true)]
    async fn active_session_survives_many_sweeps() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        m.start_reaper();
        m.create_session("busy", None, None).unwrap();
        m.create_session("idle", None, None).unwrap();

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(4 * 60)).await;
            assert!(m.write_to_session("busy", b"\n"));
        }
        assert!(m.get_session("busy").is_some());
        assert!(m.get_session("idle").is_none());
        m.stop_reaper();
    }

    #[tokio::test]
    async fn kill_all_empties_registry() {
        let spawner = Arc::new(FakeSpawner::new());
        let m = manager(&spawner);
        for id in ["a", "b", "c"] {
            m.create_session(id, None, None).unwrap();
        }
        assert_eq!(m.kill_all_sessions(), 3);
        assert_eq!(m.session_count(), 0);
    }
}
