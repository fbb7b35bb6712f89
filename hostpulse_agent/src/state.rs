//! Shared agent state handed to every route.

use std::sync::Arc;

use crate::collector::Collector;
use crate::config::AgentConfig;
use crate::exec::CommandRunner;
use crate::terminal::SessionManager;

#[derive(Clone)]
pub struct AppState {
    // Lazy telemetry: polls only while /ws viewers are connected
    pub collector: Collector,
    pub sessions: Arc<SessionManager>,
    // Used for process signals; telemetry goes through the collector's host
    pub runner: Arc<dyn CommandRunner>,
    pub config: Arc<AgentConfig>,
}

impl AppState {
    pub fn new(
        collector: Collector,
        sessions: Arc<SessionManager>,
        runner: Arc<dyn CommandRunner>,
        config: AgentConfig,
    ) -> Self {
        Self {
            collector,
            sessions,
            runner,
            config: Arc::new(config),
        }
    }
}
