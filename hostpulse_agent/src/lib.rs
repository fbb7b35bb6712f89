//! hostpulse_agent: live host telemetry and web terminal sessions over WebSocket,
//! plus REST process and service control.

pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod exec;
pub mod host;
pub mod metrics;
pub mod parsers;
pub mod pty;
pub mod sampler;
pub mod services;
pub mod state;
pub mod terminal;
pub mod terminal_ws;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod ws;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/terminal", get(terminal_ws::terminal_handler))
        .route("/api/system/stats", get(api::stats))
        .route("/api/system/processes", get(api::processes))
        .route("/api/system/storage", get(api::storage))
        .route("/api/system/processes/:pid", delete(api::kill_process))
        .route("/api/system/processes/:pid/signal", post(api::signal_process))
        .route("/api/services", get(api::list_services))
        .route("/api/services/:name/:action", post(api::service_action))
        .route("/healthz", get(api::healthz))
        .with_state(state)
}
