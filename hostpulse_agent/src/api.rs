//! Thin REST surface: one-shot telemetry reads, process signals, service control
//! and a health check.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::metrics::now_millis;
use crate::services::{self, ServiceAction, ServiceRecord};
use crate::state::AppState;
use crate::types::{ProcessList, Stats, StorageReport};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Signals a viewer may send to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSignal {
    Terminate,
    Kill,
    Suspend,
    Resume,
}

impl ProcessSignal {
    /// Name as understood by `kill -s`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessSignal::Terminate => "TERM",
            ProcessSignal::Kill => "KILL",
            ProcessSignal::Suspend => "STOP",
            ProcessSignal::Resume => "CONT",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal: ProcessSignal,
}

// Always 200: failures come back as the zeroed snapshot with `error` set.
pub async fn stats(State(state): State<AppState>) -> Json<Stats> {
    match state.collector.sample_stats().await {
        Ok(s) => Json(s),
        Err(e) => {
            warn!(error = %e, "one-shot stats failed");
            Json(Stats::unavailable(e.to_string(), now_millis()))
        }
    }
}

pub async fn processes(State(state): State<AppState>) -> Result<Json<ProcessList>, ApiError> {
    state
        .collector
        .sample_processes()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("failed to list processes: {e}")))
}

pub async fn storage(State(state): State<AppState>) -> Result<Json<StorageReport>, ApiError> {
    state
        .collector
        .sample_storage()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("failed to read storage: {e}")))
}

pub async fn kill_process(
    Path(pid): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    send_signal(&state, pid, ProcessSignal::Kill).await
}

pub async fn signal_process(
    Path(pid): Path<i64>,
    State(state): State<AppState>,
    Json(req): Json<SignalRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    send_signal(&state, pid, req.signal).await
}

async fn send_signal(
    state: &AppState,
    pid: i64,
    signal: ProcessSignal,
) -> Result<Json<serde_json::Value>, ApiError> {
    if pid <= 0 {
        return Err(ApiError::BadRequest(format!("invalid pid {pid}")));
    }
    let pid_arg = pid.to_string();
    state
        .runner
        .run(
            "kill",
            &["-s", signal.as_str(), pid_arg.as_str()],
            state.config.collector.command_timeout,
        )
        .await
        .map_err(|e| {
            warn!(pid, signal = signal.as_str(), error = %e, "signal delivery failed");
            ApiError::Internal(format!("failed to send {} to {pid}: {e}", signal.as_str()))
        })?;
    info!(pid, signal = signal.as_str(), "signal delivered");

    let collector = state.collector.clone();
    tokio::spawn(async move { collector.trigger_immediate_process_refresh().await });

    Ok(Json(json!({ "success": true, "pid": pid, "signal": signal.as_str() })))
}

pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceRecord>> {
    let timeout = state.config.collector.command_timeout;
    Json(services::list_services(state.runner.as_ref(), timeout).await)
}

pub async fn service_action(
    Path((name, action)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !services::validate_name(&name) {
        return Err(ApiError::BadRequest(format!("invalid service name {name:?}")));
    }
    let action: ServiceAction = serde_json::from_value(json!(action))
        .map_err(|_| ApiError::BadRequest(format!("unknown service action {action:?}")))?;
    let message = services::perform_action(
        state.runner.as_ref(),
        &name,
        action,
        state.config.collector.command_timeout,
    )
    .await
    .map_err(|e| {
        warn!(service = %name, action = action.as_str(), error = %e, "service action failed");
        ApiError::Internal(format!("Failed to {} service {name}: {e}", action.as_str()))
    })?;
    Ok(Json(json!({ "message": message })))
}

pub async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "subscribers": state.collector.subscriber_count(),
        "polling": state.collector.is_polling(),
        "sessions": state.sessions.session_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::config::AgentConfig;
    use crate::terminal::SessionManager;
    use crate::testing::{FakeHost, FakeSpawner, RecordingRunner};
    use std::sync::Arc;
    use std::time::Duration;

    fn state(host: &Arc<FakeHost>, runner: &Arc<RecordingRunner>) -> AppState {
        let cfg = AgentConfig::default();
        AppState::new(
            Collector::new(host.clone(), cfg.collector.clone()),
            Arc::new(SessionManager::new(
                Arc::new(FakeSpawner::new()),
                cfg.terminal.clone(),
            )),
            runner.clone(),
            cfg,
        )
    }

    #[test]
    fn signal_names() {
        let parsed: SignalRequest = serde_json::from_str(r#"{"signal":"suspend"}"#).unwrap();
        assert_eq!(parsed.signal.as_str(), "STOP");
        assert_eq!(ProcessSignal::Resume.as_str(), "CONT");
        assert!(serde_json::from_str::<SignalRequest>(r#"{"signal":"nuke"}"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn kill_runs_command_and_refreshes_processes() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);

        let Json(body) = kill_process(Path(4242), State(st.clone())).await.unwrap();
        assert_eq!(body["signal"], "KILL");
        assert_eq!(runner.calls(), vec![vec!["kill", "-s", "KILL", "4242"]]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(host.process_calls(), 1);
    }

    #[tokio::test]
    async fn invalid_pid_is_rejected_without_running_anything() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);

        let err = signal_process(
            Path(0),
            State(st),
            Json(SignalRequest {
                signal: ProcessSignal::Terminate,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_signal_is_internal_error() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        runner.fail(true);
        let st = state(&host, &runner);

        let err = kill_process(Path(77), State(st)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_reads_do_not_start_polling() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);

        let Json(s) = stats(State(st.clone())).await;
        assert!(s.error.is_none());
        let Json(p) = processes(State(st.clone())).await.unwrap();
        assert_eq!(p.processes.len(), 3);
        let Json(d) = storage(State(st.clone())).await.unwrap();
        assert_eq!(d.partitions.len(), 2);

        let Json(h) = healthz(State(st)).await;
        assert_eq!(h["polling"], false);
        assert_eq!(h["subscribers"], 0);
    }

    #[tokio::test]
    async fn services_endpoint_lists_units() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(r#"[{"unit":"cron.service","active":"active","sub":"running","description":"Cron"}]"#);
        runner.push_output(r#"[{"unit_file":"cron.service","state":"enabled"}]"#);
        let st = state(&host, &runner);

        let Json(list) = list_services(State(st)).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "cron");
        assert!(list[0].running && list[0].enabled);
    }

    #[tokio::test]
    async fn service_action_runs_systemctl() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);

        let Json(body) = service_action(Path(("cron".into(), "restart".into())), State(st))
            .await
            .unwrap();
        assert_eq!(body["message"], "Service cron restarted successfully");
        assert_eq!(runner.calls(), vec![vec!["systemctl", "restart", "cron.service"]]);
    }

    #[tokio::test]
    async fn bad_service_requests_are_rejected_without_running_anything() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);

        let err = service_action(Path(("cron".into(), "reload".into())), State(st.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        let err = service_action(Path(("--all".into(), "stop".into())), State(st))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_service_action_is_internal_error() {
        let host = Arc::new(FakeHost::new());
        let runner = Arc::new(RecordingRunner::new());
        runner.fail(true);
        let st = state(&host, &runner);
        let err = service_action(Path(("cron".into(), "start".into())), State(st))
            .await
            .unwrap_err();
        match err {
            ApiError::Internal(m) => assert!(m.starts_with("Failed to start service cron")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn storage_failure_maps_to_500() {
        let host = Arc::new(FakeHost::new());
        host.fail_storage(true);
        let runner = Arc::new(RecordingRunner::new());
        let st = state(&host, &runner);
        let err = storage(State(st)).await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
