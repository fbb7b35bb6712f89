//! End-to-end checks of the /ws and /terminal gateways against fake host and pty backends.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use hostpulse_agent::build_router;
use hostpulse_agent::collector::Collector;
use hostpulse_agent::config::AgentConfig;
use hostpulse_agent::state::AppState;
use hostpulse_agent::terminal::SessionManager;
use hostpulse_agent::terminal_ws::WRITE_FAILED;
use hostpulse_agent::testing::{FakeHost, FakeSpawner, RecordingRunner};
use hostpulse_agent::types::TelemetrySnapshot;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    host: Arc<FakeHost>,
    spawner: Arc<FakeSpawner>,
    state: AppState,
}

async fn start() -> Harness {
    let host = Arc::new(FakeHost::new());
    let spawner = Arc::new(FakeSpawner::new());
    let mut cfg = AgentConfig::default();
    cfg.collector.cpu_window = Duration::from_millis(10);
    let state = AppState::new(
        Collector::new(host.clone(), cfg.collector.clone()),
        Arc::new(SessionManager::new(spawner.clone(), cfg.terminal.clone())),
        Arc::new(RecordingRunner::new()),
        cfg,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Harness {
        addr,
        host,
        spawner,
        state,
    }
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

async fn next_frame(ws: &mut Client) -> Message {
    tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended")
        .expect("socket error")
}

async fn next_snapshot(ws: &mut Client) -> TelemetrySnapshot {
    match next_frame(ws).await {
        Message::Text(js) => serde_json::from_str(&js).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn kinds(ws: &mut Client, n: usize) -> Vec<&'static str> {
    let mut out = Vec::new();
    for _ in 0..n {
        out.push(next_snapshot(ws).await.kind());
    }
    out.sort();
    out
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

async fn next_event(ws: &mut Client) -> serde_json::Value {
    loop {
        match next_frame(ws).await {
            Message::Text(js) => return serde_json::from_str(&js).unwrap(),
            Message::Binary(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[tokio::test]
async fn viewers_share_one_poller_and_late_joiners_get_replay() {
    let h = start().await;

    let mut first = connect(h.addr, "/ws").await;
    assert_eq!(kinds(&mut first, 3).await, ["processes", "stats", "storage"]);
    assert_eq!(h.host.disk_calls(), 1);

    // storage only refreshes every minute, so this must come from the replay
    let mut late = connect(h.addr, "/ws").await;
    assert_eq!(kinds(&mut late, 3).await, ["processes", "stats", "storage"]);
    assert_eq!(h.host.disk_calls(), 1);
    wait_for(|| h.state.collector.subscriber_count() == 2).await;

    // the next stats tick reaches both viewers
    assert_eq!(next_snapshot(&mut first).await.kind(), "stats");
    assert_eq!(next_snapshot(&mut late).await.kind(), "stats");

    drop(first);
    wait_for(|| h.state.collector.subscriber_count() == 1).await;
    assert!(h.state.collector.is_polling());

    late.close(None).await.unwrap();
    wait_for(|| h.state.collector.subscriber_count() == 0).await;
    assert!(!h.state.collector.is_polling());
}

#[tokio::test]
async fn terminal_round_trip() {
    let h = start().await;
    let mut ws = connect(h.addr, "/terminal?cols=100&rows=40").await;

    match next_frame(&mut ws).await {
        Message::Binary(b) => assert!(String::from_utf8_lossy(&b).contains("Web Terminal")),
        other => panic!("expected banner, got {other:?}"),
    }
    assert_eq!(h.state.sessions.session_count(), 1);
    let pty = h.spawner.last().unwrap();
    assert_eq!(pty.geometry(), (100, 40));

    ws.send(Message::Text(r#"{"event":"input","data":"ls\n"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut ws).await, Message::Binary(b"ls\n".to_vec()));

    ws.send(Message::Binary(b"pwd\n".to_vec())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await, Message::Binary(b"pwd\n".to_vec()));
    assert_eq!(pty.input(), b"ls\npwd\n");

    ws.send(Message::Text(r#"{"event":"resize","cols":120,"rows":50}"#.into()))
        .await
        .unwrap();
    wait_for(|| pty.geometry() == (120, 50)).await;

    pty.reject_resize(true);
    ws.send(Message::Text(r#"{"event":"resize","cols":10,"rows":5}"#.into()))
        .await
        .unwrap();
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "error");
    assert_eq!(ev["message"], "Failed to resize terminal");

    pty.emit(b"bye\r\n").await;
    pty.exit(3);
    assert_eq!(next_frame(&mut ws).await, Message::Binary(b"bye\r\n".to_vec()));
    let ev = next_event(&mut ws).await;
    assert_eq!(ev, serde_json::json!({"event": "exit", "code": 3}));
    wait_for(|| h.state.sessions.session_count() == 0).await;
    assert!(pty.was_killed());
}

#[tokio::test]
async fn terminal_disconnect_kills_session() {
    let h = start().await;
    let mut a = connect(h.addr, "/terminal").await;
    let mut b = connect(h.addr, "/terminal").await;
    next_frame(&mut a).await;
    next_frame(&mut b).await;
    assert_eq!(h.state.sessions.session_count(), 2);
    assert_eq!(h.spawner.spawned(), 2);

    drop(a);
    wait_for(|| h.state.sessions.session_count() == 1).await;

    // the other session is unaffected
    b.send(Message::Binary(b"echo\n".to_vec())).await.unwrap();
    assert_eq!(next_frame(&mut b).await, Message::Binary(b"echo\n".to_vec()));
}

#[tokio::test]
async fn terminal_spawn_failure_is_reported() {
    let h = start().await;
    h.spawner.fail_spawn(true);
    let mut ws = connect(h.addr, "/terminal").await;
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "error");
    assert!(ev["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to start terminal"));
    assert_eq!(h.state.sessions.session_count(), 0);
}

#[tokio::test]
async fn bad_control_frame_gets_error_event() {
    let h = start().await;
    let mut ws = connect(h.addr, "/terminal").await;
    next_frame(&mut ws).await;
    ws.send(Message::Text("{not json".into())).await.unwrap();
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "error");
    assert_eq!(h.state.sessions.session_count(), 1);
}

#[tokio::test]
async fn output_buffered_at_exit_arrives_before_exit_event() {
    let h = start().await;
    let mut ws = connect(h.addr, "/terminal").await;
    next_frame(&mut ws).await;
    let pty = h.spawner.last().unwrap();

    for i in 0..20 {
        pty.emit(format!("line {i}\r\n").as_bytes()).await;
    }
    pty.exit(0);

    for i in 0..20 {
        assert_eq!(
            next_frame(&mut ws).await,
            Message::Binary(format!("line {i}\r\n").into_bytes())
        );
    }
    let ev = next_event(&mut ws).await;
    assert_eq!(ev, serde_json::json!({"event": "exit", "code": 0}));
}

#[tokio::test]
async fn write_failure_on_live_session_is_not_reported_as_missing() {
    let h = start().await;
    let mut ws = connect(h.addr, "/terminal").await;
    next_frame(&mut ws).await;
    let pty = h.spawner.last().unwrap();

    pty.close_input();
    ws.send(Message::Binary(b"ls\n".to_vec())).await.unwrap();
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "error");
    assert_eq!(ev["message"], WRITE_FAILED);
    assert_eq!(h.state.sessions.session_count(), 1);
    assert!(!pty.was_killed());
}
