//! Terminal WebSocket: binds one shell session to one connection.
//!
//! Binary frames carry raw terminal bytes both ways. Text frames carry JSON
//! control events tagged by `event`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::terminal::{SessionHandle, SessionManager};
use crate::types::{TerminalEvent, TerminalRequest};

pub const WELCOME_BANNER: &str = "\r\n\x1b[1;32m=== HostPulse Web Terminal ===\x1b[0m\r\n\r\n";
pub const SESSION_NOT_FOUND: &str = "Session not found";
pub const RESIZE_FAILED: &str = "Failed to resize terminal";
pub const WRITE_FAILED: &str = "Failed to write to terminal";

// How long to keep draining output after the shell exits.
const EXIT_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

pub async fn terminal_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<TerminalQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, q))
}

type Sender = SplitSink<WebSocket, Message>;

async fn send_event(sender: &mut Sender, ev: &TerminalEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(ev) {
        Ok(js) => sender.send(Message::Text(js)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize terminal event");
            Ok(())
        }
    }
}

async fn send_error(sender: &mut Sender, message: &str) -> Result<(), axum::Error> {
    send_event(
        sender,
        &TerminalEvent::Error {
            message: message.to_string(),
        },
    )
    .await
}

// Kills the session however the connection ends.
struct SessionGuard {
    sessions: Arc<SessionManager>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.kill_session(&self.id);
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, q: TerminalQuery) {
    let id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    let SessionHandle {
        mut output,
        mut exit,
        ..
    } = match state.sessions.create_session(&id, q.cols, q.rows) {
        Ok(h) => h,
        Err(e) => {
            warn!(session = %id, error = %e, "failed to create terminal session");
            let _ = send_error(&mut sender, &format!("Failed to start terminal: {e}")).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let _guard = SessionGuard {
        sessions: state.sessions.clone(),
        id: id.clone(),
    };
    info!(session = %id, "terminal client connected");

    if sender
        .send(Message::Binary(WELCOME_BANNER.as_bytes().to_vec()))
        .await
        .is_err()
    {
        return;
    }

    let mut output_open = true;
    loop {
        tokio::select! {
            chunk = output.recv(), if output_open => match chunk {
                Some(bytes) => {
                    if sender.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                None => output_open = false,
            },
            code = &mut exit => {
                // the reader thread may still hold the shell's last output
                if output_open {
                    drain_output(&mut output, &mut sender).await;
                }
                let code = code.unwrap_or(-1);
                info!(session = %id, code, "terminal process exited");
                let _ = send_event(&mut sender, &TerminalEvent::Exit { code }).await;
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(msg)) => {
                    if !handle_message(&state.sessions, &id, msg, &mut sender).await {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(session = %id, error = %e, "terminal socket error");
                    break;
                }
                None => break,
            }
        }
    }
    info!(session = %id, "terminal client disconnected");
}

/// Applies one inbound frame. Returns false when the connection should end.
async fn handle_message(
    sessions: &SessionManager,
    id: &str,
    msg: Message,
    sender: &mut Sender,
) -> bool {
    let delivered = match msg {
        Message::Binary(bytes) => write_or_report(sessions, id, &bytes, sender).await,
        Message::Text(text) => match serde_json::from_str::<TerminalRequest>(&text) {
            Ok(TerminalRequest::Input { data }) => {
                write_or_report(sessions, id, data.as_bytes(), sender).await
            }
            Ok(TerminalRequest::Resize { cols, rows }) => {
                if sessions.resize_session(id, cols, rows) {
                    Ok(())
                } else {
                    send_error(sender, RESIZE_FAILED).await
                }
            }
            Err(e) => {
                debug!(session = id, error = %e, "bad terminal control frame");
                send_error(sender, "Invalid terminal message").await
            }
        },
        Message::Close(_) => return false,
        _ => Ok(()),
    };
    delivered.is_ok()
}

async fn write_or_report(
    sessions: &SessionManager,
    id: &str,
    data: &[u8],
    sender: &mut Sender,
) -> Result<(), axum::Error> {
    if sessions.write_to_session(id, data) {
        Ok(())
    } else if sessions.get_session(id).is_none() {
        send_error(sender, SESSION_NOT_FOUND).await
    } else {
        send_error(sender, WRITE_FAILED).await
    }
}

/// Forwards output until the pty reader closes its channel or `EXIT_DRAIN` passes.
async fn drain_output(output: &mut mpsc::Receiver<Vec<u8>>, sender: &mut Sender) {
    let deadline = tokio::time::Instant::now() + EXIT_DRAIN;
    while let Ok(Some(bytes)) = tokio::time::timeout_at(deadline, output.recv()).await {
        if sender.send(Message::Binary(bytes)).await.is_err() {
            return;
        }
    }
}
