//! Telemetry WebSocket: one lazy-collector subscription per connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::types::TelemetrySnapshot;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_snapshot(
    sender: &mut SplitSink<WebSocket, Message>,
    snap: &TelemetrySnapshot,
) -> Result<(), axum::Error> {
    match serde_json::to_string(snap) {
        Ok(js) => sender.send(Message::Text(js)).await,
        Err(e) => {
            warn!(kind = snap.kind(), error = %e, "failed to serialize snapshot");
            Ok(())
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    // Dropping the subscription on any exit path unsubscribes this viewer.
    let mut sub = state.collector.subscribe();
    let (mut sender, mut receiver) = socket.split();

    // Late joiners get the last known value of every signal right away
    for snap in sub.take_replay() {
        if send_snapshot(&mut sender, &snap).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            snap = sub.recv() => {
                let Some(snap) = snap else { break };
                if send_snapshot(&mut sender, &snap).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "viewer socket error");
                    break;
                }
                // pings are answered by axum; anything else is ignored
                Some(Ok(_)) => {}
            }
        }
    }
    debug!("viewer disconnected");
}
