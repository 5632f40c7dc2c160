use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};

use crate::error::IngestError;
use crate::registry::{AgentConnection, ConnectionId};

use super::AppState;

pub(super) async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_agent_socket(socket, state))
}

/// One agent connection: outbound task requests from the registry queue go
/// to the socket, inbound frames go to the correlator.
async fn handle_agent_socket(socket: WebSocket, state: AppState) {
    let (_guard, mut shutdown_rx) = state.shutdown.register();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // `changed()` only fires for signals sent after `register()`.
    if state.shutdown.is_shutting_down() {
        tracing::debug!("agent connected during shutdown, closing");
        send_shutdown_close(&mut ws_tx).await;
        return;
    }

    let registry = state.bridge.registry().clone();
    let (connection, mut outbound_rx) = AgentConnection::new(&registry);
    let connection_id = connection.id();
    registry.register(connection);

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let Some(text) = frame_text(frame) else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(connection_id, "agent socket write failed");
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        ingest(&state, connection_id, text.as_str().as_bytes());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        ingest(&state, connection_id, &data);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        tracing::debug!(connection_id, error = %e, "agent socket error");
                        break;
                    }
                }
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(connection_id, "agent socket received shutdown signal, closing");
                    send_shutdown_close(&mut ws_tx).await;
                    break;
                }
            }
        }
    }

    registry.unregister(connection_id);
}

async fn send_shutdown_close(ws_tx: &mut SplitSink<WebSocket, Message>) {
    let close_frame = CloseFrame {
        code: axum::extract::ws::close_code::NORMAL,
        reason: "server shutting down".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
    let _ = ws_tx.flush().await;
}

fn frame_text(frame: Bytes) -> Option<String> {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "outbound frame is not valid UTF-8, dropping");
            None
        }
    }
}

fn ingest(state: &AppState, connection_id: ConnectionId, bytes: &[u8]) {
    match state.bridge.handle_incoming(bytes) {
        Ok(()) => {}
        // Already logged by the bridge.
        Err(IngestError::MalformedResponse(_)) => {}
        Err(IngestError::UnknownResponseId(id)) => {
            tracing::debug!(connection_id, task_id = %id, "late or duplicate response");
        }
    }
}
