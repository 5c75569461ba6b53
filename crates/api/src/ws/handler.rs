use std::sync::Arc;

use actlocal_core::registry::RunRegistry;
use actlocal_events::{Broadcaster, Outbound, RunEvent};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::middleware::auth::DaemonAuth;
use crate::state::AppState;

/// HTTP handler that upgrades the connection to WebSocket.
///
/// `DaemonAuth` runs first, so a request without a valid token is answered
/// with 401 and never upgraded.
pub async fn ws_handler(
    _auth: DaemonAuth,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcaster, state.registry))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Subscribes to the broadcaster, queueing the `hello` snapshot.
///   2. Spawns a sender task that forwards queued frames.
///   3. Drains inbound messages until the peer goes away.
///   4. Unsubscribes.
async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>, registry: Arc<RunRegistry>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = broadcaster
        .subscribe(conn_id.clone(), || RunEvent::Hello {
            runs: registry.list(),
        })
        .await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let closing = frame == Outbound::Close;
            if sink.send(to_message(frame)).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Clients only listen; inbound frames are ignored.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    broadcaster.unsubscribe(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Event(payload) => Message::Text(payload.as_ref().into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
        Outbound::Close => Message::Close(None),
    }
}
