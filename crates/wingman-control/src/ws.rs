//! WebSocket upgrade handler: one subscriber per connection, fed from the
//! Telemetry Bus broadcast channel. The subscriber set is touched only from
//! this loop; no eviction happens on send failure beyond the socket's own
//! close, and each message respects a fixed per-connection buffer cap.

use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, warn};
use wingman_core::config::NetworkConfig;

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut rx = state.telemetry.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text == "shutdown" => {
                        debug!("client requested shutdown over websocket");
                        state.shutdown.cancel();
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket read error: {e}");
                        return;
                    }
                }
            }
            message = rx.recv() => {
                let message = match message {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("telemetry subscriber lagged, skipped {skipped} messages");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                let Ok(json) = serde_json::to_string(&message) else { continue };
                if json.len() > NetworkConfig::MAX_SUBSCRIBER_BUFFER_BYTES {
                    warn!("dropping telemetry message, exceeds per-connection buffer cap");
                    continue;
                }
                if socket.send(Message::Text(json)).await.is_err() {
                    return;
                }
            }
        }
    }
}
