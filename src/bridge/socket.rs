//! Per-connection dispatch loop for bridge websockets.
//!
//! # Data Flow
//! ```text
//! registry.route_request ──► mpsc ──► writer task ──► websocket
//! websocket ──► reader loop ──► registry.handle_message ──► (pong) ──► mpsc
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bridge::protocol::BridgeMessage;
use crate::bridge::registry::BridgeRegistry;

/// Drive one authenticated bridge socket until it closes.
pub async fn serve_bridge(
    socket: WebSocket,
    registry: Arc<BridgeRegistry>,
    user_id: String,
    ping_interval: Duration,
    outbound_buffer: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<BridgeMessage>(outbound_buffer);
    let conn = registry.register(&user_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode bridge frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if conn
        .send(BridgeMessage::auth_ack(&conn.id, &user_id))
        .await
        .is_ok()
    {
        let mut ticker = tokio::time::interval(ping_interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<BridgeMessage>(text.as_str()) {
                            Ok(msg) => {
                                if let Some(reply) = registry.handle_message(&conn, msg) {
                                    if conn.send(reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(connection_id = %conn.id, error = %e, "Malformed bridge frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(connection_id = %conn.id, error = %e, "Bridge socket error");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if conn.send(BridgeMessage::ping()).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(&conn);
    writer.abort();
}
