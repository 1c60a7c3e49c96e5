//! Per-connection dispatch loop for tunnel endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::relay::protocol::TunnelMessage;
use crate::relay::registry::TunnelRelay;

/// Drive one authenticated tunnel socket until it closes.
pub async fn serve_tunnel(
    socket: WebSocket,
    relay: Arc<TunnelRelay>,
    user_id: String,
    ping_interval: Duration,
    outbound_buffer: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<TunnelMessage>(outbound_buffer);
    let connection_id = relay.connect(&user_id, tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<TunnelMessage>(text.as_str()) {
                        Ok(msg) => relay.handle_message(&connection_id, msg),
                        Err(_) => {
                            // Never echo the frame: it may carry key material or ciphertext.
                            warn!(connection_id = %connection_id, bytes = text.len(), "Malformed tunnel frame");
                            Some(TunnelMessage::error("malformed frame"))
                        }
                    };
                    if let Some(reply) = reply {
                        if tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, error = %e, "Tunnel socket error");
                    break;
                }
            },
            _ = ticker.tick() => {
                if tx.send(TunnelMessage::Ping).await.is_err() {
                    break;
                }
            }
        }
    }

    relay.disconnect(&connection_id);
    writer.abort();
}
