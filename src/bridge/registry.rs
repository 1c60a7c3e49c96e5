//! Bridge connection registry and request correlator.
//!
//! # Responsibilities
//! - Track every live bridge connection per user, in registration order
//! - Correlate proxied requests with the bridge response carrying the same id
//! - Resolve each pending request exactly once: response, timeout or disconnect
//!
//! # Design Decisions
//! - The first registered connection for a user serves all of that user's requests
//! - Pending entries are removed atomically (`DashMap::remove`) by whichever
//!   path resolves them; the loser of a race finds nothing and does nothing
//! - A send failure evicts the connection and fails everything it owned

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::protocol::{BridgeMessage, BridgeMessageType, ProxyRequest, ProxyResponse};
use crate::observability::metrics;

/// Why a proxied request did not produce a response.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no bridge connected for user {0}")]
    NotConnected(String),

    #[error("request {0} timed out waiting for the bridge")]
    Timeout(String),

    #[error("bridge {0} disconnected before replying")]
    Disconnected(String),

    #[error("bridge reported an error: {0}")]
    Remote(String),
}

type Responder = oneshot::Sender<Result<ProxyResponse, BridgeError>>;

/// A live bridge websocket.
#[derive(Debug)]
pub struct BridgeConnection {
    pub id: String,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    last_ping_ms: AtomicI64,
    outbound: mpsc::Sender<BridgeMessage>,
}

impl BridgeConnection {
    /// Queue a frame for the connection's writer task.
    pub async fn send(&self, msg: BridgeMessage) -> Result<(), BridgeError> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| BridgeError::Disconnected(self.id.clone()))
    }

    pub fn record_ping(&self) {
        self.last_ping_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_ping(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_ping_ms.load(Ordering::Relaxed))
            .unwrap_or(self.connected_at)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id.clone(),
            user_id: self.user_id.clone(),
            connected_at: self.connected_at,
            last_ping: self.last_ping(),
        }
    }
}

/// Reportable view of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
}

struct PendingRequest {
    bridge_id: String,
    responder: Responder,
    started: Instant,
}

/// Removes a pending entry if the caller goes away before it is resolved.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingRequest>,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(self.request_id).is_some() {
            metrics::set_pending_requests(self.pending.len());
        }
    }
}

/// Registry of bridge connections plus the pending-request table.
pub struct BridgeRegistry {
    connections: DashMap<String, Vec<Arc<BridgeConnection>>>,
    pending: DashMap<String, PendingRequest>,
    request_timeout: Duration,
}

impl BridgeRegistry {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            pending: DashMap::new(),
            request_timeout,
        }
    }

    /// Register a new bridge for `user_id`. Frames sent to it go to `outbound`.
    pub fn register(
        &self,
        user_id: &str,
        outbound: mpsc::Sender<BridgeMessage>,
    ) -> Arc<BridgeConnection> {
        let now = Utc::now();
        let conn = Arc::new(BridgeConnection {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            connected_at: now,
            last_ping_ms: AtomicI64::new(now.timestamp_millis()),
            outbound,
        });

        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(Arc::clone(&conn));
        metrics::set_bridge_connections(self.connection_count());

        info!(user_id = %user_id, connection_id = %conn.id, "Bridge registered");
        conn
    }

    /// Remove a connection and fail every request it still owes.
    ///
    /// Returns the number of pending requests that were failed.
    pub fn unregister(&self, conn: &BridgeConnection) -> usize {
        let emptied = {
            match self.connections.get_mut(&conn.user_id) {
                Some(mut list) => {
                    list.retain(|c| c.id != conn.id);
                    list.is_empty()
                }
                None => false,
            }
        };
        if emptied {
            self.connections
                .remove_if(&conn.user_id, |_, list| list.is_empty());
        }
        metrics::set_bridge_connections(self.connection_count());

        let failed = self.fail_pending_for(&conn.id);
        info!(
            user_id = %conn.user_id,
            connection_id = %conn.id,
            failed_requests = failed,
            "Bridge unregistered"
        );
        failed
    }

    fn fail_pending_for(&self, bridge_id: &str) -> usize {
        let owned: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.bridge_id == bridge_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for request_id in owned {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                let _ = pending
                    .responder
                    .send(Err(BridgeError::Disconnected(bridge_id.to_string())));
                failed += 1;
            }
        }
        metrics::set_pending_requests(self.pending.len());
        failed
    }

    /// The connection that serves `user_id`: the earliest registered one.
    pub fn primary_connection(&self, user_id: &str) -> Option<Arc<BridgeConnection>> {
        self.connections
            .get(user_id)
            .and_then(|list| list.first().cloned())
    }

    /// Forward `request` to the user's bridge and wait for its response.
    pub async fn route_request(
        &self,
        user_id: &str,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, BridgeError> {
        let started = Instant::now();
        let conn = self
            .primary_connection(user_id)
            .ok_or_else(|| BridgeError::NotConnected(user_id.to_string()))?;

        let request_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        let deadline = tokio::time::Instant::now() + self.request_timeout;

        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                bridge_id: conn.id.clone(),
                responder: tx,
                started,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request_id,
        };
        metrics::set_pending_requests(self.pending.len());

        debug!(
            request_id = %request_id,
            connection_id = %conn.id,
            method = %request.method,
            path = %request.path,
            "Forwarding request to bridge"
        );

        // The deadline covers queueing too: a stalled writer must not hold the caller.
        let frame = BridgeMessage::request(&request_id, &request);
        match tokio::time::timeout_at(deadline, conn.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!(connection_id = %conn.id, "Bridge send failed, evicting connection");
                // Eviction fails this request too; the receive below observes it.
                self.unregister(&conn);
            }
            Err(_) => {
                warn!(connection_id = %conn.id, "Bridge outbound queue stayed full until the deadline");
            }
        }

        let outcome = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Disconnected(conn.id.clone())),
            Err(_) => {
                if self.pending.remove(&request_id).is_some() {
                    metrics::set_pending_requests(self.pending.len());
                    warn!(request_id = %request_id, "Bridge request timed out");
                    Err(BridgeError::Timeout(request_id.clone()))
                } else {
                    // Resolved concurrently with the deadline.
                    rx.await
                        .unwrap_or_else(|_| Err(BridgeError::Disconnected(conn.id.clone())))
                }
            }
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(BridgeError::Timeout(_)) => "timeout",
            Err(BridgeError::Disconnected(_)) => "disconnected",
            Err(BridgeError::Remote(_)) => "remote_error",
            Err(BridgeError::NotConnected(_)) => "not_connected",
        };
        metrics::record_bridge_request(label, started);
        outcome
    }

    /// Handle a frame received from `conn`. Returns a frame to send back, if any.
    pub fn handle_message(&self, conn: &BridgeConnection, msg: BridgeMessage) -> Option<BridgeMessage> {
        match msg.kind {
            BridgeMessageType::Response => {
                self.complete(conn, msg);
                None
            }
            BridgeMessageType::Ping => {
                conn.record_ping();
                Some(BridgeMessage::pong(&msg.id))
            }
            BridgeMessageType::Pong => {
                conn.record_ping();
                None
            }
            BridgeMessageType::Auth | BridgeMessageType::Request => {
                warn!(connection_id = %conn.id, kind = ?msg.kind, "Unexpected frame from bridge");
                None
            }
        }
    }

    /// Resolve the pending request named by a `response` frame.
    ///
    /// Only the bridge the request was sent to may resolve it.
    pub fn complete(&self, conn: &BridgeConnection, msg: BridgeMessage) -> bool {
        let Some((_, pending)) = self
            .pending
            .remove_if(&msg.id, |_, p| p.bridge_id == conn.id)
        else {
            debug!(
                request_id = %msg.id,
                connection_id = %conn.id,
                "Response for unknown or foreign request ignored"
            );
            return false;
        };
        metrics::set_pending_requests(self.pending.len());

        let result = match (msg.error, msg.data) {
            (Some(error), _) => Err(BridgeError::Remote(error)),
            (None, Some(data)) => serde_json::from_value::<ProxyResponse>(data)
                .map_err(|e| BridgeError::Remote(format!("malformed response: {e}"))),
            (None, None) => Err(BridgeError::Remote("response carried no data".to_string())),
        };

        debug!(
            request_id = %msg.id,
            elapsed_ms = pending.started.elapsed().as_millis() as u64,
            "Bridge response received"
        );
        pending.responder.send(result).is_ok()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections
            .get(user_id)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<ConnectionInfo> {
        self.connections
            .get(user_id)
            .map(|list| list.iter().map(|c| c.info()).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().iter().map(|c| c.info()).collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProxyRequest {
        ProxyRequest {
            method: "GET".into(),
            path: "/api/tags".into(),
            headers: Default::default(),
            body: None,
        }
    }

    fn ok_response(id: &str) -> BridgeMessage {
        BridgeMessage::response(
            id,
            &ProxyResponse {
                status: 200,
                headers: Default::default(),
                body: Some("{\"models\":[]}".into()),
            },
        )
    }

    #[tokio::test]
    async fn unknown_user_is_not_connected() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let err = registry.route_request("nobody", request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected(_)));
    }

    #[tokio::test]
    async fn earliest_connection_serves_requests() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let first = registry.register("u1", tx1);
        let _second = registry.register("u1", tx2);

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.primary_connection("u1").unwrap().id, first.id);
    }

    #[tokio::test]
    async fn response_resolves_request() {
        let registry = Arc::new(BridgeRegistry::new(Duration::from_secs(30)));
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register("u1", tx);

        let bridge = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let frame = rx.recv().await.unwrap();
                assert_eq!(frame.kind, BridgeMessageType::Request);
                registry.handle_message(&conn, ok_response(&frame.id));
            })
        };

        let response = registry.route_request("u1", request()).await.unwrap();
        bridge.await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn bridge_error_becomes_remote_failure() {
        let registry = Arc::new(BridgeRegistry::new(Duration::from_secs(30)));
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register("u1", tx);

        let registry_clone = Arc::clone(&registry);
        tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            registry_clone.complete(&conn, BridgeMessage::response_error(&frame.id, "model not loaded"));
        });

        let err = registry.route_request("u1", request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Remote(msg) if msg == "model not loaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_bridge_times_out_without_residue() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let (tx, _rx) = mpsc::channel(8);
        registry.register("u1", tx);

        let err = registry.route_request("u1", request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_outbound_queue_still_times_out() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let (tx, _rx) = mpsc::channel(1);
        let conn = registry.register("u1", tx);
        // Writer never drains; the only slot is taken.
        conn.send(BridgeMessage::ping()).await.unwrap();

        let started = tokio::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(120),
            registry.route_request("u1", request()),
        )
        .await
        .expect("request must resolve by its deadline");

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(started.elapsed() <= Duration::from_secs(31));
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.is_connected("u1"));
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_requests() {
        let registry = Arc::new(BridgeRegistry::new(Duration::from_secs(30)));
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register("u1", tx);

        let registry_clone = Arc::clone(&registry);
        tokio::spawn(async move {
            let _frame = rx.recv().await.unwrap();
            registry_clone.unregister(&conn);
        });

        let err = registry.route_request("u1", request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected(_)));
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.is_connected("u1"));
    }

    #[tokio::test]
    async fn send_failure_evicts_connection() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let (tx, rx) = mpsc::channel(8);
        registry.register("u1", tx);
        drop(rx);

        let err = registry.route_request("u1", request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Disconnected(_)));
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_from_other_bridge_is_ignored() {
        let registry = Arc::new(BridgeRegistry::new(Duration::from_secs(30)));
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let owner = registry.register("u1", tx1);
        let intruder = registry.register("u2", tx2);

        let registry_clone = Arc::clone(&registry);
        tokio::spawn(async move {
            let frame = rx1.recv().await.unwrap();
            assert!(!registry_clone.complete(&intruder, ok_response(&frame.id)));
            assert!(registry_clone.complete(&owner, ok_response(&frame.id)));
        });

        let response = registry.route_request("u1", request()).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let registry = BridgeRegistry::new(Duration::from_secs(30));
        let (tx, _rx) = mpsc::channel(8);
        let conn = registry.register("u1", tx);

        let reply = registry.handle_message(&conn, BridgeMessage::ping()).unwrap();
        assert_eq!(reply.kind, BridgeMessageType::Pong);
    }
}
