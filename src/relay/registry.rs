//! Zero-knowledge tunnel relay.
//!
//! # Responsibilities
//! - Track tunnel endpoints per user and assign each a role
//! - Pair a device with a container once both have published a public key
//! - Forward `encryptedData` envelopes verbatim to the session's other side
//!
//! # Design Decisions
//! - All relay state sits behind one mutex and every operation completes
//!   without awaiting, so check-then-act sequences (pairing, teardown) are atomic
//! - Delivery uses `try_send`: the relay never buffers beyond the endpoint's
//!   channel and never retries; a full or closed channel drops the frame
//! - Logs carry ids and sizes only, never envelope contents

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crypto::{decode_public_key, CryptoError};
use crate::observability::metrics;
use crate::relay::protocol::{EndpointRole, TunnelMessage};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[from] CryptoError),

    #[error("userId {claimed} does not match the authenticated user")]
    UserMismatch { claimed: String },

    #[error("no session established")]
    NotEstablished,

    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("peer endpoint {0} is not reachable")]
    PeerUnavailable(String),
}

/// Per-endpoint handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointState {
    Connected,
    KeyExchanged,
    SessionEstablished,
}

struct Endpoint {
    user_id: String,
    role: EndpointRole,
    state: EndpointState,
    public_key: Option<String>,
    session_id: Option<String>,
    arrival: u64,
    last_activity: DateTime<Utc>,
    outbound: mpsc::Sender<TunnelMessage>,
}

struct Session {
    user_id: String,
    device_id: String,
    container_id: String,
    established_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub device_connection_id: String,
    pub container_connection_id: String,
    pub established_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub endpoints: usize,
    pub devices: usize,
    pub containers: usize,
    pub awaiting_peer: usize,
    pub sessions: usize,
}

#[derive(Default)]
struct RelayState {
    endpoints: HashMap<String, Endpoint>,
    sessions: HashMap<String, Session>,
    next_arrival: u64,
}

impl RelayState {
    /// Pair `id` with the earliest waiting counterpart, if any.
    fn try_pair(&mut self, id: &str) -> Option<String> {
        let me = self.endpoints.get(id)?;
        if me.state != EndpointState::KeyExchanged {
            return None;
        }
        let my_key = me.public_key.clone()?;
        let my_role = me.role;
        let user_id = me.user_id.clone();

        let (peer_id, peer_key) = self
            .endpoints
            .iter()
            .filter(|(other_id, other)| {
                other_id.as_str() != id
                    && other.user_id == user_id
                    && other.role == my_role.counterpart()
                    && other.state == EndpointState::KeyExchanged
            })
            .min_by_key(|(_, other)| other.arrival)
            .and_then(|(other_id, other)| {
                other.public_key.clone().map(|key| (other_id.clone(), key))
            })?;

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let (device_id, container_id) = match my_role {
            EndpointRole::Device => (id.to_string(), peer_id.clone()),
            EndpointRole::Container => (peer_id.clone(), id.to_string()),
        };

        for (endpoint_id, counterpart_key) in [(id, &peer_key), (peer_id.as_str(), &my_key)] {
            if let Some(endpoint) = self.endpoints.get_mut(endpoint_id) {
                endpoint.state = EndpointState::SessionEstablished;
                endpoint.session_id = Some(session_id.clone());
                endpoint.last_activity = now;
                let notice = TunnelMessage::SessionEstablished {
                    session_id: session_id.clone(),
                    public_key: counterpart_key.clone(),
                };
                if endpoint.outbound.try_send(notice).is_err() {
                    warn!(connection_id = %endpoint_id, "Could not deliver sessionEstablished");
                }
            }
        }

        info!(
            user_id = %user_id,
            session_id = %session_id,
            device_connection_id = %device_id,
            container_connection_id = %container_id,
            "Tunnel session established"
        );
        self.sessions.insert(
            session_id.clone(),
            Session {
                user_id,
                device_id,
                container_id,
                established_at: now,
                last_activity: now,
            },
        );
        metrics::set_tunnel_sessions(self.sessions.len());
        Some(session_id)
    }

    /// Remove a session and return both of its endpoints to `KeyExchanged`.
    fn end_session(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        for endpoint_id in [&session.device_id, &session.container_id] {
            if let Some(endpoint) = self.endpoints.get_mut(endpoint_id) {
                endpoint.state = EndpointState::KeyExchanged;
                endpoint.session_id = None;
            }
        }
        metrics::set_tunnel_sessions(self.sessions.len());
        Some(session)
    }
}

/// Relay between the device and container endpoints of each user.
#[derive(Default)]
pub struct TunnelRelay {
    state: Mutex<RelayState>,
}

impl TunnelRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a freshly authenticated endpoint.
    ///
    /// The provisional role follows arrival order: the user's first endpoint
    /// is the device, later ones are containers. `keyExchange` may override it.
    pub fn connect(&self, user_id: &str, outbound: mpsc::Sender<TunnelMessage>) -> String {
        let mut state = self.state();
        let has_device = state
            .endpoints
            .values()
            .any(|e| e.user_id == user_id && e.role == EndpointRole::Device);
        let role = if has_device {
            EndpointRole::Container
        } else {
            EndpointRole::Device
        };

        let id = Uuid::new_v4().to_string();
        let arrival = state.next_arrival;
        state.next_arrival += 1;
        state.endpoints.insert(
            id.clone(),
            Endpoint {
                user_id: user_id.to_string(),
                role,
                state: EndpointState::Connected,
                public_key: None,
                session_id: None,
                arrival,
                last_activity: Utc::now(),
                outbound,
            },
        );

        info!(user_id = %user_id, connection_id = %id, role = ?role, "Tunnel endpoint connected");
        id
    }

    /// Record an endpoint's public key and pair it if a counterpart is waiting.
    ///
    /// Returns the new session id when pairing happened.
    pub fn key_exchange(
        &self,
        connection_id: &str,
        public_key: &str,
        claimed_user: Option<&str>,
        role: Option<EndpointRole>,
    ) -> Result<Option<String>, RelayError> {
        decode_public_key(public_key)?;

        let mut state = self.state();
        let endpoint = state
            .endpoints
            .get(connection_id)
            .ok_or_else(|| RelayError::UnknownEndpoint(connection_id.to_string()))?;
        if let Some(claimed) = claimed_user {
            if claimed != endpoint.user_id {
                return Err(RelayError::UserMismatch {
                    claimed: claimed.to_string(),
                });
            }
        }

        // A repeated key exchange replaces the current session.
        if let Some(previous) = endpoint.session_id.clone() {
            state.end_session(&previous);
        }

        if let Some(endpoint) = state.endpoints.get_mut(connection_id) {
            if let Some(role) = role {
                endpoint.role = role;
            }
            endpoint.public_key = Some(public_key.to_string());
            endpoint.state = EndpointState::KeyExchanged;
            endpoint.last_activity = Utc::now();
            debug!(connection_id = %connection_id, role = ?endpoint.role, "Public key received");
        }

        Ok(state.try_pair(connection_id))
    }

    /// Forward an envelope from `from` to the other side of its session.
    ///
    /// The envelope string is moved through untouched. Returns its size.
    pub fn forward(
        &self,
        from: &str,
        encrypted_data: String,
        session_id: Option<&str>,
    ) -> Result<usize, RelayError> {
        let mut state = self.state();
        let now = Utc::now();

        let sender = state
            .endpoints
            .get_mut(from)
            .ok_or_else(|| RelayError::UnknownEndpoint(from.to_string()))?;
        sender.last_activity = now;
        let session_id = match (session_id, sender.session_id.as_deref()) {
            (Some(claimed), Some(own)) if claimed == own => own.to_string(),
            (None, Some(own)) => own.to_string(),
            (Some(claimed), _) => return Err(RelayError::UnknownSession(claimed.to_string())),
            (None, None) => return Err(RelayError::NotEstablished),
        };

        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| RelayError::UnknownSession(session_id.clone()))?;
        session.last_activity = now;
        let target_id = if session.device_id == from {
            session.container_id.clone()
        } else {
            session.device_id.clone()
        };

        let target = state
            .endpoints
            .get(&target_id)
            .ok_or_else(|| RelayError::PeerUnavailable(target_id.clone()))?;
        let size = encrypted_data.len();
        target
            .outbound
            .try_send(TunnelMessage::EncryptedData {
                encrypted_data,
                session_id: Some(session_id.clone()),
            })
            .map_err(|_| RelayError::PeerUnavailable(target_id.clone()))?;

        debug!(session_id = %session_id, from = %from, to = %target_id, bytes = size, "Envelope forwarded");
        Ok(size)
    }

    /// Remove an endpoint. Its session, if any, is destroyed and the surviving
    /// endpoint goes back to waiting for a counterpart.
    pub fn disconnect(&self, connection_id: &str) {
        let mut state = self.state();
        let Some(endpoint) = state.endpoints.remove(connection_id) else {
            return;
        };

        if let Some(session_id) = endpoint.session_id {
            if let Some(session) = state.end_session(&session_id) {
                let survivor = if session.device_id == connection_id {
                    session.container_id
                } else {
                    session.device_id
                };
                info!(
                    session_id = %session_id,
                    survivor = %survivor,
                    "Tunnel session closed by disconnect"
                );
                state.try_pair(&survivor);
            }
        }

        info!(user_id = %endpoint.user_id, connection_id = %connection_id, "Tunnel endpoint disconnected");
    }

    /// Handle a frame from `connection_id`. Returns a reply frame, if any.
    pub fn handle_message(&self, connection_id: &str, msg: TunnelMessage) -> Option<TunnelMessage> {
        match msg {
            TunnelMessage::KeyExchange {
                public_key,
                user_id,
                role,
            } => match self.key_exchange(connection_id, &public_key, user_id.as_deref(), role) {
                Ok(_) => None,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "Key exchange rejected");
                    Some(TunnelMessage::error(e.to_string()))
                }
            },
            TunnelMessage::EncryptedData {
                encrypted_data,
                session_id,
            } => {
                let size = encrypted_data.len();
                match self.forward(connection_id, encrypted_data, session_id.as_deref()) {
                    Ok(_) => metrics::record_tunnel_frame("forwarded"),
                    Err(e) => {
                        metrics::record_tunnel_frame("dropped");
                        warn!(connection_id = %connection_id, bytes = size, reason = %e, "Envelope dropped");
                    }
                }
                None
            }
            TunnelMessage::Ping => {
                self.touch(connection_id);
                Some(TunnelMessage::Pong)
            }
            TunnelMessage::Pong => {
                self.touch(connection_id);
                None
            }
            TunnelMessage::Error { message } => {
                debug!(connection_id = %connection_id, message = %message, "Endpoint reported an error");
                None
            }
            TunnelMessage::SessionEstablished { .. } => Some(TunnelMessage::error(
                "sessionEstablished is sent by the relay only",
            )),
        }
    }

    fn touch(&self, connection_id: &str) {
        if let Some(endpoint) = self.state().endpoints.get_mut(connection_id) {
            endpoint.last_activity = Utc::now();
        }
    }

    pub fn endpoint_state(&self, connection_id: &str) -> Option<EndpointState> {
        self.state().endpoints.get(connection_id).map(|e| e.state)
    }

    pub fn endpoint_role(&self, connection_id: &str) -> Option<EndpointRole> {
        self.state().endpoints.get(connection_id).map(|e| e.role)
    }

    pub fn stats(&self) -> RelayStats {
        let state = self.state();
        let mut stats = RelayStats {
            endpoints: state.endpoints.len(),
            sessions: state.sessions.len(),
            ..RelayStats::default()
        };
        for endpoint in state.endpoints.values() {
            match endpoint.role {
                EndpointRole::Device => stats.devices += 1,
                EndpointRole::Container => stats.containers += 1,
            }
            if endpoint.state == EndpointState::KeyExchanged {
                stats.awaiting_peer += 1;
            }
        }
        stats
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.state()
            .sessions
            .iter()
            .map(|(id, s)| SessionInfo {
                session_id: id.clone(),
                user_id: s.user_id.clone(),
                device_connection_id: s.device_id.clone(),
                container_connection_id: s.container_id.clone(),
                established_at: s.established_at,
                last_activity: s.last_activity,
            })
            .collect()
    }
}
