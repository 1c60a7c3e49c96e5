//! Tunnel registry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("{0}")]
    Validation(String),

    #[error("no tunnel registered for user {0}")]
    NotFound(String),

    #[error("tunnel {presented} is not the current registration")]
    Conflict { presented: String },
}

/// Registration payload supplied by the tunnel agent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    pub public_url: String,
    pub local_url: String,
    pub share_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelMetadata {
    pub agent: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRegistration {
    pub tunnel_id: String,
    pub user_id: String,
    pub public_url: String,
    pub local_url: String,
    pub share_token: String,
    pub protocol: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: TunnelMetadata,
    #[serde(skip)]
    pub(crate) heartbeat_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHealth {
    pub tunnel_id: String,
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub response_time_ms: Option<u64>,
}

impl TunnelHealth {
    pub fn new(tunnel_id: &str) -> Self {
        Self {
            tunnel_id: tunnel_id.to_string(),
            is_healthy: true,
            last_check: None,
            consecutive_failures: 0,
            response_time_ms: None,
        }
    }
}

/// A registration together with its latest health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelView {
    #[serde(flatten)]
    pub registration: TunnelRegistration,
    pub health: Option<TunnelHealth>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_info: Option<TunnelView>,
}
