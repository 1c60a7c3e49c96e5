//! Bridge wire protocol.
//!
//! Every frame is a JSON envelope `{type, id, data|error, timestamp}`:
//! - `auth` (server → bridge): connection acknowledged
//! - `ping` / `pong`: keep-alive in either direction
//! - `request` (server → bridge): proxied HTTP call, `data` = [`ProxyRequest`]
//! - `response` (bridge → server): reply to the `request` with the same `id`,
//!   `data` = [`ProxyResponse`] or `error` set

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMessageType {
    Auth,
    Ping,
    Pong,
    Request,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeMessage {
    #[serde(rename = "type")]
    pub kind: BridgeMessageType,

    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// HTTP call forwarded to the bridge's local model runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Reply produced by the local model runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl BridgeMessage {
    fn new(kind: BridgeMessageType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            data: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn auth_ack(connection_id: &str, user_id: &str) -> Self {
        let mut msg = Self::new(BridgeMessageType::Auth, connection_id);
        msg.data = Some(serde_json::json!({
            "connectionId": connection_id,
            "userId": user_id,
        }));
        msg
    }

    pub fn ping() -> Self {
        Self::new(BridgeMessageType::Ping, uuid::Uuid::new_v4().to_string())
    }

    pub fn pong(id: &str) -> Self {
        Self::new(BridgeMessageType::Pong, id)
    }

    pub fn request(request_id: &str, request: &ProxyRequest) -> Self {
        let mut msg = Self::new(BridgeMessageType::Request, request_id);
        msg.data = serde_json::to_value(request).ok();
        msg
    }

    pub fn response(request_id: &str, response: &ProxyResponse) -> Self {
        let mut msg = Self::new(BridgeMessageType::Response, request_id);
        msg.data = serde_json::to_value(response).ok();
        msg
    }

    pub fn response_error(request_id: &str, error: impl Into<String>) -> Self {
        let mut msg = Self::new(BridgeMessageType::Response, request_id);
        msg.error = Some(error.into());
        msg
    }
}
