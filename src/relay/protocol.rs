//! Encrypted tunnel wire protocol.
//!
//! Frames are JSON objects tagged by `type`:
//! `keyExchange{publicKey, userId?, role?}`, `sessionEstablished{sessionId, publicKey}`,
//! `encryptedData{encryptedData, sessionId?}`, `ping`, `pong`, `error{message}`.

use serde::{Deserialize, Serialize};

/// Which side of the tunnel an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    /// The bridge side, running next to the user's model runtime.
    Device,
    /// The user's compute unit.
    Container,
}

impl EndpointRole {
    pub fn counterpart(self) -> Self {
        match self {
            EndpointRole::Device => EndpointRole::Container,
            EndpointRole::Container => EndpointRole::Device,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum TunnelMessage {
    KeyExchange {
        public_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<EndpointRole>,
    },
    SessionEstablished {
        session_id: String,
        public_key: String,
    },
    EncryptedData {
        encrypted_data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Ping,
    Pong,
    Error {
        message: String,
    },
}

impl TunnelMessage {
    pub fn error(message: impl Into<String>) -> Self {
        TunnelMessage::Error {
            message: message.into(),
        }
    }

    /// Frame name for logs. Never includes payload.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelMessage::KeyExchange { .. } => "keyExchange",
            TunnelMessage::SessionEstablished { .. } => "sessionEstablished",
            TunnelMessage::EncryptedData { .. } => "encryptedData",
            TunnelMessage::Ping => "ping",
            TunnelMessage::Pong => "pong",
            TunnelMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_are_camel_case() {
        let value = serde_json::to_value(TunnelMessage::EncryptedData {
            encrypted_data: "AAAA".into(),
            session_id: Some("s1".into()),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "encryptedData", "encryptedData": "AAAA", "sessionId": "s1"})
        );
    }

    #[test]
    fn key_exchange_without_role_parses() {
        let msg: TunnelMessage =
            serde_json::from_str(r#"{"type":"keyExchange","publicKey":"k","userId":"u1"}"#).unwrap();
        assert_eq!(
            msg,
            TunnelMessage::KeyExchange {
                public_key: "k".into(),
                user_id: Some("u1".into()),
                role: None,
            }
        );

        let msg: TunnelMessage =
            serde_json::from_str(r#"{"type":"keyExchange","publicKey":"k","role":"container"}"#).unwrap();
        assert!(matches!(
            msg,
            TunnelMessage::KeyExchange { role: Some(EndpointRole::Container), .. }
        ));
    }

    #[test]
    fn unit_frames() {
        assert_eq!(
            serde_json::to_string(&TunnelMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
        assert_eq!(
            serde_json::from_str::<TunnelMessage>(r#"{"type":"pong"}"#).unwrap(),
            TunnelMessage::Pong
        );
    }
}
