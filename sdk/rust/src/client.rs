use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {code} {details}")]
    Api {
        status: u16,
        code: String,
        details: String,
    },
}

impl SdkError {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            SdkError::Api { status, .. } => Some(*status),
            SdkError::Http(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelInfo {
    pub public_url: String,
    pub local_url: String,
    pub share_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelHealth {
    pub tunnel_id: String,
    pub is_healthy: bool,
    pub last_check: Option<String>,
    pub consecutive_failures: u32,
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    pub tunnel_id: String,
    pub user_id: String,
    pub public_url: String,
    pub local_url: String,
    pub share_token: String,
    pub protocol: String,
    pub registered_at: String,
    pub last_heartbeat: String,
    pub health: Option<TunnelHealth>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub available: bool,
    pub tunnel_info: Option<TunnelRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeUnit {
    pub user_id: String,
    pub unit_id: String,
    pub network_name: String,
    pub container_id: String,
    pub created_at: String,
    pub last_activity: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputeStatus {
    pub status: String,
    pub unit: Option<ComputeUnit>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateOutcome {
    pub terminated: bool,
    pub network_removed: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Registered {
    tunnel_id: String,
}

/// Authenticated client for one user's control-plane routes.
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, SdkError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await?;
        let (code, details) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.details.unwrap_or_default()),
            Err(_) => ("UNKNOWN".to_string(), text),
        };
        Err(SdkError::Api {
            status: status.as_u16(),
            code,
            details,
        })
    }

    /// Register (or replace) the caller's public tunnel. Returns the tunnel id.
    pub async fn register_tunnel(&self, info: &TunnelInfo) -> Result<String, SdkError> {
        let resp = self
            .request(Method::POST, "/api/tunnels/register")
            .json(&json!({ "tunnelInfo": info }))
            .send()
            .await?;
        Ok(Self::parse::<Registered>(resp).await?.tunnel_id)
    }

    pub async fn discover(&self) -> Result<Discovery, SdkError> {
        let resp = self.request(Method::GET, "/api/tunnels/discover").send().await?;
        Self::parse(resp).await
    }

    /// Discovery on behalf of a compute unit, using the service key instead of
    /// the user token.
    pub async fn discover_for(&self, user_id: &str, service_key: &str) -> Result<Discovery, SdkError> {
        let resp = self
            .client
            .get(format!("{}/api/tunnels/discover/{}", self.base_url, user_id))
            .header("x-service-key", service_key)
            .send()
            .await?;
        Self::parse(resp).await
    }

    pub async fn heartbeat(&self, tunnel_id: &str) -> Result<(), SdkError> {
        let resp = self
            .request(Method::POST, "/api/tunnels/heartbeat")
            .json(&json!({ "tunnelId": tunnel_id }))
            .send()
            .await?;
        Self::parse::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn unregister(&self, tunnel_id: &str) -> Result<(), SdkError> {
        let resp = self
            .request(Method::POST, "/api/tunnels/unregister")
            .json(&json!({ "tunnelId": tunnel_id }))
            .send()
            .await?;
        Self::parse::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn tunnel_health(&self, tunnel_id: &str) -> Result<TunnelHealth, SdkError> {
        let resp = self
            .request(Method::GET, &format!("/api/tunnels/{tunnel_id}/health"))
            .send()
            .await?;
        Self::parse(resp).await
    }

    pub async fn provision(&self) -> Result<ComputeUnit, SdkError> {
        let resp = self.request(Method::POST, "/api/compute/provision").send().await?;
        Self::parse(resp).await
    }

    pub async fn terminate(&self) -> Result<TerminateOutcome, SdkError> {
        let resp = self.request(Method::POST, "/api/compute/terminate").send().await?;
        Self::parse(resp).await
    }

    pub async fn compute_status(&self) -> Result<ComputeStatus, SdkError> {
        let resp = self.request(Method::GET, "/api/compute/status").send().await?;
        Self::parse(resp).await
    }

    pub async fn touch(&self) -> Result<(), SdkError> {
        let resp = self.request(Method::POST, "/api/compute/activity").send().await?;
        Self::parse::<serde_json::Value>(resp).await.map(|_| ())
    }
}
