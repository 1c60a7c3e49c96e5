//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the relay gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Bearer token verification.
    pub auth: AuthConfig,

    /// Bridge connections and proxied request correlation.
    pub bridge: BridgeConfig,

    /// Encrypted tunnel relay.
    pub relay: RelayConfig,

    /// Per-user compute units.
    pub compute: ComputeConfig,

    /// Public tunnel registry.
    pub tunnels: TunnelConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin endpoints.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum accepted request body for control-plane and proxied calls.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Identity provider settings.
///
/// Either `jwks_url` (asymmetric keys published by the provider) or
/// `hs256_secret` (shared secret) must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// URL of the provider's published JSON Web Key Set.
    pub jwks_url: Option<String>,

    /// Expected `iss` claim.
    pub issuer: Option<String>,

    /// Expected `aud` claim.
    pub audience: Option<String>,

    /// Shared HS256 secret, used instead of JWKS when set.
    pub hs256_secret: Option<String>,

    /// How long fetched signing keys are trusted before refetching.
    pub jwks_cache_secs: u64,

    /// Key presented by compute units in `X-Service-Key` to discover tunnels.
    pub service_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            issuer: None,
            audience: None,
            hs256_secret: None,
            jwks_cache_secs: 300,
            service_key: None,
        }
    }
}

impl AuthConfig {
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_secs)
    }
}

/// Bridge connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Deadline for a proxied request to receive its response.
    pub request_timeout_secs: u64,

    /// Keep-alive ping cadence.
    pub ping_interval_secs: u64,

    /// Outbound frames buffered per connection before sends back up.
    pub outbound_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            ping_interval_secs: 30,
            outbound_buffer: 64,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// Encrypted tunnel relay settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Keep-alive ping cadence.
    pub ping_interval_secs: u64,

    /// Outbound frames buffered per endpoint. A full buffer drops the frame.
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            outbound_buffer: 64,
        }
    }
}

impl RelayConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

/// Compute unit lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Container CLI to drive ("docker" or "podman").
    pub runtime_binary: String,

    /// Image started for each unit.
    pub image: String,

    /// Memory cap in MiB.
    pub memory_mb: u64,

    /// CPU share (fraction of one core).
    pub cpu_share: f64,

    /// Shared network every unit joins in addition to its isolated one.
    pub control_network: String,

    /// Grace period given to a unit on stop before it is killed.
    pub stop_grace_secs: u64,

    /// Idle time after which the reaper terminates a unit.
    pub idle_timeout_secs: u64,

    /// Reaper cadence.
    pub reap_interval_secs: u64,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            runtime_binary: "docker".to_string(),
            image: "inference-relay/streaming-proxy:latest".to_string(),
            memory_mb: 512,
            cpu_share: 0.5,
            control_network: "inference-relay-control".to_string(),
            stop_grace_secs: 10,
            idle_timeout_secs: 600,
            reap_interval_secs: 60,
        }
    }
}

impl ComputeConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

/// Tunnel registry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Health probe cadence.
    pub probe_interval_secs: u64,

    /// Timeout for a single reachability probe.
    pub probe_timeout_secs: u64,

    /// Consecutive probe failures before a tunnel is marked unhealthy.
    pub unhealthy_threshold: u32,

    /// Stale sweep cadence.
    pub sweep_interval_secs: u64,

    /// Heartbeat age after which a registration is deleted.
    pub heartbeat_timeout_secs: u64,

    /// Accept `publicUrl` hosts that are loopback, private or link-local
    /// literals. Probes are sent from the control plane, so keep this off
    /// outside local development.
    pub allow_internal_public_urls: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            probe_timeout_secs: 5,
            unhealthy_threshold: 3,
            sweep_interval_secs: 60,
            heartbeat_timeout_secs: 600,
            allow_internal_public_urls: false,
        }
    }
}

impl TunnelConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Placeholder admin key; validation refuses to start with it.
pub const ADMIN_KEY_PLACEHOLDER: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: ADMIN_KEY_PLACEHOLDER.to_string(),
        }
    }
}
