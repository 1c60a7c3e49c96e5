//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, resource caps sane)
//! - Check that a token verification method is configured
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{GatewayConfig, ADMIN_KEY_PLACEHOLDER};

/// Smallest memory cap the container runtime accepts.
const MIN_MEMORY_MB: u64 = 6;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }

    if config.auth.jwks_url.is_none() && config.auth.hs256_secret.is_none() {
        errors.push(ValidationError::new(
            "auth",
            "either jwks_url or hs256_secret must be set",
        ));
    }
    if matches!(config.auth.hs256_secret.as_deref(), Some("")) {
        errors.push(ValidationError::new("auth.hs256_secret", "must not be empty"));
    }
    if matches!(config.auth.service_key.as_deref(), Some("")) {
        errors.push(ValidationError::new("auth.service_key", "must not be empty"));
    }

    let positive = [
        ("bridge.request_timeout_secs", config.bridge.request_timeout_secs),
        ("bridge.ping_interval_secs", config.bridge.ping_interval_secs),
        ("relay.ping_interval_secs", config.relay.ping_interval_secs),
        ("compute.idle_timeout_secs", config.compute.idle_timeout_secs),
        ("compute.reap_interval_secs", config.compute.reap_interval_secs),
        ("tunnels.probe_interval_secs", config.tunnels.probe_interval_secs),
        ("tunnels.probe_timeout_secs", config.tunnels.probe_timeout_secs),
        ("tunnels.sweep_interval_secs", config.tunnels.sweep_interval_secs),
        ("tunnels.heartbeat_timeout_secs", config.tunnels.heartbeat_timeout_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if config.bridge.outbound_buffer == 0 {
        errors.push(ValidationError::new("bridge.outbound_buffer", "must be greater than zero"));
    }
    if config.relay.outbound_buffer == 0 {
        errors.push(ValidationError::new("relay.outbound_buffer", "must be greater than zero"));
    }
    if config.tunnels.unhealthy_threshold == 0 {
        errors.push(ValidationError::new(
            "tunnels.unhealthy_threshold",
            "must be greater than zero",
        ));
    }

    if !(config.compute.cpu_share > 0.0 && config.compute.cpu_share <= 64.0) {
        errors.push(ValidationError::new(
            "compute.cpu_share",
            format!("{} is outside (0, 64]", config.compute.cpu_share),
        ));
    }
    if config.compute.memory_mb < MIN_MEMORY_MB {
        errors.push(ValidationError::new(
            "compute.memory_mb",
            format!("must be at least {MIN_MEMORY_MB}"),
        ));
    }
    if config.compute.image.trim().is_empty() {
        errors.push(ValidationError::new("compute.image", "must not be empty"));
    }
    if config.compute.control_network.trim().is_empty() {
        errors.push(ValidationError::new("compute.control_network", "must not be empty"));
    }

    if config.admin.enabled
        && (config.admin.api_key.is_empty() || config.admin.api_key == ADMIN_KEY_PLACEHOLDER)
    {
        errors.push(ValidationError::new(
            "admin.api_key",
            "admin is enabled but the api key is unset",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
