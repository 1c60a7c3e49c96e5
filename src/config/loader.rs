//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config = parse_config(
            r#"
            [auth]
            hs256_secret = "dev-secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.bridge.request_timeout_secs, 30);
        assert_eq!(config.compute.memory_mb, 512);
        assert_eq!(config.tunnels.heartbeat_timeout_secs, 600);
        assert_eq!(config.tunnels.unhealthy_threshold, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let config = parse_config(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [auth]
            jwks_url = "https://issuer.example/.well-known/jwks.json"
            audience = "relay"

            [compute]
            cpu_share = 1.5

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.auth.audience.as_deref(), Some("relay"));
        assert_eq!(config.compute.cpu_share, 1.5);
        assert_eq!(
            config.observability.log_format,
            crate::config::schema::LogFormat::Json
        );
    }

    #[test]
    fn invalid_values_fail_validation() {
        let err = parse_config(
            r#"
            [auth]
            hs256_secret = "s"

            [tunnels]
            probe_interval_secs = 0
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "tunnels.probe_interval_secs");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(parse_config("[auth"), Err(ConfigError::Parse(_))));
    }
}
