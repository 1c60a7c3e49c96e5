//! Control-plane error taxonomy.
//!
//! Every subsystem keeps its own error enum; handlers convert them into
//! [`ApiError`], which renders as `{error, code, details?}` with the matching
//! status class.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::compute::ComputeError;
use crate::security::AuthError;
use crate::tunnels::TunnelError;

/// Errors surfaced by control-plane HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("container runtime failure: {0}")]
    Runtime(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Runtime(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "AUTHENTICATION_ERROR",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Timeout(_) => "TIMEOUT",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Runtime(_) => "RUNTIME_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Authentication(d)
            | ApiError::Validation(d)
            | ApiError::NotFound(d)
            | ApiError::Timeout(d)
            | ApiError::Conflict(d)
            | ApiError::Runtime(d)
            | ApiError::ServiceUnavailable(d)
            | ApiError::BadGateway(d) => Some(d.clone()),
            // Internal details stay in the logs.
            ApiError::Internal(_) => None,
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            ApiError::Authentication(_) => "Authentication required",
            ApiError::Validation(_) => "Invalid request",
            ApiError::NotFound(_) => "Not found",
            ApiError::Timeout(_) => "Request timed out",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Runtime(_) => "Container runtime failure",
            ApiError::ServiceUnavailable(_) => "Service unavailable",
            ApiError::BadGateway(_) => "Bad gateway",
            ApiError::Internal(_) => "Internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "Request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: self.summary().to_string(),
            code: self.code(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Authentication(err.to_string())
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NotConnected(_) => ApiError::NotFound(err.to_string()),
            BridgeError::Timeout(_) => ApiError::Timeout(err.to_string()),
            BridgeError::Disconnected(_) => ApiError::ServiceUnavailable(err.to_string()),
            BridgeError::Remote(_) => ApiError::BadGateway(err.to_string()),
        }
    }
}

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::Validation(_) => ApiError::Validation(err.to_string()),
            TunnelError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TunnelError::Conflict { .. } => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<ComputeError> for ApiError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ComputeError::Runtime(_) => ApiError::Runtime(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes_follow_taxonomy() {
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::from(BridgeError::Disconnected("b".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(TunnelError::Validation("bad".into())).code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        assert!(ApiError::Internal("secret".into()).details().is_none());
        assert_eq!(
            ApiError::NotFound("tunnel".into()).details().as_deref(),
            Some("tunnel")
        );
    }
}
