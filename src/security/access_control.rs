//! Access control middleware.
//!
//! User routes require a verified bearer token; the resolved user id is
//! attached to the request as [`AuthUser`]. WebSocket upgrades may carry the
//! token as `?token=` since browsers cannot set headers on them.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::security::auth::{AuthContext, AuthError};

pub const SERVICE_KEY_HEADER: &str = "x-service-key";

/// Context attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

pub async fn require_user(
    State(auth): State<Arc<AuthContext>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer_token(req.headers()) {
        Some(token) => token.to_string(),
        None if is_upgrade(req.headers()) => {
            query_token(req.uri().query()).ok_or(AuthError::MissingToken)?
        }
        None => return Err(AuthError::MissingToken.into()),
    };

    let claims = auth.verify(&token).await.map_err(|e| {
        tracing::debug!(error = %e, path = %req.uri().path(), "Token rejected");
        ApiError::from(e)
    })?;

    req.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
    });
    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AuthError::MissingToken.into())
    }
}

/// Check `X-Service-Key` against the configured key in constant time.
pub fn verify_service_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AuthError> {
    let expected = expected.ok_or(AuthError::InvalidServiceKey)?;
    let presented = headers
        .get(SERVICE_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::InvalidServiceKey)?;

    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidServiceKey)
    }
}

/// Constant-time bearer check for a static key (admin routes).
pub fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    bearer_token(headers).is_some_and(|t| bool::from(t.as_bytes().ct_eq(expected.as_bytes())))
}
