//! Proxied calls to a user's bridge.
//!
//! `ANY /api/bridge/proxy/{*path}` becomes one `request` frame; the bridge's
//! `response` frame becomes the HTTP response.

use std::collections::BTreeMap;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::bridge::{ConnectionInfo, ProxyRequest, ProxyResponse};
use crate::error::ApiError;
use crate::http::server::AppState;
use crate::security::AuthUser;

/// Headers that are never forwarded in either direction.
const SKIPPED_HEADERS: &[&str] = &[
    "authorization",
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn forwardable(name: &str) -> bool {
    !SKIPPED_HEADERS.contains(&name)
}

pub fn to_proxy_request(
    method: &Method,
    path: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<ProxyRequest, ApiError> {
    let mut target = format!("/{}", path.trim_start_matches('/'));
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }

    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter(|(name, _)| forwardable(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let body = if body.is_empty() {
        None
    } else {
        Some(
            String::from_utf8(body.to_vec())
                .map_err(|_| ApiError::Validation("request body must be UTF-8 text".to_string()))?,
        )
    };

    Ok(ProxyRequest {
        method: method.as_str().to_string(),
        path: target,
        headers,
        body,
    })
}

fn into_http(response: ProxyResponse) -> Result<Response, ApiError> {
    let status = StatusCode::from_u16(response.status).map_err(|_| {
        ApiError::BadGateway(format!("bridge returned invalid status {}", response.status))
    })?;

    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        let lower = name.to_ascii_lowercase();
        if !forwardable(&lower) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(lower.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }

    Ok((status, headers, response.body.unwrap_or_default()).into_response())
}

pub async fn proxy_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = to_proxy_request(&method, &path, &uri, &headers, body)?;
    let response = state.bridges.route_request(&user.user_id, request).await?;
    into_http(response)
}

#[derive(Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub connections: Vec<ConnectionInfo>,
}

pub async fn bridge_status(State(state): State<AppState>, user: AuthUser) -> Json<BridgeStatus> {
    let connections = state.bridges.user_connections(&user.user_id);
    Json(BridgeStatus {
        connected: !connections.is_empty(),
        connections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_keeps_query_and_drops_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let uri: Uri = "/api/bridge/proxy/api/chat?stream=false".parse().unwrap();

        let request = to_proxy_request(
            &Method::POST,
            "api/chat",
            &uri,
            &headers,
            Bytes::from_static(b"{\"model\":\"m\"}"),
        )
        .unwrap();

        assert_eq!(request.path, "/api/chat?stream=false");
        assert_eq!(request.method, "POST");
        assert!(!request.headers.contains_key("authorization"));
        assert_eq!(request.headers["content-type"], "application/json");
        assert_eq!(request.body.as_deref(), Some("{\"model\":\"m\"}"));
    }

    #[test]
    fn invalid_bridge_status_is_bad_gateway() {
        let result = into_http(ProxyResponse {
            status: 1000,
            headers: BTreeMap::new(),
            body: None,
        });
        match result {
            Err(err) => assert_eq!(err.status(), StatusCode::BAD_GATEWAY),
            Ok(_) => panic!("invalid status accepted"),
        }
    }
}
