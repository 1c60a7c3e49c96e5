//! Tunnel registry routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::server::AppState;
use crate::security::{verify_service_key, AuthUser};
use crate::tunnels::{Discovery, TunnelHealth, TunnelInfo};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub tunnel_info: TunnelInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelIdBody {
    pub tunnel_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub tunnel_id: String,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub success: bool,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

pub async fn register(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> Result<Json<Registered>, ApiError> {
    let body = json_body(body)?;
    let tunnel_id = state.tunnels.register(&user.user_id, body.tunnel_info)?;
    Ok(Json(Registered { tunnel_id }))
}

pub async fn discover_own(State(state): State<AppState>, user: AuthUser) -> Json<Discovery> {
    Json(state.tunnels.discover(&user.user_id))
}

/// Discovery for compute units, authenticated by `X-Service-Key`.
pub async fn discover_for_service(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Discovery>, ApiError> {
    verify_service_key(&headers, state.config.auth.service_key.as_deref())?;
    Ok(Json(state.tunnels.discover(&user_id)))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<TunnelIdBody>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let body = json_body(body)?;
    state.tunnels.heartbeat(&user.user_id, &body.tunnel_id)?;
    Ok(Json(Ack { success: true }))
}

pub async fn unregister(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<TunnelIdBody>, JsonRejection>,
) -> Result<Json<Ack>, ApiError> {
    let body = json_body(body)?;
    state.tunnels.unregister(&user.user_id, &body.tunnel_id)?;
    Ok(Json(Ack { success: true }))
}

pub async fn health(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(tunnel_id): Path<String>,
) -> Result<Json<TunnelHealth>, ApiError> {
    state
        .tunnels
        .health(&tunnel_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no health record for tunnel {tunnel_id}")))
}
