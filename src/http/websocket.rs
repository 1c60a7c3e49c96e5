//! WebSocket upgrade handlers.
//!
//! # Responsibilities
//! - Complete the upgrade for authenticated bridge and tunnel peers
//! - Hand the socket to the owning subsystem's dispatch loop
//!
//! # Design Decisions
//! - Authentication happens in middleware before the upgrade, so a bad token
//!   is refused with 401 instead of an accepted-then-closed socket

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::bridge::serve_bridge;
use crate::http::server::AppState;
use crate::relay::serve_tunnel;
use crate::security::AuthUser;

pub async fn bridge_upgrade(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let registry = state.bridges.clone();
    let settings = state.config.bridge.clone();
    ws.on_upgrade(move |socket| {
        serve_bridge(
            socket,
            registry,
            user.user_id,
            settings.ping_interval(),
            settings.outbound_buffer,
        )
    })
}

pub async fn tunnel_upgrade(
    State(state): State<AppState>,
    user: AuthUser,
    ws: WebSocketUpgrade,
) -> Response {
    let relay = state.relay.clone();
    let settings = state.config.relay.clone();
    ws.on_upgrade(move |socket| {
        serve_tunnel(
            socket,
            relay,
            user.user_id,
            settings.ping_interval(),
            settings.outbound_buffer,
        )
    })
}
