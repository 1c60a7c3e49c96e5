//! Operator endpoints under `/admin`, guarded by the configured API key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/bridges", get(get_bridges))
        .route("/admin/relay", get(get_relay))
        .route("/admin/tunnels", get(get_tunnels))
        .route("/admin/compute", get(get_compute))
        .route("/admin/compute/terminate-all", post(terminate_all))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
