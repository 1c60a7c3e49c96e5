use axum::{extract::State, Json};
use serde::Serialize;

use crate::bridge::ConnectionInfo;
use crate::compute::{BulkTermination, ComputeUnit};
use crate::http::server::AppState;
use crate::relay::{RelayStats, SessionInfo};
use crate::tunnels::TunnelView;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub bridge_connections: usize,
    pub pending_requests: usize,
    pub relay: RelayStats,
    pub compute_units: usize,
    pub tunnels: usize,
}

#[derive(Serialize)]
pub struct RelaySnapshot {
    pub stats: RelayStats,
    pub sessions: Vec<SessionInfo>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        bridge_connections: state.bridges.connection_count(),
        pending_requests: state.bridges.pending_count(),
        relay: state.relay.stats(),
        compute_units: state.compute.unit_count(),
        tunnels: state.tunnels.len(),
    })
}

pub async fn get_bridges(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.bridges.snapshot())
}

pub async fn get_relay(State(state): State<AppState>) -> Json<RelaySnapshot> {
    Json(RelaySnapshot {
        stats: state.relay.stats(),
        sessions: state.relay.sessions(),
    })
}

pub async fn get_tunnels(State(state): State<AppState>) -> Json<Vec<TunnelView>> {
    Json(state.tunnels.registrations())
}

pub async fn get_compute(State(state): State<AppState>) -> Json<Vec<ComputeUnit>> {
    Json(state.compute.units())
}

pub async fn terminate_all(State(state): State<AppState>) -> Json<BulkTermination> {
    let result = state.compute.terminate_all().await;
    tracing::info!(
        attempted = result.attempted,
        terminated = result.terminated,
        failed = result.failed,
        "Admin bulk termination finished"
    );
    Json(result)
}
