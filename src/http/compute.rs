//! Compute unit routes. Every route acts on the caller's own unit.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::compute::{ComputeUnit, StatusReport, TerminateOutcome};
use crate::error::ApiError;
use crate::http::server::AppState;
use crate::security::AuthUser;

pub async fn provision(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ComputeUnit>, ApiError> {
    let unit = state.compute.provision(&user.user_id).await?;
    Ok(Json(unit))
}

pub async fn terminate(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<TerminateOutcome>, ApiError> {
    let outcome = state.compute.terminate(&user.user_id).await?;
    Ok(Json(outcome))
}

pub async fn status(State(state): State<AppState>, user: AuthUser) -> Json<StatusReport> {
    Json(state.compute.status(&user.user_id).await)
}

#[derive(Debug, Serialize)]
pub struct Touched {
    pub success: bool,
}

pub async fn activity(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Touched>, ApiError> {
    if state.compute.touch(&user.user_id) {
        Ok(Json(Touched { success: true }))
    } else {
        Err(ApiError::NotFound(format!(
            "no compute unit for user {}",
            user.user_id
        )))
    }
}
