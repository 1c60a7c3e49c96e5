use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::http::server::AppState;
use crate::security::bearer_matches;

/// Admin routes take a static bearer key, compared in constant time.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if bearer_matches(request.headers(), &state.config.admin.api_key) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Admin request rejected");
        Err(ApiError::Authentication("invalid admin key".to_string()))
    }
}
