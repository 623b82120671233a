//! Health check endpoint.

use crate::error::{UploadError, UploadResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    pub busy: bool,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated, for load balancers and probes. Reports whether an upload
/// is currently in flight so clients can avoid a busy rejection.
pub async fn health_check(State(state): State<AppState>) -> UploadResult<Json<HealthResponse>> {
    state
        .storage
        .health_check()
        .await
        .map_err(|e| UploadError::Internal(format!("storage health check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.storage.backend_name(),
        busy: state.service.is_busy(),
    }))
}
