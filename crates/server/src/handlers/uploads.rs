//! Upload and progress endpoints.

use crate::error::{UploadError, UploadResult};
use crate::service::UploadRequest;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use cask_core::{ProgressSnapshot, SessionState, UploadId};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::StreamReader;

/// Query parameters for POST /v1/uploads.
#[derive(Debug, Deserialize)]
pub struct CreateUploadParams {
    /// Object name.
    pub name: Option<String>,
    /// Block size override in bytes.
    pub block_size: Option<u64>,
}

/// Response for a finished upload.
#[derive(Debug, Serialize)]
pub struct CreateUploadResponse {
    pub upload_id: String,
    pub object: String,
    pub size: u64,
    pub blocks: usize,
    pub url: String,
    pub expires_at: String,
}

/// Progress of one upload.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub upload_id: Option<String>,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
    pub state: SessionState,
}

impl From<ProgressSnapshot> for ProgressResponse {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            upload_id: snapshot.upload_id.map(|id| id.to_string()),
            uploaded_bytes: snapshot.uploaded_bytes,
            total_bytes: snapshot.total_bytes,
            percent: snapshot.percent,
            state: snapshot.state,
        }
    }
}

fn content_length(headers: &HeaderMap) -> UploadResult<u64> {
    let value = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| UploadError::Validation("Content-Length header is required".to_string()))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| UploadError::Validation("invalid Content-Length header".to_string()))
}

/// POST /v1/uploads?name=... - Upload an object from the request body.
///
/// The body is streamed through the pipeline; the response carries a read
/// link to the committed object.
#[tracing::instrument(skip(state, params, headers, body), fields(name = ?params.name))]
pub async fn create_upload(
    State(state): State<AppState>,
    Query(params): Query<CreateUploadParams>,
    headers: HeaderMap,
    body: Body,
) -> UploadResult<(StatusCode, Json<CreateUploadResponse>)> {
    let name = params
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| UploadError::Validation("query parameter `name` is required".to_string()))?;
    let size = content_length(&headers)?;

    let mut request = UploadRequest::new(name, size);
    request.content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    request.block_size = params.block_size;

    let source = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let outcome = state.service.upload(request, source).await?;

    let expires_at = outcome
        .link
        .expires_at()
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| UploadError::Internal(format!("failed to format expires_at: {e}")))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadResponse {
            upload_id: outcome.upload_id.to_string(),
            object: outcome.location.name,
            size: outcome.location.size,
            blocks: outcome.blocks,
            url: outcome.link.url.to_string(),
            expires_at,
        }),
    ))
}

/// GET /v1/progress - Progress of the running upload, or the idle value.
pub async fn current_progress(State(state): State<AppState>) -> Json<ProgressResponse> {
    Json(state.service.current_progress().into())
}

/// GET /v1/uploads/{upload_id}/progress - Progress of a specific upload.
pub async fn get_upload_progress(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> UploadResult<Json<ProgressResponse>> {
    let upload_id = UploadId::parse(&upload_id)?;
    Ok(Json(state.service.progress(upload_id).into()))
}
