//! Upload error taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use cask_storage::StorageError;
use serde::Serialize;
use std::time::Duration;

/// What a caller should do after a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryHint {
    /// The service is busy; try again once the current session is done.
    RetryLater,
    /// A transient fault; retrying with backoff may succeed.
    RetryWithBackoff,
    /// The request will not succeed as sent.
    DoNotRetry,
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Retry guidance.
    pub retry: RetryHint,
}

/// Errors surfaced by the upload service.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("another upload is in progress")]
    RejectedBusy,

    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RejectedRateLimited { retry_after_secs: u64 },

    #[error("block {block} failed after {attempts} attempts: {source}")]
    TransientIo {
        block: u32,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("block {block} could not be staged: {source}")]
    FatalStage {
        block: u32,
        #[source]
        source: StorageError,
    },

    #[error("source stream failed: {0}")]
    Read(#[source] cask_core::Error),

    #[error("commit failed: {0}")]
    Commit(#[source] StorageError),

    #[error("session deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("signing error: {0}")]
    Signing(#[from] cask_signer::SignerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RejectedBusy => "busy",
            Self::RejectedRateLimited { .. } => "rate_limit_exceeded",
            Self::TransientIo { .. } => "transient_io_error",
            Self::FatalStage { .. } => "fatal_stage_error",
            Self::Read(_) => "read_error",
            Self::Commit(_) => "commit_error",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::Signing(_) => "signing_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RejectedBusy => StatusCode::CONFLICT,
            Self::RejectedRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::TransientIo { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::FatalStage { .. } => StatusCode::BAD_GATEWAY,
            Self::Read(_) => StatusCode::BAD_REQUEST,
            Self::Commit(_) => StatusCode::BAD_GATEWAY,
            Self::DeadlineExceeded(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retry guidance for the caller.
    pub fn retry_hint(&self) -> RetryHint {
        match self {
            Self::RejectedBusy | Self::RejectedRateLimited { .. } => RetryHint::RetryLater,
            Self::TransientIo { .. } | Self::DeadlineExceeded(_) | Self::Read(_) => {
                RetryHint::RetryWithBackoff
            }
            Self::Validation(_)
            | Self::FatalStage { .. }
            | Self::Commit(_)
            | Self::Signing(_)
            | Self::Internal(_) => RetryHint::DoNotRetry,
        }
    }
}

impl From<cask_core::Error> for UploadError {
    fn from(e: cask_core::Error) -> Self {
        use cask_core::Error;
        match e {
            Error::Read { .. } | Error::SizeMismatch { .. } => Self::Read(e),
            Error::InvalidTransition { .. } => Self::Internal(e.to_string()),
            Error::InvalidBlockSize { .. }
            | Error::TooManyBlocks { .. }
            | Error::InvalidBlockId(_)
            | Error::InvalidObjectName(_)
            | Error::UploadSession(_) => Self::Validation(e.to_string()),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            retry: self.retry_hint(),
        };

        if let Self::RejectedRateLimited { retry_after_secs } = self {
            return (
                status,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(body),
            )
                .into_response();
        }
        (status, Json(body)).into_response()
    }
}

/// Result type for upload operations and handlers.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
