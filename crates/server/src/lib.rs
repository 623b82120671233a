//! Upload service and HTTP surface for cask.
//!
//! This crate provides:
//! - Admission control (single flight plus a token bucket)
//! - Block staging with retry and bounded parallelism
//! - Local spooling of the inbound stream
//! - Block list commit and read-link issuance
//! - The HTTP routes served by `caskd`

pub mod admission;
pub mod committer;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod retry;
pub mod routes;
pub mod service;
pub mod staging;
pub mod state;
pub mod uploader;

pub use admission::{AdmissionController, AdmissionPermit, Rejection};
pub use error::{RetryHint, UploadError, UploadResult};
pub use routes::create_router;
pub use service::{CommittedUpload, SessionHandle, UploadOutcome, UploadRequest, UploadService};
pub use state::AppState;
