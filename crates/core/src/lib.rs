//! Core domain types and shared logic for cask.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Block identifiers and block layout
//! - The chunker that cuts a byte stream into blocks
//! - Upload session lifecycle
//! - Progress tracking shared with pollers
//! - Configuration

pub mod block;
pub mod chunker;
pub mod config;
pub mod error;
pub mod progress;
pub mod upload;

pub use block::{Block, BlockId, BlockSpan};
pub use chunker::Chunker;
pub use error::{Error, Result};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use upload::{SessionState, UploadId, UploadSession};

/// Default block size: 4 MiB
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Maximum block size a single stage call accepts: 4000 MiB
pub const MAX_BLOCK_SIZE: u64 = 4000 * 1024 * 1024;

/// Minimum block size: 1 byte
pub const MIN_BLOCK_SIZE: u64 = 1;

/// Maximum number of blocks one object may be committed from.
pub const MAX_BLOCK_COUNT: u64 = 50_000;

/// Default largest accepted object: 512 MiB
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 512 * 1024 * 1024;

/// Default read-link lifetime: 24 hours
pub const DEFAULT_LINK_TTL_SECS: u64 = 24 * 60 * 60;
