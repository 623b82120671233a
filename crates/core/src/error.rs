//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid block size: {size} (must be between {min} and {max})")]
    InvalidBlockSize { size: u64, min: u64, max: u64 },

    #[error("too many blocks: {count} exceeds the limit of {max}")]
    TooManyBlocks { count: u64, max: u64 },

    #[error("invalid block id: {0}")]
    InvalidBlockId(String),

    #[error("invalid object name: {0}")]
    InvalidObjectName(String),

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::upload::SessionState,
        to: crate::upload::SessionState,
    },

    #[error("read error at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("size mismatch: declared {declared} bytes, stream produced {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
