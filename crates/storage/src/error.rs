//! Storage error types.

use std::io::ErrorKind;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("block {block} was never staged for {object}")]
    MissingBlock { object: String, block: String },

    #[error("block list for {object} is not in increasing index order")]
    UnorderedBlockList { object: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network-shaped I/O failures and [`StorageError::Unavailable`] are
    /// transient. Everything else is a property of the request or of the
    /// store and will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::Interrupted
                    | ErrorKind::TimedOut
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
