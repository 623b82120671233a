//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid object reference: {0}")]
    InvalidObject(String),

    #[error("invalid link lifetime: {0}")]
    InvalidTtl(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("malformed link: {0}")]
    InvalidLink(String),

    #[error("link is missing the `{0}` parameter")]
    MissingParameter(&'static str),

    #[error("verification failed")]
    VerificationFailed,

    #[error("link expired at {expiry}")]
    Expired { expiry: String },

    #[error("link is not valid before {start}")]
    NotYetValid { start: String },
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
