//! Shared account key.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use rand_core::{OsRng, RngCore};
use std::fmt;

/// Length of generated keys in bytes.
pub const GENERATED_KEY_LEN: usize = 64;

/// Secret shared between the link issuer and whoever serves the links.
#[derive(Clone)]
pub struct AccountKey {
    bytes: Vec<u8>,
}

impl AccountKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a base64-encoded key.
    pub fn from_base64(s: &str) -> SignerResult<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;

        if bytes.is_empty() {
            return Err(SignerError::KeyParsing("key is empty".to_string()));
        }

        Ok(Self { bytes })
    }

    /// Encode as base64.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountKey([REDACTED])")
    }
}
