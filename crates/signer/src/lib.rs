//! Read-link signing for cask.
//!
//! This crate provides:
//! - Shared account key parsing and generation
//! - HMAC-SHA256 signed, time-limited read links
//! - Local verification of issued links

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::AccountKey;
pub use signer::{AccessGrant, LinkSigner, Permission, SignedLink};
