//! Block storage abstraction and backends for cask.
//!
//! This crate provides:
//! - The [`BlockStore`] capability: stage blocks, then commit an ordered block list
//! - Backends: local filesystem and in-memory

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use traits::{BlockStore, ObjectLocation, ObjectMeta, ObjectProperties};

use cask_core::config::StorageConfig;
use std::sync::Arc;

/// Create a block store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlockStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            if path.as_os_str().is_empty() {
                return Err(StorageError::Config(
                    "storage.path cannot be empty".to_string(),
                ));
            }
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryBackend::new())),
    }
}
