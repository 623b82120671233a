pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, split_blocks};

use cask_storage::{BlockStore, FilesystemBackend, MemoryBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// Every backend, each paired with whatever keeps it alive.
#[allow(dead_code)]
pub async fn all_backends() -> Vec<(Arc<dyn BlockStore>, Option<TempDir>)> {
    let dir = TempDir::new().unwrap();
    let fs_backend = FilesystemBackend::new(dir.path()).await.unwrap();
    vec![
        (Arc::new(fs_backend) as Arc<dyn BlockStore>, Some(dir)),
        (Arc::new(MemoryBackend::new()) as Arc<dyn BlockStore>, None),
    ]
}
