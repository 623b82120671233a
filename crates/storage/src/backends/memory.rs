//! In-process block store.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlockStore, ObjectLocation, ObjectMeta, ObjectProperties, check_block_order};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cask_core::BlockId;
use dashmap::DashMap;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::instrument;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: OffsetDateTime,
}

/// Block store kept in memory. Contents are lost when it is dropped.
#[derive(Default)]
pub struct MemoryBackend {
    staged: DashMap<String, BTreeMap<u32, Bytes>>,
    objects: DashMap<String, StoredObject>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[async_trait]
impl BlockStore for MemoryBackend {
    #[instrument(skip(self, data), fields(backend = "memory", block = id.index(), size = data.len()))]
    async fn stage_block(&self, object: &str, id: &BlockId, data: Bytes) -> StorageResult<()> {
        self.staged
            .entry(object.to_string())
            .or_default()
            .insert(id.index(), data);
        Ok(())
    }

    #[instrument(skip(self, blocks, properties), fields(backend = "memory", blocks = blocks.len()))]
    async fn commit_block_list(
        &self,
        object: &str,
        blocks: &[BlockId],
        properties: ObjectProperties,
    ) -> StorageResult<ObjectLocation> {
        check_block_order(object, blocks)?;

        // Assemble while holding only the staged entry; the object map is
        // touched after it is released.
        let data = {
            let staged = self.staged.get(object);
            let mut data = BytesMut::new();
            for id in blocks {
                let block = staged
                    .as_ref()
                    .and_then(|s| s.get(&id.index()))
                    .ok_or_else(|| StorageError::MissingBlock {
                        object: object.to_string(),
                        block: id.to_string(),
                    })?;
                data.extend_from_slice(block);
            }
            data.freeze()
        };

        let size = data.len() as u64;
        self.objects.insert(
            object.to_string(),
            StoredObject {
                data,
                content_type: properties.content_type,
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        self.staged.remove(object);

        Ok(ObjectLocation {
            name: object.to_string(),
            size,
        })
    }

    async fn staged_blocks(&self, object: &str) -> StorageResult<Vec<BlockId>> {
        Ok(self
            .staged
            .get(object)
            .map(|s| s.keys().copied().map(BlockId::from_index).collect())
            .unwrap_or_default())
    }

    async fn get(&self, object: &str) -> StorageResult<Bytes> {
        self.objects
            .get(object)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(object.to_string()))
    }

    async fn exists(&self, object: &str) -> StorageResult<bool> {
        Ok(self.objects.contains_key(object))
    }

    async fn head(&self, object: &str) -> StorageResult<ObjectMeta> {
        self.objects
            .get(object)
            .map(|o| ObjectMeta {
                size: o.data.len() as u64,
                last_modified: Some(o.last_modified),
                content_type: o.content_type.clone(),
            })
            .ok_or_else(|| StorageError::NotFound(object.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_concatenates_in_list_order() {
        let store = MemoryBackend::new();
        let blocks: Vec<_> = (0..3).map(BlockId::from_index).collect();
        for (id, data) in blocks.iter().zip(["a", "bb", "ccc"]).rev() {
            store.stage_block("o", id, Bytes::from(data)).await.unwrap();
        }

        let location = store
            .commit_block_list(
                "o",
                &blocks,
                ObjectProperties {
                    content_type: Some("text/plain".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(location.size, 6);
        assert_eq!(store.get("o").await.unwrap(), Bytes::from("abbccc"));
        assert_eq!(
            store.head("o").await.unwrap().content_type.as_deref(),
            Some("text/plain")
        );
        assert!(store.staged_blocks("o").await.unwrap().is_empty());
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_block_fails_commit() {
        let store = MemoryBackend::new();
        store
            .stage_block("o", &BlockId::from_index(1), Bytes::from("x"))
            .await
            .unwrap();
        let blocks: Vec<_> = (0..2).map(BlockId::from_index).collect();
        let result = store
            .commit_block_list("o", &blocks, ObjectProperties::default())
            .await;
        assert!(matches!(result, Err(StorageError::MissingBlock { .. })));
        assert!(!store.exists("o").await.unwrap());
        assert_eq!(store.staged_blocks("o").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restage_replaces() {
        let store = MemoryBackend::new();
        let id = BlockId::from_index(0);
        store.stage_block("o", &id, Bytes::from("old")).await.unwrap();
        store.stage_block("o", &id, Bytes::from("new")).await.unwrap();
        store
            .commit_block_list("o", &[id], ObjectProperties::default())
            .await
            .unwrap();
        assert_eq!(store.get("o").await.unwrap(), Bytes::from("new"));
    }

    #[tokio::test]
    async fn test_missing_object_not_found() {
        let store = MemoryBackend::new();
        assert!(matches!(store.get("nope").await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.head("nope").await, Err(StorageError::NotFound(_))));
        assert!(!store.exists("nope").await.unwrap());
        assert_eq!(store.backend_name(), "memory");
        store.health_check().await.unwrap();
    }
}
