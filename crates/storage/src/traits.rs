//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use cask_core::BlockId;

/// Properties stored with a committed object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectProperties {
    /// MIME type served with the object.
    pub content_type: Option<String>,
}

/// Where a committed object landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectLocation {
    /// Object name inside the store.
    pub name: String,
    /// Committed size in bytes.
    pub size: u64,
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// A store that assembles objects from individually staged blocks.
///
/// Blocks are staged under an identifier and stay invisible until
/// [`commit_block_list`](Self::commit_block_list) names them. Staging the same
/// identifier again replaces the earlier content, so a block can be retried
/// without producing duplicates.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Stage one block of `object` under `id`.
    async fn stage_block(&self, object: &str, id: &BlockId, data: Bytes) -> StorageResult<()>;

    /// Finalize `object` from `blocks`, concatenated in list order.
    ///
    /// Every listed block must have been staged. Staged blocks that are not
    /// listed are discarded. On failure nothing becomes visible.
    async fn commit_block_list(
        &self,
        object: &str,
        blocks: &[BlockId],
        properties: ObjectProperties,
    ) -> StorageResult<ObjectLocation>;

    /// Identifiers staged for `object` and not yet committed, in index order.
    async fn staged_blocks(&self, object: &str) -> StorageResult<Vec<BlockId>>;

    /// Get a committed object's content.
    async fn get(&self, object: &str) -> StorageResult<Bytes>;

    /// Check if a committed object exists.
    async fn exists(&self, object: &str) -> StorageResult<bool>;

    /// Get a committed object's metadata without fetching content.
    async fn head(&self, object: &str) -> StorageResult<ObjectMeta>;

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "memory", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Check whether the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not reachable or misconfigured.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Check that a commit list is strictly increasing by block index.
pub(crate) fn check_block_order(object: &str, blocks: &[BlockId]) -> StorageResult<()> {
    if blocks.windows(2).all(|pair| pair[0] < pair[1]) {
        Ok(())
    } else {
        Err(StorageError::UnorderedBlockList {
            object: object.to_string(),
        })
    }
}
