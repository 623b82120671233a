//! Block stores with scripted failures for pipeline tests.

use async_trait::async_trait;
use bytes::Bytes;
use cask_core::BlockId;
use cask_storage::{
    BlockStore, MemoryBackend, ObjectLocation, ObjectMeta, ObjectProperties, StorageError,
    StorageResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// A [`MemoryBackend`] wrapper that can fail or hold stage and commit calls
/// and counts what reaches it.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryBackend,
    transient_failures: u32,
    fatal_block: Option<u32>,
    gate: Option<Arc<Semaphore>>,
    fail_commit: bool,
    commit_gate: Option<Arc<Semaphore>>,
    attempts: Mutex<HashMap<u32, u32>>,
    staged_sizes: Mutex<BTreeMap<u32, usize>>,
    stage_calls: AtomicU32,
    commit_calls: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` stage attempts of every block with a transient error.
    pub fn with_transient_failures(mut self, n: u32) -> Self {
        self.transient_failures = n;
        self
    }

    /// Reject every attempt to stage block `index` with a non-retryable error.
    pub fn with_fatal_block(mut self, index: u32) -> Self {
        self.fatal_block = Some(index);
        self
    }

    /// Hold each stage call until a permit is added to the returned semaphore.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Refuse every commit with a non-retryable error.
    pub fn with_failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// Hold each commit call until a permit is added to the returned semaphore.
    pub fn gated_commit(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.commit_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn stage_calls(&self) -> u32 {
        self.stage_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Size of the last successful stage of each block, by index.
    pub fn staged_sizes(&self) -> Vec<usize> {
        self.staged_sizes.lock().unwrap().values().copied().collect()
    }

    /// Committed object content.
    pub async fn object(&self, name: &str) -> Bytes {
        self.inner.get(name).await.unwrap()
    }

    pub fn object_count(&self) -> usize {
        self.inner.object_count()
    }
}

#[async_trait]
impl BlockStore for ScriptedStore {
    async fn stage_block(&self, object: &str, id: &BlockId, data: Bytes) -> StorageResult<()> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| StorageError::Unavailable("gate closed".to_string()))?;
            permit.forget();
        }

        let index = id.index();
        if self.fatal_block == Some(index) {
            return Err(StorageError::PermissionDenied(format!(
                "block {index} refused"
            )));
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(index).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.transient_failures {
            return Err(StorageError::Unavailable(format!(
                "block {index} attempt {attempt} throttled"
            )));
        }

        self.staged_sizes.lock().unwrap().insert(index, data.len());
        self.inner.stage_block(object, id, data).await
    }

    async fn commit_block_list(
        &self,
        object: &str,
        blocks: &[BlockId],
        properties: ObjectProperties,
    ) -> StorageResult<ObjectLocation> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.commit_gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| StorageError::Unavailable("gate closed".to_string()))?;
            permit.forget();
        }
        if self.fail_commit {
            return Err(StorageError::PermissionDenied(format!(
                "commit of {object} refused"
            )));
        }

        self.inner.commit_block_list(object, blocks, properties).await
    }

    async fn staged_blocks(&self, object: &str) -> StorageResult<Vec<BlockId>> {
        self.inner.staged_blocks(object).await
    }

    async fn get(&self, object: &str) -> StorageResult<Bytes> {
        self.inner.get(object).await
    }

    async fn exists(&self, object: &str) -> StorageResult<bool> {
        self.inner.exists(object).await
    }

    async fn head(&self, object: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(object).await
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
