//! Block staging with retry and bounded parallelism.

use crate::error::{UploadError, UploadResult};
use crate::metrics;
use crate::retry::{RetryPolicy, run_with_retry};
use cask_core::{Block, BlockId, ProgressTracker, UploadSession};
use cask_storage::BlockStore;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;

/// A block that reached the store.
#[derive(Debug, Clone)]
pub struct StagedBlock {
    /// Identifier the block was staged under.
    pub id: BlockId,
    /// Bytes staged.
    pub len: u64,
}

/// Stages blocks to a [`BlockStore`], reporting progress as each one lands.
#[derive(Clone)]
pub struct BlockUploader {
    store: Arc<dyn BlockStore>,
    retry: RetryPolicy,
    progress: Arc<ProgressTracker>,
    max_parallel: usize,
}

impl BlockUploader {
    /// Create an uploader staging at most `max_parallel` blocks at once.
    pub fn new(
        store: Arc<dyn BlockStore>,
        retry: RetryPolicy,
        progress: Arc<ProgressTracker>,
        max_parallel: usize,
    ) -> Self {
        Self {
            store,
            retry,
            progress,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Stage one block, retrying transient failures.
    ///
    /// Staging under the same identifier overwrites, so retries never
    /// duplicate data.
    #[tracing::instrument(skip(self, session, block), fields(upload_id = %session.id, block = block.index()))]
    pub async fn stage(&self, session: &UploadSession, block: Block) -> UploadResult<StagedBlock> {
        let index = block.index();
        let len = block.len();
        let started = Instant::now();

        let object = session.name.as_str();
        let id = &block.id;
        let data = &block.data;
        let store = &self.store;
        run_with_retry(&self.retry, move || store.stage_block(object, id, data.clone()))
            .await
            .map_err(|exhausted| {
                if exhausted.error.is_transient() {
                    UploadError::TransientIo {
                        block: index,
                        attempts: exhausted.attempts,
                        source: exhausted.error,
                    }
                } else {
                    UploadError::FatalStage {
                        block: index,
                        source: exhausted.error,
                    }
                }
            })?;

        metrics::BLOCK_STAGE_DURATION.observe(started.elapsed().as_secs_f64());
        metrics::BLOCKS_STAGED.inc();
        metrics::BYTES_STAGED.inc_by(len);

        let snapshot = self.progress.update(session.id, len);
        tracing::debug!(
            len,
            uploaded_bytes = snapshot.uploaded_bytes,
            percent = snapshot.percent,
            "Block staged"
        );

        Ok(StagedBlock {
            id: block.id,
            len,
        })
    }

    /// Stage every block produced by `blocks`, recording each in `session`.
    ///
    /// Up to `max_parallel` stages run at once; they may finish in any order,
    /// and `session.block_ids` stays sorted by index regardless. The first
    /// failure, from the source stream or from a stage, drops every stage
    /// still in flight and is returned.
    pub async fn stage_all<S>(&self, session: &mut UploadSession, blocks: S) -> UploadResult<()>
    where
        S: Stream<Item = cask_core::Result<Block>>,
    {
        let view = session.clone();
        let view = &view;
        let staged = blocks
            .map(|block| async move {
                let block = block.map_err(UploadError::from)?;
                self.stage(view, block).await
            })
            .buffer_unordered(self.max_parallel);
        let mut staged = std::pin::pin!(staged);

        while let Some(result) = staged.next().await {
            let block = result?;
            session.record_block(block.id, block.len);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cask_core::Chunker;
    use cask_storage::MemoryBackend;

    fn session(name: &str, size: u64, block_size: u64) -> UploadSession {
        UploadSession::new(name, None, size, block_size, time::Duration::minutes(5))
    }

    #[tokio::test]
    async fn test_stage_all_records_every_block() {
        let store = Arc::new(MemoryBackend::new());
        let progress = Arc::new(ProgressTracker::new());
        let uploader = BlockUploader::new(store.clone(), RetryPolicy::default(), progress.clone(), 4);

        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut session = session("obj.bin", 1000, 64);
        progress.begin(session.id, 1000);

        let blocks = Chunker::new(&data[..], 64)
            .with_expected_size(1000)
            .into_stream();
        uploader.stage_all(&mut session, blocks).await.unwrap();

        assert!(session.all_blocks_staged());
        assert_eq!(session.block_ids.len(), 16);
        assert_eq!(store.staged_blocks("obj.bin").await.unwrap(), session.block_ids);
        assert_eq!(progress.snapshot().uploaded_bytes, 1000);
    }

    #[tokio::test]
    async fn test_stage_all_surfaces_read_errors() {
        let store = Arc::new(MemoryBackend::new());
        let progress = Arc::new(ProgressTracker::new());
        let uploader = BlockUploader::new(store, RetryPolicy::default(), progress, 2);

        let data = vec![0u8; 10];
        let mut session = session("short.bin", 20, 4);
        let blocks = Chunker::new(&data[..], 4).with_expected_size(20).into_stream();
        let err = uploader.stage_all(&mut session, blocks).await.unwrap_err();
        assert!(matches!(err, UploadError::Read(_)), "{err}");
    }
}
