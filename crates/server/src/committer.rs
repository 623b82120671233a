//! Finalizing a fully staged session.

use crate::error::{UploadError, UploadResult};
use crate::metrics;
use cask_core::UploadSession;
use cask_storage::{BlockStore, ObjectLocation, ObjectProperties};
use std::sync::Arc;

/// Submits a session's ordered block list to the store, once.
#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn BlockStore>,
}

impl Committer {
    /// Create a committer for `store`.
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// Commit `session`'s block list.
    ///
    /// The session must have every block staged, indices `0..n` without gaps.
    /// Anything else is a bug in the caller and is reported as an internal
    /// error without touching the store. A failed commit is not retried: the
    /// object stays unfinalized and its staged blocks are left behind.
    #[tracing::instrument(skip(self, session), fields(upload_id = %session.id, object = %session.name))]
    pub async fn commit(&self, session: &UploadSession) -> UploadResult<ObjectLocation> {
        if !session.all_blocks_staged() {
            tracing::error!(
                staged = session.block_ids.len(),
                expected = session.expected_block_count(),
                uploaded_bytes = session.uploaded_bytes,
                total_size = session.total_size,
                "Refusing to commit an incomplete block list"
            );
            return Err(UploadError::Internal(format!(
                "commit requested with {} of {} blocks staged",
                session.block_ids.len(),
                session.expected_block_count()
            )));
        }

        let properties = ObjectProperties {
            content_type: session.content_type.clone(),
        };

        let timer = metrics::UPLOAD_COMMIT_DURATION.start_timer();
        let result = self
            .store
            .commit_block_list(&session.name, &session.block_ids, properties)
            .await;
        timer.observe_duration();

        let location = result.map_err(UploadError::Commit)?;
        tracing::info!(
            size = location.size,
            blocks = session.block_ids.len(),
            "Block list committed"
        );
        Ok(location)
    }
}
