//! Upload progress shared between the staging path and pollers.

use crate::upload::{SessionState, UploadId};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// Highest percentage reported before the commit succeeds.
pub const MAX_UNCOMMITTED_PERCENT: f64 = 99.0;

/// Point-in-time view of an upload's progress.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Session the snapshot belongs to (`None` when idle).
    pub upload_id: Option<UploadId>,
    /// Bytes staged so far.
    pub uploaded_bytes: u64,
    /// Declared size of the object.
    pub total_bytes: u64,
    /// Completion in `[0, 100]`.
    pub percent: f64,
    /// Lifecycle state.
    pub state: SessionState,
}

impl ProgressSnapshot {
    /// The value reported when no session is running.
    pub fn idle() -> Self {
        Self {
            upload_id: None,
            uploaded_bytes: 0,
            total_bytes: 0,
            percent: 100.0,
            state: SessionState::Idle,
        }
    }
}

#[derive(Default)]
struct TrackerState {
    current: Option<ProgressSnapshot>,
    last_finished: Option<ProgressSnapshot>,
}

/// Thread-safe progress for the active upload.
///
/// Writers call [`update`](Self::update) as blocks finish staging; readers call
/// [`snapshot`](Self::snapshot) from any task. The lock is only held for the
/// arithmetic, never across I/O.
#[derive(Default)]
pub struct ProgressTracker {
    inner: Mutex<TrackerState>,
}

impl ProgressTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("progress tracker mutex was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    /// Start tracking a new session.
    pub fn begin(&self, upload_id: UploadId, total_bytes: u64) {
        let mut state = self.lock();
        state.current = Some(ProgressSnapshot {
            upload_id: Some(upload_id),
            uploaded_bytes: 0,
            total_bytes,
            percent: 0.0,
            state: SessionState::Idle,
        });
    }

    /// Add `bytes` just transferred for `upload_id`.
    ///
    /// The cumulative total never decreases and the percentage stays below 100
    /// until [`finish`](Self::finish) records a commit.
    pub fn update(&self, upload_id: UploadId, bytes: u64) -> ProgressSnapshot {
        let mut state = self.lock();
        let Some(current) = state
            .current
            .as_mut()
            .filter(|c| c.upload_id == Some(upload_id))
        else {
            return ProgressSnapshot::idle();
        };

        current.uploaded_bytes = current
            .uploaded_bytes
            .saturating_add(bytes)
            .min(current.total_bytes);
        let raw = if current.total_bytes == 0 {
            0.0
        } else {
            current.uploaded_bytes as f64 / current.total_bytes as f64 * 100.0
        };
        current.percent = current.percent.max(raw.min(MAX_UNCOMMITTED_PERCENT));
        *current
    }

    /// Record a non-terminal lifecycle change.
    pub fn set_state(&self, upload_id: UploadId, next: SessionState) {
        if next.is_terminal() {
            self.finish(upload_id, next);
            return;
        }
        let mut state = self.lock();
        if let Some(current) = state
            .current
            .as_mut()
            .filter(|c| c.upload_id == Some(upload_id))
        {
            current.state = next;
        }
    }

    /// Close out the session with a terminal state.
    ///
    /// A committed session reports 100%; a failed one keeps the percentage it
    /// had reached.
    pub fn finish(&self, upload_id: UploadId, terminal: SessionState) {
        let mut state = self.lock();
        let matches = state
            .current
            .as_ref()
            .is_some_and(|c| c.upload_id == Some(upload_id));
        if !matches {
            return;
        }
        if let Some(mut done) = state.current.take() {
            done.state = terminal;
            if terminal == SessionState::Committed {
                done.uploaded_bytes = done.total_bytes;
                done.percent = 100.0;
            }
            state.last_finished = Some(done);
        }
    }

    /// Progress of the running session, or the idle value.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock()
            .current
            .unwrap_or_else(ProgressSnapshot::idle)
    }

    /// Progress of a specific session.
    ///
    /// Returns the live value while it runs, its final value once it has
    /// finished (if it was the most recent session), and the idle value
    /// otherwise.
    pub fn snapshot_for(&self, upload_id: UploadId) -> ProgressSnapshot {
        let state = self.lock();
        [state.current, state.last_finished]
            .into_iter()
            .flatten()
            .find(|s| s.upload_id == Some(upload_id))
            .unwrap_or_else(ProgressSnapshot::idle)
    }
}
