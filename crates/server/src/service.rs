//! The upload service.
//!
//! One pipeline runs every upload: validation, admission, optional local
//! spooling, block staging, a single commit, and a read link. All state that
//! outlives a request (admission slot, rate limiter, progress) is owned by the
//! [`UploadService`] value, so independent instances never share anything.

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::committer::Committer;
use crate::error::{UploadError, UploadResult};
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::staging::SpoolFile;
use crate::uploader::BlockUploader;
use cask_core::config::{AppConfig, StagingConfig};
use cask_core::upload::validate_object_name;
use cask_core::{
    Chunker, ProgressSnapshot, ProgressTracker, SessionState, UploadId, UploadSession,
};
use cask_signer::{LinkSigner, SignedLink};
use cask_storage::{BlockStore, ObjectLocation};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Parameters of a new upload.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    /// Object name to finalize into.
    pub name: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Content type stored with the object.
    pub content_type: Option<String>,
    /// Block size override; the configured size is used when `None`.
    pub block_size: Option<u64>,
}

impl UploadRequest {
    /// A request using the configured block size and no content type.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            content_type: None,
            block_size: None,
        }
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Override the block size.
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

/// What the staging task hands back once every block is in the store.
struct Staged {
    session: UploadSession,
    permit: AdmissionPermit,
}

/// Handle to an admitted session whose blocks are being staged.
///
/// Pass it to [`UploadService::commit`]. Dropping it, or dropping the commit
/// future before it resolves, abandons the session: staging stops, the
/// session is marked failed and the admission slot is released.
pub struct SessionHandle {
    upload_id: UploadId,
    deadline: tokio::time::Instant,
    task: JoinHandle<UploadResult<Staged>>,
    claim: Option<oneshot::Sender<()>>,
    progress: Arc<ProgressTracker>,
    settled: bool,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("upload_id", &self.upload_id)
            .field("deadline", &self.deadline)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Identifier of the session.
    pub fn upload_id(&self) -> UploadId {
        self.upload_id
    }

    /// When the session stops being allowed to run.
    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.task.abort();
        self.progress.finish(self.upload_id, SessionState::Failed);
        tracing::warn!(upload_id = %self.upload_id, "Upload session abandoned");
    }
}

/// A finalized object. The admission slot is held until this is dropped.
#[derive(Debug)]
pub struct CommittedUpload {
    /// Session that produced the object.
    pub upload_id: UploadId,
    /// Where the object was committed.
    pub location: ObjectLocation,
    /// Number of blocks in the committed list.
    pub blocks: usize,
    _permit: AdmissionPermit,
}

/// Result of a complete upload.
#[derive(Debug)]
pub struct UploadOutcome {
    /// Session that produced the object.
    pub upload_id: UploadId,
    /// Where the object was committed.
    pub location: ObjectLocation,
    /// Number of blocks in the committed list.
    pub blocks: usize,
    /// Read link to the object.
    pub link: SignedLink,
}

/// Everything the background staging task needs.
#[derive(Clone)]
struct SessionTask {
    uploader: BlockUploader,
    progress: Arc<ProgressTracker>,
    staging: StagingConfig,
}

/// Upload pipeline and the state it shares across requests.
pub struct UploadService {
    config: Arc<AppConfig>,
    admission: AdmissionController,
    progress: Arc<ProgressTracker>,
    uploader: BlockUploader,
    committer: Committer,
    signer: LinkSigner,
}

impl UploadService {
    /// Create a service writing to `store` and signing links with `signer`.
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn BlockStore>, signer: LinkSigner) -> Self {
        let progress = Arc::new(ProgressTracker::new());
        let uploader = BlockUploader::new(
            store.clone(),
            RetryPolicy::from(&config.retry),
            progress.clone(),
            config.upload.max_parallel_blocks as usize,
        );

        Self {
            admission: AdmissionController::new(&config.admission),
            committer: Committer::new(store),
            progress,
            uploader,
            signer,
            config,
        }
    }

    /// Check a request against the configured limits.
    ///
    /// Returns the block size the upload will use.
    pub fn validate(&self, request: &UploadRequest) -> UploadResult<u64> {
        let upload = &self.config.upload;

        if request.size == 0 {
            return Err(UploadError::Validation("object is empty".to_string()));
        }
        if request.size > upload.max_object_size {
            return Err(UploadError::Validation(format!(
                "object is {} bytes, larger than the {} byte limit",
                request.size, upload.max_object_size
            )));
        }
        if !upload.allows_content_type(request.content_type.as_deref()) {
            return Err(UploadError::Validation(format!(
                "content type {} is not allowed",
                request.content_type.as_deref().unwrap_or("(none)")
            )));
        }
        validate_object_name(&request.name)?;

        let block_size = request.block_size.unwrap_or(upload.block_size);
        cask_core::block::check_layout(request.size, block_size, upload.max_block_count)?;
        Ok(block_size)
    }

    /// Admit a new session and start staging `source` in the background.
    ///
    /// Validation runs before admission, so a rejected request spends neither
    /// a rate-limit token nor the session slot.
    pub fn start_upload<R>(&self, request: UploadRequest, source: R) -> UploadResult<SessionHandle>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.admit(request, source).inspect_err(|e| {
            metrics::record_upload_error(e.code());
            tracing::info!(error = %e, "Upload request rejected");
        })
    }

    fn admit<R>(&self, request: UploadRequest, source: R) -> UploadResult<SessionHandle>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let block_size = self.validate(&request)?;
        let permit = self.admission.try_admit()?;

        let timeout = self.config.upload.session_timeout();
        let expires_in = time::Duration::try_from(timeout)
            .map_err(|e| UploadError::Internal(format!("invalid session timeout: {e}")))?;
        let mut session = UploadSession::new(
            request.name,
            request.content_type,
            request.size,
            block_size,
            expires_in,
        );
        session.transition(SessionState::Receiving)?;

        let upload_id = session.id;
        self.progress.begin(upload_id, session.total_size);
        self.progress.set_state(upload_id, SessionState::Receiving);

        tracing::info!(
            upload_id = %upload_id,
            object = %session.name,
            size = session.total_size,
            block_size,
            blocks = session.expected_block_count(),
            "Upload session admitted"
        );

        let span = tracing::info_span!("upload_session", upload_id = %upload_id);
        let task = SessionTask {
            uploader: self.uploader.clone(),
            progress: self.progress.clone(),
            staging: self.config.staging.clone(),
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let (claim, claimed) = oneshot::channel();
        let handle = tokio::spawn(
            task.run(session, source, permit, deadline, timeout, claimed)
                .instrument(span),
        );

        Ok(SessionHandle {
            upload_id,
            deadline,
            task: handle,
            claim: Some(claim),
            progress: self.progress.clone(),
            settled: false,
        })
    }

    /// Wait for every block of `handle` to stage, then commit the block list.
    ///
    /// Once the session deadline has passed nothing is committed: the staging
    /// task fails the session, cleans up local staging and releases the slot
    /// on its own. Dropping the returned future before it resolves fails the
    /// session the same way.
    #[tracing::instrument(skip(self, handle), fields(upload_id = %handle.upload_id))]
    pub async fn commit(&self, mut handle: SessionHandle) -> UploadResult<CommittedUpload> {
        let upload_id = handle.upload_id;

        // An unclaimed session is failed by its task when the deadline passes.
        if tokio::time::Instant::now() < handle.deadline
            && let Some(claim) = handle.claim.take()
        {
            let _ = claim.send(());
        }

        let joined = (&mut handle.task).await;
        let Staged {
            mut session,
            permit,
        } = match joined {
            Ok(Ok(staged)) => staged,
            Ok(Err(err)) => {
                handle.settled = true;
                return Err(err);
            }
            Err(join_err) => {
                handle.settled = true;
                let err = UploadError::Internal(format!("staging task failed: {join_err}"));
                self.record_failure(upload_id, &err);
                return Err(err);
            }
        };

        session.transition(SessionState::Committing)?;
        self.progress.set_state(upload_id, SessionState::Committing);

        let committed = self.committer.commit(&session).await;
        handle.settled = true;
        match committed {
            Ok(location) => {
                session.transition(SessionState::Committed)?;
                self.progress.finish(upload_id, SessionState::Committed);
                metrics::UPLOAD_SESSIONS_COMMITTED.inc();
                tracing::info!(
                    object = %location.name,
                    size = location.size,
                    "Upload session committed"
                );
                Ok(CommittedUpload {
                    upload_id,
                    location,
                    blocks: session.block_ids.len(),
                    _permit: permit,
                })
            }
            Err(err) => {
                let _ = session.transition(SessionState::Failed);
                self.record_failure(upload_id, &err);
                Err(err)
            }
        }
    }

    /// Progress of `upload_id`: live while it runs, final once it ended,
    /// idle when unknown.
    pub fn progress(&self, upload_id: UploadId) -> ProgressSnapshot {
        self.progress.snapshot_for(upload_id)
    }

    /// Progress of whatever session is running, or the idle value.
    pub fn current_progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Whether a session currently holds the admission slot.
    pub fn is_busy(&self) -> bool {
        self.admission.is_busy()
    }

    /// Issue a read link to a committed object.
    ///
    /// Uses the configured lifetime unless `ttl` is given.
    pub fn issue_read_link(
        &self,
        location: &ObjectLocation,
        ttl: Option<time::Duration>,
    ) -> UploadResult<SignedLink> {
        let ttl = ttl.unwrap_or_else(|| self.config.link.ttl());
        let link = self
            .signer
            .issue_read_link(&self.config.link.container, &location.name, ttl)?;
        tracing::debug!(
            object = %location.name,
            expires_at = %link.expires_at(),
            "Read link issued"
        );
        Ok(link)
    }

    /// Run a whole upload: start, commit, and issue a read link.
    ///
    /// The admission slot is released after the link is issued, or as soon
    /// as any step fails.
    pub async fn upload<R>(&self, request: UploadRequest, source: R) -> UploadResult<UploadOutcome>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let handle = self.start_upload(request, source)?;
        let committed = self.commit(handle).await?;
        let link = self.issue_read_link(&committed.location, None)?;

        Ok(UploadOutcome {
            upload_id: committed.upload_id,
            location: committed.location,
            blocks: committed.blocks,
            link,
        })
    }

    fn record_failure(&self, upload_id: UploadId, err: &UploadError) {
        self.progress.finish(upload_id, SessionState::Failed);
        metrics::UPLOAD_SESSIONS_FAILED.inc();
        metrics::record_upload_error(err.code());
        tracing::error!(upload_id = %upload_id, error = %err, "Upload session failed");
    }
}

impl SessionTask {
    /// Stage one session and hold it until commit claims it, all within
    /// `deadline`. Past the deadline the session fails and everything it
    /// holds is dropped before the task returns.
    async fn run<R>(
        self,
        session: UploadSession,
        source: R,
        permit: AdmissionPermit,
        deadline: tokio::time::Instant,
        timeout: Duration,
        claimed: oneshot::Receiver<()>,
    ) -> UploadResult<Staged>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let upload_id = session.id;
        let this = &self;
        let lifecycle = async move {
            let staged = this.stage_session(session, source, permit).await?;
            claimed.await.map_err(|_| {
                UploadError::Internal("session handle dropped before commit".to_string())
            })?;
            Ok(staged)
        };

        let outcome = tokio::time::timeout_at(deadline, lifecycle).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                let err = UploadError::DeadlineExceeded(timeout);
                self.progress.finish(upload_id, SessionState::Failed);
                metrics::UPLOAD_SESSIONS_FAILED.inc();
                metrics::record_upload_error(err.code());
                tracing::error!(error = %err, "Upload session deadline passed");
                Err(err)
            }
        }
    }

    /// Receive and stage one session. The permit is dropped on failure and
    /// returned on success.
    async fn stage_session<R>(
        &self,
        mut session: UploadSession,
        source: R,
        permit: AdmissionPermit,
    ) -> UploadResult<Staged>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        match self.stage(&mut session, source).await {
            Ok(()) => {
                tracing::info!(
                    blocks = session.block_ids.len(),
                    bytes = session.uploaded_bytes,
                    "All blocks staged"
                );
                Ok(Staged { session, permit })
            }
            Err(err) => {
                let _ = session.transition(SessionState::Failed);
                self.progress.finish(session.id, SessionState::Failed);
                metrics::UPLOAD_SESSIONS_FAILED.inc();
                metrics::record_upload_error(err.code());
                tracing::error!(error = %err, "Upload session failed while staging");
                drop(permit);
                Err(err)
            }
        }
    }

    async fn stage<R>(&self, session: &mut UploadSession, mut source: R) -> UploadResult<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let size = session.total_size;
        let block_size = session.block_size;

        if !self.staging.enabled {
            self.enter_staging(session)?;
            let blocks = Chunker::new(source, block_size)
                .with_expected_size(size)
                .into_stream();
            return self.uploader.stage_all(session, blocks).await;
        }

        let mut spool = SpoolFile::create(&self.staging)
            .await
            .map_err(|e| UploadError::Internal(format!("failed to create spool file: {e}")))?;
        // One byte past the declared size is enough to detect an oversized body.
        let mut bounded = (&mut source).take(size.saturating_add(1));
        let received = spool.fill(&mut bounded).await?;
        if received != size {
            return Err(UploadError::Read(cask_core::Error::SizeMismatch {
                declared: size,
                actual: received,
            }));
        }

        self.enter_staging(session)?;
        let reader = spool
            .reader()
            .map_err(|e| UploadError::Internal(format!("failed to reopen spool file: {e}")))?;
        let blocks = Chunker::new(reader, block_size)
            .with_expected_size(size)
            .into_stream();
        self.uploader.stage_all(session, blocks).await
    }

    fn enter_staging(&self, session: &mut UploadSession) -> UploadResult<()> {
        session.transition(SessionState::Staging)?;
        self.progress.set_state(session.id, SessionState::Staging);
        Ok(())
    }
}
