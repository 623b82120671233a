//! Upload session types and lifecycle.

use crate::block::BlockId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    /// Generate a new random upload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::UploadSession(format!("invalid upload ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadId({})", self.0)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload session lifecycle state.
///
/// ```text
/// Idle -> Receiving -> Staging -> Committing -> Committed
///            |            |           |
///            +------------+-----------+------> Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session is running.
    Idle,
    /// The inbound stream is being received (and spooled locally if enabled).
    Receiving,
    /// Blocks are being staged to the block store.
    Staging,
    /// The block list is being committed.
    Committing,
    /// The object was finalized.
    Committed,
    /// The session was abandoned.
    Failed,
}

impl SessionState {
    /// Check if the session reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Check whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Receiving)
                | (Receiving, Staging)
                | (Staging, Committing)
                | (Committing, Committed)
                | (Receiving | Staging | Committing, Failed)
        )
    }

    /// Lowercase name used in logs and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Receiving => "receiving",
            Self::Staging => "staging",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum object name length in bytes.
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

/// Validate an object name supplied by a caller.
pub fn validate_object_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidObjectName("name is empty".to_string()));
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(crate::Error::InvalidObjectName(format!(
            "name is {} bytes (max {MAX_OBJECT_NAME_LEN})",
            name.len()
        )));
    }
    if name.starts_with('/') || name.contains('\\') {
        return Err(crate::Error::InvalidObjectName(format!(
            "name must be a relative path: {name}"
        )));
    }
    if name.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(crate::Error::InvalidObjectName(format!(
            "name contains an empty, '.' or '..' segment: {name}"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(crate::Error::InvalidObjectName(
            "name contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// An active upload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: UploadId,
    /// Object name the upload finalizes into.
    pub name: String,
    /// Content type stored with the object.
    pub content_type: Option<String>,
    /// Declared size in bytes.
    pub total_size: u64,
    /// Block size for this upload.
    pub block_size: u64,
    /// Identifiers of blocks staged so far, in index order.
    pub block_ids: Vec<BlockId>,
    /// Bytes staged so far.
    pub uploaded_bytes: u64,
    /// Current session state.
    pub state: SessionState,
    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session must be finished by.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new upload session in the `Idle` state.
    pub fn new(
        name: impl Into<String>,
        content_type: Option<String>,
        total_size: u64,
        block_size: u64,
        expires_in: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: UploadId::new(),
            name: name.into(),
            content_type,
            total_size,
            block_size,
            block_ids: Vec::new(),
            uploaded_bytes: 0,
            state: SessionState::Idle,
            created_at: now,
            expires_at: now + expires_in,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: SessionState) -> crate::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(crate::Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            upload_id = %self.id,
            from = %self.state,
            to = %next,
            "Upload session state change"
        );
        self.state = next;
        Ok(())
    }

    /// Record a staged block.
    ///
    /// Blocks may finish out of order; the list is kept sorted by index.
    pub fn record_block(&mut self, id: BlockId, len: u64) {
        let pos = self.block_ids.partition_point(|existing| existing < &id);
        if self.block_ids.get(pos) != Some(&id) {
            self.block_ids.insert(pos, id);
            self.uploaded_bytes += len;
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Calculate the expected number of blocks.
    pub fn expected_block_count(&self) -> u64 {
        crate::block::block_count(self.total_size, self.block_size)
    }

    /// Whether every block has been staged, with indices `0..n` and no gaps.
    pub fn all_blocks_staged(&self) -> bool {
        self.block_ids.len() as u64 == self.expected_block_count()
            && self
                .block_ids
                .iter()
                .enumerate()
                .all(|(i, id)| id.index() as usize == i)
            && self.uploaded_bytes == self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u64, block: u64) -> UploadSession {
        UploadSession::new("a.bin", None, total, block, time::Duration::seconds(60))
    }

    #[test]
    fn test_upload_id_roundtrip() {
        let id = UploadId::new();
        let parsed = UploadId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(UploadId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut s = session(10, 4);
        for next in [
            SessionState::Receiving,
            SessionState::Staging,
            SessionState::Committing,
            SessionState::Committed,
        ] {
            s.transition(next).unwrap();
        }
        assert!(s.state.is_terminal());
        assert!(s.transition(SessionState::Failed).is_err());
    }

    #[test]
    fn test_state_machine_failure_edges() {
        for from in [
            SessionState::Receiving,
            SessionState::Staging,
            SessionState::Committing,
        ] {
            assert!(from.can_transition_to(SessionState::Failed));
        }
        assert!(!SessionState::Idle.can_transition_to(SessionState::Failed));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Committing));
        assert!(!SessionState::Staging.can_transition_to(SessionState::Committed));
        assert!(!SessionState::Failed.can_transition_to(SessionState::Idle));
    }

    #[test]
    fn test_record_block_out_of_order() {
        let mut s = session(10, 4);
        s.record_block(BlockId::from_index(2), 2);
        s.record_block(BlockId::from_index(0), 4);
        assert!(!s.all_blocks_staged());
        s.record_block(BlockId::from_index(1), 4);
        // Re-recording the same block does not double count.
        s.record_block(BlockId::from_index(1), 4);

        let indices: Vec<_> = s.block_ids.iter().map(BlockId::index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(s.uploaded_bytes, 10);
        assert!(s.all_blocks_staged());
    }

    #[test]
    fn test_expected_block_count() {
        assert_eq!(session(100, 64).expected_block_count(), 2);
        assert_eq!(session(128, 64).expected_block_count(), 2);
        assert_eq!(session(0, 64).expected_block_count(), 0);
    }

    #[test]
    fn test_session_expired() {
        let s = UploadSession::new("a", None, 1, 1, time::Duration::seconds(-1));
        assert!(s.is_expired());
    }

    #[test]
    fn test_validate_object_name() {
        assert!(validate_object_name("report.pdf").is_ok());
        assert!(validate_object_name("dir/sub/file.bin").is_ok());
        for bad in ["", "/abs", "a/../b", "..", "a//b", "a\\b", "tab\there"] {
            assert!(validate_object_name(bad).is_err(), "{bad:?} accepted");
        }
        assert!(validate_object_name(&"x".repeat(MAX_OBJECT_NAME_LEN + 1)).is_err());
    }
}
