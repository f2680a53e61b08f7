//! Resumable session state carried between chunk calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One uploaded part of an object-store multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// Provider-tagged resumable state for a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionState {
    /// Object-store multipart upload in progress.
    Multipart {
        upload_id: String,
        parts: Vec<CompletedPart>,
        /// Sum of the sizes of `parts`.
        uploaded: u64,
    },
    /// Drive resumable upload: the session URI and the confirmed byte count.
    Resumable { resume_uri: String, confirmed: u64 },
    /// Chunked upload session addressed by an explicit cursor.
    Cursor { session_id: String, offset: u64 },
    /// Download bookkeeping: remote id and size captured on the first chunk.
    Download {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_id: Option<String>,
        size: u64,
    },
    /// The upload was committed; further calls must not commit again.
    Complete,
}

/// Per-transfer map from [`session_key`] to [`SessionState`].
///
/// Owned by the transfer state and lent to the adapter for each copy call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionBag {
    entries: BTreeMap<String, SessionState>,
}

impl SessionBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SessionState> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, state: SessionState) {
        self.entries.insert(key.into(), state);
    }

    pub fn remove(&mut self, key: &str) -> Option<SessionState> {
        self.entries.remove(key)
    }

    /// Marks the entry as committed, replacing any in-flight session.
    pub fn mark_complete(&mut self, key: impl Into<String>) {
        self.entries.insert(key.into(), SessionState::Complete);
    }

    pub fn is_complete(&self, key: &str) -> bool {
        matches!(self.entries.get(key), Some(SessionState::Complete))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic per-file session key: hex SHA-256 of `from`, a NUL byte, then `to`.
pub fn session_key(from: &str, to: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update(b"\0");
    hasher.update(to.as_bytes());
    hex::encode(hasher.finalize())
}
