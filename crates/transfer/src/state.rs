//! Durable per-transfer checkpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use stowaway_storage::{BoxFuture, SessionBag};
use tracing::debug;

use crate::{IteratorPosition, TransferError};

/// Everything a fresh manager needs to resume a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    pub position: IteratorPosition,
    #[serde(default)]
    pub session: SessionBag,
    /// Computed once on the first tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

/// Key-value persistence for [`TransferState`], keyed by transfer id.
pub trait StateStore: Send + Sync {
    fn load<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<Option<TransferState>, TransferError>>;

    fn save<'a>(
        &'a self,
        id: &'a str,
        state: &'a TransferState,
    ) -> BoxFuture<'a, Result<(), TransferError>>;

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TransferError>>;
}

/// Stores each transfer as `<dir>/<id>.json`.
///
/// Writes go to a temporary file that is renamed over the old one, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, TransferError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !id.starts_with('.');
        if !valid {
            return Err(TransferError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    async fn read(&self, id: &str) -> Result<Option<TransferState>, TransferError> {
        let path = self.path_for(id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&data)?;
        debug!(id, path = %path.display(), "loaded transfer state");
        Ok(Some(state))
    }

    async fn write(&self, id: &str, state: &TransferState) -> Result<(), TransferError> {
        let path = self.path_for(id)?;
        let json = serde_json::to_vec_pretty(state)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(id, index = state.position.index, offset = state.position.offset, "saved transfer state");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), TransferError> {
        match tokio::fs::remove_file(self.path_for(id)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for JsonFileStore {
    fn load<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferState>, TransferError>> {
        Box::pin(self.read(id))
    }

    fn save<'a>(
        &'a self,
        id: &'a str,
        state: &'a TransferState,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(self.write(id, state))
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TransferError>> {
        Box::pin(self.delete(id))
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<String, TransferState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored state for `id`.
    pub fn get(&self, id: &str) -> Option<TransferState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl StateStore for MemoryStore {
    fn load<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<TransferState>, TransferError>> {
        let state = self.get(id);
        Box::pin(async move { Ok(state) })
    }

    fn save<'a>(
        &'a self,
        id: &'a str,
        state: &'a TransferState,
    ) -> BoxFuture<'a, Result<(), TransferError>> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), state.clone());
        Box::pin(async { Ok(()) })
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), TransferError>> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Box::pin(async { Ok(()) })
    }
}
