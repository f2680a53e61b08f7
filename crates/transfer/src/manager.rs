//! Tick-driven transfer driver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use stowaway_storage::{
    ChunkRequest, DEFAULT_CHUNK_SIZE, Deadline, SessionBag, StorageAdapter,
};
use tracing::{debug, info, warn};

use crate::{
    ItemKind, IteratorPosition, StateStore, TransferError, TransferItem, TransferIterator,
    TransferState,
};

/// Which way bytes flow relative to the remote adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local files to remote storage.
    Upload,
    /// Remote storage to local files.
    Download,
}

/// Tuning for chunk calls and tick budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Bytes per copy call; `None` copies each file to EOF in one call.
    pub chunk_size: Option<u64>,
    /// Budget handed to each copy call.
    pub chunk_timeout: Option<Duration>,
    /// Wall-clock budget of one tick.
    pub tick_timeout: Option<Duration>,
    /// Maximum loop iterations per tick.
    pub max_iterations: Option<u32>,
    /// Pause between iterations; counts against `tick_timeout`.
    pub throttle: Option<Duration>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            chunk_timeout: None,
            tick_timeout: None,
            max_iterations: None,
            throttle: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickStatus {
    /// Every item was transferred.
    Done,
    /// A step failed; state was saved at the last good chunk.
    Failed,
    /// The tick budget ran out; call `tick` again.
    Continue,
}

/// Result of one [`ChunkingManager::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub status: TickStatus,
    pub bytes_this_tick: u64,
    /// Operator-facing detail; carries the provider error on failure.
    pub message: String,
}

/// Drives one transfer in bounded ticks.
///
/// Each tick loads (first tick only) or refreshes the iterator, copies as
/// many chunks as the budget allows and saves a [`TransferState`] before
/// returning, whatever the outcome. The manager never retries; a failed
/// tick can simply be run again.
pub struct ChunkingManager {
    id: String,
    direction: Direction,
    remote: Arc<dyn StorageAdapter>,
    local: Arc<dyn StorageAdapter>,
    iterator: TransferIterator,
    store: Arc<dyn StateStore>,
    config: ChunkConfig,
    session: SessionBag,
    loaded: bool,
}

impl ChunkingManager {
    pub fn new(
        id: impl Into<String>,
        direction: Direction,
        remote: Arc<dyn StorageAdapter>,
        local: Arc<dyn StorageAdapter>,
        items: Vec<(String, String)>,
        store: Arc<dyn StateStore>,
        config: ChunkConfig,
    ) -> Self {
        let source = match direction {
            Direction::Upload => Arc::clone(&local),
            Direction::Download => Arc::clone(&remote),
        };
        Self {
            id: id.into(),
            direction,
            remote,
            local,
            iterator: TransferIterator::new(items, source),
            store,
            config,
            session: SessionBag::new(),
            loaded: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress_percent(&self) -> f64 {
        self.iterator.progress_percent()
    }

    pub fn position(&self) -> IteratorPosition {
        self.iterator.position()
    }

    pub fn session(&self) -> &SessionBag {
        &self.session
    }

    pub fn iterator(&self) -> &TransferIterator {
        &self.iterator
    }

    fn destination(&self) -> &dyn StorageAdapter {
        match self.direction {
            Direction::Upload => &*self.remote,
            Direction::Download => &*self.local,
        }
    }

    /// Runs one bounded slice of work and persists the checkpoint.
    pub async fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut bytes = 0;
        let (mut status, mut message) = match self.run(&mut bytes).await {
            Ok(outcome) => outcome,
            Err(e) => (TickStatus::Failed, e.to_string()),
        };
        if let Err(e) = self.persist().await {
            warn!(id = %self.id, error = %e, "failed to save transfer state");
            status = TickStatus::Failed;
            message = format!("saving transfer state: {e}");
        }
        let position = self.iterator.position();
        match status {
            TickStatus::Failed => warn!(
                id = %self.id,
                index = position.index,
                offset = position.offset,
                bytes,
                %message,
                "transfer tick failed"
            ),
            _ => info!(
                id = %self.id,
                ?status,
                index = position.index,
                offset = position.offset,
                bytes,
                progress = self.iterator.progress_percent(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "transfer tick finished"
            ),
        }
        TickReport {
            status,
            bytes_this_tick: bytes,
            message,
        }
    }

    async fn persist(&self) -> Result<(), TransferError> {
        let state = TransferState {
            position: self.iterator.position(),
            session: self.session.clone(),
            total_size: self.iterator.total_size(),
        };
        self.store.save(&self.id, &state).await
    }

    async fn prepare(&mut self) -> Result<(), TransferError> {
        if self.loaded {
            return self.iterator.refresh().await;
        }
        match self.store.load(&self.id).await? {
            Some(state) => {
                debug!(id = %self.id, index = state.position.index, offset = state.position.offset, "resuming transfer");
                self.iterator.seek(state.position).await?;
                self.session = state.session;
                match state.total_size {
                    Some(total) => self.iterator.set_known_total_size(total),
                    None => {
                        self.iterator.set_total_size().await?;
                    }
                }
            }
            None => {
                self.iterator.rewind().await?;
                let total = self.iterator.set_total_size().await?;
                info!(id = %self.id, items = self.iterator.len(), total, "starting transfer");
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Moves past a finished item, dropping the previous file's sessions.
    async fn advance(&mut self) -> Result<(), TransferError> {
        if self.iterator.next().await? {
            self.session.clear();
        }
        Ok(())
    }

    async fn copy(&mut self, item: &TransferItem) -> Result<u64, stowaway_storage::StorageError> {
        let request = ChunkRequest::new(item.offset)
            .with_max_length(self.config.chunk_size)
            .with_timeout(self.config.chunk_timeout);
        match self.direction {
            Direction::Upload => {
                self.remote
                    .copy_to_storage(&item.from, &item.to, request, &mut self.session)
                    .await
            }
            Direction::Download => {
                self.remote
                    .copy_from_storage(&item.from, &item.to, request, &mut self.session)
                    .await
            }
        }
    }

    async fn run(&mut self, bytes: &mut u64) -> Result<(TickStatus, String), TransferError> {
        let deadline = Deadline::start(self.config.tick_timeout);
        self.prepare().await?;

        let mut iterations = 0u32;
        loop {
            let item = self.iterator.current();
            if self.iterator.is_terminal() {
                return Ok((TickStatus::Done, "transfer complete".to_string()));
            }

            match item.kind {
                ItemKind::Missing => {
                    info!(id = %self.id, from = %item.from, "source missing, skipping");
                    self.advance().await?;
                }
                ItemKind::Directory => {
                    if let Err(e) = self.destination().create_dir(&item.to).await {
                        warn!(id = %self.id, to = %item.to, error = %e, "directory creation failed");
                        return Ok((
                            TickStatus::Failed,
                            format!("creating directory {}: {e}", item.to),
                        ));
                    }
                    self.advance().await?;
                }
                ItemKind::File { size } => match self.copy(&item).await {
                    Err(e) => {
                        if e.is_session_expired() {
                            info!(id = %self.id, from = %item.from, "session expired, restarting file");
                            self.iterator.restart_current_file();
                        }
                        return Ok((
                            TickStatus::Failed,
                            format!(
                                "copying {} to {} at offset {}: {e}",
                                item.from, item.to, item.offset
                            ),
                        ));
                    }
                    Ok(0) if item.offset < size => {
                        return Ok((
                            TickStatus::Continue,
                            format!("no progress on {} at offset {}", item.from, item.offset),
                        ));
                    }
                    Ok(n) => {
                        let before = self.iterator.position().offset;
                        let after = self.iterator.update_current_file_offset(n);
                        *bytes += after - before;
                        debug!(id = %self.id, from = %item.from, offset = after, size, "chunk copied");
                        self.advance().await?;
                    }
                },
            }

            if self.iterator.is_terminal() {
                return Ok((TickStatus::Done, "transfer complete".to_string()));
            }
            iterations += 1;
            if self.config.max_iterations.is_some_and(|max| iterations >= max)
                || deadline.reached()
            {
                return Ok((TickStatus::Continue, "budget exhausted".to_string()));
            }
            if let Some(pause) = self.config.throttle {
                tokio::time::sleep(pause).await;
                if deadline.reached() {
                    return Ok((TickStatus::Continue, "budget exhausted".to_string()));
                }
            }
        }
    }
}
