//! Position-addressable iterator over `(from, to)` pairs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stowaway_storage::StorageAdapter;
use tracing::debug;

use crate::TransferError;

/// `(item index, byte offset)` checkpoint. `(len, 0)` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IteratorPosition {
    pub index: usize,
    pub offset: u64,
}

impl IteratorPosition {
    pub fn new(index: usize, offset: u64) -> Self {
        Self { index, offset }
    }
}

/// What the source side of an item was at its last stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File { size: u64 },
    Directory,
    Missing,
}

/// The item under the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    pub from: String,
    pub to: String,
    pub offset: u64,
    pub kind: ItemKind,
}

/// Seekable iterator that tracks cumulative bytes for progress reporting.
///
/// Sizes come from `stat` calls against the source-side adapter: the local
/// adapter for uploads, the remote one for downloads.
pub struct TransferIterator {
    items: Vec<(String, String)>,
    source: Arc<dyn StorageAdapter>,
    position: IteratorPosition,
    kind: ItemKind,
    cumulative: u64,
    total_size: Option<u64>,
    iterations: u64,
}

impl fmt::Debug for TransferIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferIterator")
            .field("items", &self.items.len())
            .field("source", &self.source.name())
            .field("position", &self.position)
            .field("kind", &self.kind)
            .field("cumulative", &self.cumulative)
            .field("total_size", &self.total_size)
            .finish()
    }
}

impl TransferIterator {
    /// Creates an iterator at `(0, 0)`. Call [`Self::rewind`] or
    /// [`Self::seek`] before reading the current item.
    pub fn new(items: Vec<(String, String)>, source: Arc<dyn StorageAdapter>) -> Self {
        Self {
            items,
            source,
            position: IteratorPosition::default(),
            kind: ItemKind::Missing,
            cumulative: 0,
            total_size: None,
            iterations: 0,
        }
    }

    async fn stat_item(&self, index: usize) -> Result<ItemKind, TransferError> {
        let Some((from, _)) = self.items.get(index) else {
            return Ok(ItemKind::Missing);
        };
        let info = self.source.stat(from).await?;
        Ok(if !info.exists {
            ItemKind::Missing
        } else if info.is_dir {
            ItemKind::Directory
        } else {
            ItemKind::File { size: info.size }
        })
    }

    /// Returns to `(0, 0)` with a zeroed byte counter.
    pub async fn rewind(&mut self) -> Result<(), TransferError> {
        self.position = IteratorPosition::default();
        self.cumulative = 0;
        self.kind = self.stat_item(0).await?;
        Ok(())
    }

    /// Jumps to `position`, recomputing the byte counter from the sizes of
    /// the preceding items.
    pub async fn seek(&mut self, position: IteratorPosition) -> Result<(), TransferError> {
        let len = self.items.len();
        if position.index > len {
            return Err(TransferError::InvalidPosition {
                index: position.index,
                len,
            });
        }
        let mut cumulative = 0;
        for index in 0..position.index {
            if let ItemKind::File { size } = self.stat_item(index).await? {
                cumulative += size;
            }
        }
        self.kind = self.stat_item(position.index).await?;
        let offset = match self.kind {
            ItemKind::File { size } => position.offset.min(size),
            _ => 0,
        };
        self.position = IteratorPosition::new(position.index, offset);
        self.cumulative = cumulative + offset;
        debug!(index = position.index, offset, cumulative = self.cumulative, "seeked transfer iterator");
        Ok(())
    }

    /// Re-stats the current item only.
    ///
    /// A source that vanished since the last stat becomes `Missing` and is
    /// skipped by the next [`Self::next`] call.
    pub async fn refresh(&mut self) -> Result<(), TransferError> {
        self.kind = self.stat_item(self.position.index).await?;
        let limit = match self.kind {
            ItemKind::File { size } => size,
            _ => 0,
        };
        if self.position.offset > limit {
            self.cumulative -= self.position.offset - limit;
            self.position.offset = limit;
        }
        Ok(())
    }

    /// The current item; `from` and `to` are empty once terminal.
    pub fn current(&self) -> TransferItem {
        match self.items.get(self.position.index) {
            Some((from, to)) => TransferItem {
                from: from.clone(),
                to: to.clone(),
                offset: self.position.offset,
                kind: self.kind,
            },
            None => TransferItem {
                from: String::new(),
                to: String::new(),
                offset: 0,
                kind: ItemKind::Missing,
            },
        }
    }

    /// Adds `bytes` to the current offset, never past the item's size.
    /// Returns the new offset.
    pub fn update_current_file_offset(&mut self, bytes: u64) -> u64 {
        if let ItemKind::File { size } = self.kind {
            let offset = self.position.offset.saturating_add(bytes).min(size);
            self.cumulative += offset - self.position.offset;
            self.position.offset = offset;
        }
        self.position.offset
    }

    /// Moves the current file back to offset 0.
    pub fn restart_current_file(&mut self) {
        self.cumulative -= self.position.offset;
        self.position.offset = 0;
    }

    /// Advances to the next item when the current one is finished.
    ///
    /// Returns `false` without moving while a file still has bytes left.
    pub async fn next(&mut self) -> Result<bool, TransferError> {
        if self.is_terminal() {
            return Ok(false);
        }
        if let ItemKind::File { size } = self.kind {
            if self.position.offset < size {
                return Ok(false);
            }
        }
        self.position = IteratorPosition::new(self.position.index + 1, 0);
        self.kind = self.stat_item(self.position.index).await?;
        self.iterations += 1;
        Ok(true)
    }

    /// Computes the sum of all existing file sizes. One stat per item.
    pub async fn set_total_size(&mut self) -> Result<u64, TransferError> {
        let mut total = 0;
        for index in 0..self.items.len() {
            if let ItemKind::File { size } = self.stat_item(index).await? {
                total += size;
            }
        }
        self.total_size = Some(total);
        Ok(total)
    }

    /// Restores a total computed by an earlier tick.
    pub fn set_known_total_size(&mut self, total: u64) {
        self.total_size = Some(total);
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn cumulative_bytes(&self) -> u64 {
        self.cumulative
    }

    /// Percentage of `total_size` moved so far, or `-1.0` if the total was
    /// never computed.
    pub fn progress_percent(&self) -> f64 {
        match self.total_size {
            None => -1.0,
            Some(0) => 100.0,
            Some(total) if self.cumulative >= total => 100.0,
            Some(total) => (self.cumulative as f64 / total as f64 * 100.0).clamp(0.0, 100.0),
        }
    }

    pub fn position(&self) -> IteratorPosition {
        self.position
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.position.index >= self.items.len()
    }

    /// Number of times [`Self::next`] moved to another item.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}
