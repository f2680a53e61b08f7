//! Chunked, resumable transfers driven in bounded ticks.
//!
//! A [`ChunkingManager`] walks a [`TransferIterator`] over `(from, to)`
//! pairs and moves bytes through a [`StorageAdapter`] one chunk at a time.
//! After every tick the iterator position and the provider session bag are
//! saved through a [`StateStore`], so the next tick (possibly in another
//! process) resumes where this one stopped.
//!
//! [`StorageAdapter`]: stowaway_storage::StorageAdapter

mod iterator;
mod maintenance;
mod manager;
mod progress;
mod state;
mod upload_info;

pub use iterator::{ItemKind, IteratorPosition, TransferItem, TransferIterator};
pub use maintenance::MaintenanceSweeper;
pub use manager::{ChunkConfig, ChunkingManager, Direction, TickReport, TickStatus};
pub use progress::SpeedCalculator;
pub use state::{JsonFileStore, MemoryStore, StateStore, TransferState};
pub use upload_info::{UploadInfo, UploadStatus};

use stowaway_storage::StorageError;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("position {index} is past the last of {len} items")]
    InvalidPosition { index: usize, len: usize },

    #[error("invalid transfer id: {0}")]
    InvalidId(String),
}
