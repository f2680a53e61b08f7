use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowaway_storage::SessionBag;

use crate::{TickReport, TickStatus};

/// Lifecycle of a transfer to one storage destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

/// Per-destination transfer record owned by the surrounding scheduler.
///
/// The engine only reads and writes [`UploadInfo::session`]; status and
/// timestamps belong to whoever drives the ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadInfo {
    pub storage_id: String,
    pub status: UploadStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session: SessionBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `true` when restoring from the storage instead of uploading to it.
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub progress_percent: f64,
}

impl UploadInfo {
    /// Creates a pending record.
    pub fn new(storage_id: impl Into<String>, download: bool) -> Self {
        Self {
            storage_id: storage_id.into(),
            download,
            ..Self::default()
        }
    }

    /// Marks the transfer as running. A restart clears an earlier error.
    pub fn start(&mut self) {
        self.status = UploadStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
        self.stopped_at = None;
        self.error = None;
    }

    pub fn complete(&mut self) {
        self.status = UploadStatus::Complete;
        self.stopped_at = Some(Utc::now());
        self.session.clear();
    }

    pub fn fail(&mut self, err: impl Into<String>) {
        self.status = UploadStatus::Failed;
        self.error = Some(err.into());
        self.stopped_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = UploadStatus::Cancelled;
        self.stopped_at = Some(Utc::now());
    }

    /// Returns `true` while pending or running.
    pub fn is_active(&self) -> bool {
        matches!(self.status, UploadStatus::Pending | UploadStatus::Running)
    }

    /// Copies the manager's session bag and applies a tick outcome.
    pub fn record_tick(&mut self, report: &TickReport, session: &SessionBag, progress: f64) {
        self.session = session.clone();
        self.progress_percent = progress;
        match report.status {
            TickStatus::Done => self.complete(),
            TickStatus::Failed => self.fail(report.message.clone()),
            TickStatus::Continue => {}
        }
    }
}
