use tracing::debug;

use crate::{ChunkOutcome, DriveApi, DriveError, DriveFile};

/// Client side of a Drive resumable upload session.
///
/// Tracks the session URI and how many bytes Drive has confirmed. Chunks
/// must be sent starting at [`ResumableUpload::progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumableUpload {
    uri: String,
    progress: u64,
    total: u64,
    finished: Option<DriveFile>,
}

impl ResumableUpload {
    /// Opens a new session for a `total`-byte file named `name` in `parent_id`.
    pub async fn start(
        api: &dyn DriveApi,
        parent_id: &str,
        name: &str,
        total: u64,
    ) -> Result<Self, DriveError> {
        let uri = api.start_resumable(parent_id, name, total).await?;
        debug!(name, total, "opened resumable session");
        Ok(Self::resume_from(uri, 0, total))
    }

    /// Rebuilds a session from a stored URI and confirmed byte count.
    pub fn resume_from(uri: impl Into<String>, progress: u64, total: u64) -> Self {
        Self {
            uri: uri.into(),
            progress,
            total,
            finished: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Bytes Drive has confirmed.
    pub fn progress(&self) -> u64 {
        self.progress
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// The created file, once the last chunk was accepted.
    pub fn finished(&self) -> Option<&DriveFile> {
        self.finished.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.finished.is_some()
    }

    /// Sends the bytes starting at [`Self::progress`].
    pub async fn send_chunk(
        &mut self,
        api: &dyn DriveApi,
        data: Vec<u8>,
    ) -> Result<(), DriveError> {
        let outcome = api
            .upload_chunk(&self.uri, self.progress, data, self.total)
            .await?;
        self.apply(outcome);
        Ok(())
    }

    /// Re-reads the confirmed byte count from Drive.
    pub async fn refresh(&mut self, api: &dyn DriveApi) -> Result<(), DriveError> {
        let outcome = api.query_status(&self.uri, self.total).await?;
        self.apply(outcome);
        Ok(())
    }

    fn apply(&mut self, outcome: ChunkOutcome) {
        match outcome {
            ChunkOutcome::Incomplete { confirmed } => self.progress = confirmed,
            ChunkOutcome::Complete(file) => {
                self.progress = self.total;
                self.finished = Some(file);
            }
        }
    }
}
