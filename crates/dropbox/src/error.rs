use stowaway_storage::StorageError;

/// Errors from the Dropbox API.
#[derive(Debug, thiserror::Error)]
pub enum DropboxError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {summary}")]
    Api { status: u16, summary: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid access token")]
    InvalidToken,

    #[error("path not found: {0}")]
    NotFound(String),

    /// The upload session id is unknown, closed, or at another offset.
    #[error("upload session rejected: {0}")]
    SessionExpired(String),
}

impl From<DropboxError> for StorageError {
    fn from(err: DropboxError) -> Self {
        match err {
            DropboxError::SessionExpired(msg) => StorageError::SessionExpired(msg),
            DropboxError::NotFound(path) => StorageError::NotFound(path),
            other => StorageError::provider("dropbox", other.to_string()),
        }
    }
}
