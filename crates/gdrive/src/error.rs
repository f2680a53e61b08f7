use stowaway_storage::StorageError;

/// Errors from the Drive API.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid access token")]
    InvalidToken,

    /// The resumable session URI is no longer valid (404/410).
    #[error("resumable session expired: {0}")]
    SessionExpired(String),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl From<DriveError> for StorageError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::SessionExpired(uri) => StorageError::SessionExpired(uri),
            other => StorageError::provider("gdrive", other.to_string()),
        }
    }
}
