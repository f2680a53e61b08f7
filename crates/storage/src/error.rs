/// Errors produced by storage adapters.
///
/// Adapters report expected conditions (missing paths, network failures,
/// rejected sessions) through this type instead of panicking; the transfer
/// layer treats every variant as "stop the tick and persist state".
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// The provider no longer accepts the stored resumable session. The
    /// adapter has already dropped the session entry; the file must restart.
    #[error("upload session expired: {0}")]
    SessionExpired(String),
}

impl StorageError {
    /// Shorthand for a provider-reported failure.
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Returns `true` if the failure requires restarting the current file.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}
