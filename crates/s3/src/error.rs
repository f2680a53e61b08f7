use stowaway_storage::StorageError;

/// Errors from the object store API.
#[derive(Debug, thiserror::Error)]
pub enum S3Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("XML encode error: {0}")]
    XmlEncode(#[from] quick_xml::SeError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("signing error: {0}")]
    Signing(String),
}

impl S3Error {
    /// The multipart upload id is unknown to the server (aborted or expired).
    pub fn is_no_such_upload(&self) -> bool {
        matches!(self, Self::Api { code, .. } if code == "NoSuchUpload")
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
            || matches!(self, Self::Api { code, .. } if code == "NoSuchKey")
    }
}

impl From<S3Error> for StorageError {
    fn from(err: S3Error) -> Self {
        StorageError::provider("s3", err.to_string())
    }
}
