use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stowaway_s3::S3ClientConfig;

/// The supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    S3,
    GoogleDrive,
    Dropbox,
}

impl StorageKind {
    pub const ALL: [StorageKind; 4] = [Self::Local, Self::S3, Self::GoogleDrive, Self::Dropbox];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::GoogleDrive => "google_drive",
            Self::Dropbox => "dropbox",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one configured storage, tagged by provider.
///
/// Bearer tokens must already be refreshed; they may be left out here and
/// supplied later through [`StorageConfig::set_access_token`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        #[serde(flatten)]
        client: S3ClientConfig,
        /// Key prefix acting as the storage root.
        #[serde(default)]
        prefix: String,
    },
    GoogleDrive {
        #[serde(default)]
        access_token: String,
        /// Folder path below "My Drive".
        #[serde(default)]
        folder: String,
        /// Known id of the storage folder; skips the path walk.
        #[serde(default)]
        folder_id: Option<String>,
    },
    Dropbox {
        #[serde(default)]
        access_token: String,
        #[serde(default)]
        folder: String,
    },
}

impl StorageConfig {
    pub fn kind(&self) -> StorageKind {
        match self {
            Self::Local { .. } => StorageKind::Local,
            Self::S3 { .. } => StorageKind::S3,
            Self::GoogleDrive { .. } => StorageKind::GoogleDrive,
            Self::Dropbox { .. } => StorageKind::Dropbox,
        }
    }

    /// Replaces the bearer token of token-based providers. Returns `false`
    /// for providers that do not use one.
    pub fn set_access_token(&mut self, token: impl Into<String>) -> bool {
        match self {
            Self::GoogleDrive { access_token, .. } | Self::Dropbox { access_token, .. } => {
                *access_token = token.into();
                true
            }
            Self::Local { .. } | Self::S3 { .. } => false,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            Self::GoogleDrive { access_token, .. } | Self::Dropbox { access_token, .. } => {
                Some(access_token)
            }
            Self::Local { .. } | Self::S3 { .. } => None,
        }
    }
}
