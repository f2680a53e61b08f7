use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Describes a storage entry as returned by a single stat call.
///
/// When `exists` is `false` every other field holds its default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    /// Path relative to the adapter root.
    pub path: String,
    pub exists: bool,
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Provider-side identifier (object id, file id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PathInfo {
    /// Info for a path that does not exist.
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Info for an existing regular file.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            exists: true,
            size,
            ..Self::default()
        }
    }

    /// Info for an existing directory.
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            exists: true,
            is_dir: true,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_times(
        mut self,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        self.created = created;
        self.modified = modified;
        self
    }

    pub fn with_checksum(mut self, checksum: Option<String>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Returns `true` for an existing non-directory entry.
    pub fn is_file(&self) -> bool {
        self.exists && !self.is_dir
    }
}
