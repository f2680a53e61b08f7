//! Drive API seam and wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use stowaway_storage::{BoxFuture, PathInfo};

use crate::DriveError;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// File resource as returned by the Drive v3 API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Drive encodes sizes as decimal strings.
    #[serde(default, deserialize_with = "de_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
}

fn de_size<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Str(String),
        Num(u64),
    }
    Ok(match Option::<Size>::deserialize(d)? {
        Some(Size::Num(n)) => Some(n),
        Some(Size::Str(s)) => s.parse().ok(),
        None => None,
    })
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Converts to a [`PathInfo`] for `path`.
    pub fn to_path_info(&self, path: &str) -> PathInfo {
        let info = if self.is_folder() {
            PathInfo::dir(path)
        } else {
            PathInfo::file(path, self.size.unwrap_or(0))
        };
        info.with_id(&self.id)
            .with_times(self.created_time, self.modified_time)
            .with_checksum(self.md5_checksum.clone())
    }
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Result of sending bytes to a resumable session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Drive has persisted the first `confirmed` bytes.
    Incomplete { confirmed: u64 },
    /// The upload is finished.
    Complete(DriveFile),
}

/// Operations the adapter needs from Drive.
pub trait DriveApi: Send + Sync {
    fn get_file<'a>(&'a self, id: &'a str)
    -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>>;

    /// Finds a non-trashed child of `parent_id` by exact name.
    fn find_child<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        folders_only: bool,
    ) -> BoxFuture<'a, Result<Option<DriveFile>, DriveError>>;

    fn list_children<'a>(
        &'a self,
        parent_id: &'a str,
        page_token: Option<String>,
    ) -> BoxFuture<'a, Result<FileList, DriveError>>;

    fn create_folder<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>>;

    fn create_file<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>>;

    fn delete_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), DriveError>>;

    /// Renames `id` and moves it from `old_parent` to `new_parent`.
    fn move_file<'a>(
        &'a self,
        id: &'a str,
        old_parent: &'a str,
        new_parent: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<DriveFile, DriveError>>;

    /// Opens a resumable upload session and returns its URI.
    fn start_resumable<'a>(
        &'a self,
        parent_id: &'a str,
        name: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<String, DriveError>>;

    /// Sends `data` as the bytes starting at `offset` of a `total_size` upload.
    fn upload_chunk<'a>(
        &'a self,
        uri: &'a str,
        offset: u64,
        data: Vec<u8>,
        total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>>;

    /// Asks Drive how many bytes of the session it has persisted.
    fn query_status<'a>(
        &'a self,
        uri: &'a str,
        total_size: u64,
    ) -> BoxFuture<'a, Result<ChunkOutcome, DriveError>>;

    /// Downloads file content, optionally the inclusive range `(first, last)`.
    fn download<'a>(
        &'a self,
        id: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DriveError>>;
}
