//! Dropbox API seam and wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stowaway_storage::{BoxFuture, PathInfo};

use crate::DropboxError;

/// File or folder metadata from the v2 API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Entry {
    /// `file`, `folder` or `deleted`.
    #[serde(rename = ".tag", default)]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl Entry {
    pub fn is_folder(&self) -> bool {
        self.tag == "folder"
    }

    pub fn is_file(&self) -> bool {
        self.tag == "file"
    }

    pub fn to_path_info(&self, path: &str) -> PathInfo {
        let info = if self.is_folder() {
            PathInfo::dir(path)
        } else {
            PathInfo::file(path, self.size.unwrap_or(0))
        };
        let info = info
            .with_times(self.client_modified, self.server_modified)
            .with_checksum(self.content_hash.clone());
        match &self.id {
            Some(id) => info.with_id(id),
            None => info,
        }
    }
}

/// One page of `list_folder`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListFolderPage {
    #[serde(default)]
    pub entries: Vec<Entry>,
    pub cursor: String,
    #[serde(default)]
    pub has_more: bool,
}

/// Position inside an upload session: the next byte Dropbox expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadCursor {
    pub session_id: String,
    pub offset: u64,
}

/// Operations the adapter needs from Dropbox.
///
/// Paths are absolute Dropbox paths (`/a/b.zip`); the account root is `""`.
pub trait DropboxApi: Send + Sync {
    /// Returns `None` when nothing exists at `path`.
    fn get_metadata<'a>(&'a self, path: &'a str)
    -> BoxFuture<'a, Result<Option<Entry>, DropboxError>>;

    /// Creates `path` and any missing parents.
    fn create_folder<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Entry, DropboxError>>;

    /// Single-request upload in overwrite mode.
    fn upload<'a>(
        &'a self,
        path: &'a str,
        content: Vec<u8>,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>>;

    /// Deletes a file or a folder with its contents.
    fn delete<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), DropboxError>>;

    fn move_path<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>>;

    fn list_folder<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>>;

    fn list_folder_continue<'a>(
        &'a self,
        cursor: &'a str,
    ) -> BoxFuture<'a, Result<ListFolderPage, DropboxError>>;

    /// Opens an upload session with its first bytes and returns the session id.
    fn session_start<'a>(&'a self, data: Vec<u8>) -> BoxFuture<'a, Result<String, DropboxError>>;

    /// Appends `data` at `cursor.offset`.
    fn session_append<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), DropboxError>>;

    /// Appends the final bytes and commits the session to `path`, overwriting.
    fn session_finish<'a>(
        &'a self,
        cursor: &'a UploadCursor,
        data: Vec<u8>,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Entry, DropboxError>>;

    /// Downloads content, optionally the inclusive range `(first, last)`.
    fn download<'a>(
        &'a self,
        path: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, DropboxError>>;
}
