//! The storage adapter trait.
//!
//! Every backend (local disk, object store, drive, cursor-session service)
//! implements [`StorageAdapter`]. Operations return boxed futures so the
//! transfer engine can hold adapters as `dyn StorageAdapter` and tests can
//! swap in scripted fakes.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{PathInfo, SessionBag, StorageError};

/// A boxed, sendable future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Parameters of one partial-copy call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Byte offset in the source file at which copying starts.
    pub offset: u64,
    /// Upper bound on bytes copied by this call; `None` copies to EOF.
    pub max_length: Option<u64>,
    /// Wall-clock budget for this call; `None` is unbounded.
    pub timeout: Option<Duration>,
}

impl ChunkRequest {
    pub fn new(offset: u64) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn with_max_length(mut self, max_length: Option<u64>) -> Self {
        self.max_length = max_length.filter(|n| *n > 0);
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Uniform contract over a storage backend.
///
/// Paths are relative to the adapter's root. Expected conditions (absent
/// path, network failure, rejected session) are returned as errors; the
/// adapter never retries on its own.
pub trait StorageAdapter: Send + Sync {
    /// Short provider name used in log fields.
    fn name(&self) -> &str;

    /// Returns fresh information about `path`.
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>>;

    fn exists<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.stat(path).await?.exists) })
    }

    fn is_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.stat(path).await?.is_file()) })
    }

    fn is_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let info = self.stat(path).await?;
            Ok(info.exists && info.is_dir)
        })
    }

    /// Size of the file at `path`; fails with `NotFound` if it is not a file.
    fn file_size<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let info = self.stat(path).await?;
            if !info.is_file() {
                return Err(StorageError::NotFound(path.to_string()));
            }
            Ok(info.size)
        })
    }

    /// Creates `path` and any missing parents. Succeeds if it already exists.
    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Writes `content` to `path`, overwriting. Returns the bytes written.
    fn create_file<'a>(
        &'a self,
        path: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// Deletes a file or directory.
    ///
    /// Deleting a missing path succeeds. A non-empty directory is only
    /// removed when `recursive` is set; otherwise `DirectoryNotEmpty` is
    /// returned and nothing is deleted.
    fn delete<'a>(
        &'a self,
        path: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    fn move_path<'a>(
        &'a self,
        old_path: &'a str,
        new_path: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Lists the direct children of `path` by name, filtered by kind.
    ///
    /// Pagination is followed until exhausted. A missing path lists as empty.
    fn scan_dir<'a>(
        &'a self,
        path: &'a str,
        files: bool,
        folders: bool,
    ) -> BoxFuture<'a, Result<Vec<String>, StorageError>>;

    fn is_dir_empty<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { Ok(self.scan_dir(path, true, true).await?.is_empty()) })
    }

    fn get_file_content<'a>(&'a self, path: &'a str)
    -> BoxFuture<'a, Result<Vec<u8>, StorageError>>;

    /// Copies part of a local file into this storage.
    ///
    /// Returns the number of source bytes newly persisted on the remote side
    /// by this call. Resumable provider state for the file lives in
    /// `session` under [`crate::session_key`]`(source, dest)`.
    fn copy_to_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// Copies part of a file in this storage to a local destination.
    fn copy_from_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// Aborts provider-side sessions started more than `max_age` ago.
    /// Returns how many were aborted.
    fn purge_stale_sessions(
        &self,
        max_age: Duration,
    ) -> BoxFuture<'_, Result<usize, StorageError>> {
        let _ = max_age;
        Box::pin(async { Ok(0) })
    }
}
