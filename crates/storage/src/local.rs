//! Local filesystem adapter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapter::{BoxFuture, ChunkRequest, StorageAdapter};
use crate::{
    ChunkPolicy, ChunkReader, ChunkWriter, DEFAULT_CHUNK_SIZE, Deadline, PathInfo, SessionBag,
    StorageError, normalize_storage_path,
};

/// Sub-chunk size for local copies that run to EOF.
const LOCAL_POLICY: ChunkPolicy = ChunkPolicy::new(1, 1, u64::MAX, DEFAULT_CHUNK_SIZE);

/// Time kept in reserve at the end of a bounded copy call.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Storage backed by a directory on the local filesystem.
///
/// An adapter rooted at `/` resolves absolute local paths, which is how the
/// upload side stats its sources.
pub struct LocalAdapter {
    root: PathBuf,
    writer: Mutex<ChunkWriter>,
}

impl LocalAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer: Mutex::new(ChunkWriter::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a storage path below the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = normalize_storage_path(path)?;
        if rel.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(rel))
    }

    async fn stat_path(&self, path: &str) -> Result<PathInfo, StorageError> {
        let full = self.resolve(path)?;
        let meta = match tokio::fs::metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PathInfo::missing(path));
            }
            Err(e) => return Err(e.into()),
        };
        let info = if meta.is_dir() {
            PathInfo::dir(path)
        } else {
            PathInfo::file(path, meta.len())
        };
        Ok(info.with_times(
            meta.created().ok().map(DateTime::<Utc>::from),
            meta.modified().ok().map(DateTime::<Utc>::from),
        ))
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        let meta = match tokio::fs::symlink_metadata(&full).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_dir() {
            tokio::fs::remove_file(&full).await?;
            return Ok(());
        }
        if recursive {
            tokio::fs::remove_dir_all(&full).await?;
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&full).await?;
        if entries.next_entry().await?.is_some() {
            return Err(StorageError::DirectoryNotEmpty(path.to_string()));
        }
        tokio::fs::remove_dir(&full).await?;
        Ok(())
    }

    async fn scan(
        &self,
        path: &str,
        files: bool,
        folders: bool,
    ) -> Result<Vec<String>, StorageError> {
        let full = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            if (is_dir && folders) || (!is_dir && files) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Copies `[offset, offset + max_length)` of `src` into `dst`.
    async fn copy_range(
        &self,
        src: &Path,
        dst: &Path,
        request: ChunkRequest,
    ) -> Result<u64, StorageError> {
        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);
        let mut reader = ChunkReader::open(src).await?;
        let mut writer = self.writer.lock().await;

        if request.offset == 0 && reader.file_size() == 0 {
            writer.write_at(dst, 0, &[]).await?;
            return Ok(0);
        }
        if request.offset >= reader.file_size() {
            return Ok(0);
        }
        reader.seek_to(request.offset).await?;

        let limit = request.max_length.unwrap_or(u64::MAX);
        let mut copied = 0u64;
        while copied < limit {
            let want = (limit - copied).min(LOCAL_POLICY.default);
            let Some(buf) = reader.read_up_to(want).await? else {
                break;
            };
            let at = request.offset + copied;
            match writer.write_at(dst, at, &buf).await {
                Ok(n) => copied += n,
                Err(StorageError::NotFound(p)) => {
                    return Err(StorageError::SessionExpired(format!(
                        "destination {p} vanished at offset {at}"
                    )));
                }
                Err(e) => return Err(e),
            }
            if deadline.reached() {
                debug!(copied, "local copy stopped at deadline");
                break;
            }
        }
        Ok(copied)
    }
}

impl StorageAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>> {
        Box::pin(self.stat_path(path))
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            tokio::fs::create_dir_all(&full).await?;
            Ok(())
        })
    }

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            if let Some(parent) = full.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full, content).await?;
            Ok(content.len() as u64)
        })
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
        recursive: bool,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.delete_path(path, recursive))
    }

    fn move_path<'a>(
        &'a self,
        old_path: &'a str,
        new_path: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let from = self.resolve(old_path)?;
            let to = self.resolve(new_path)?;
            if !tokio::fs::try_exists(&from).await? {
                return Err(StorageError::NotFound(old_path.to_string()));
            }
            if let Some(parent) = to.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&from, &to).await?;
            Ok(())
        })
    }

    fn scan_dir<'a>(
        &'a self,
        path: &'a str,
        files: bool,
        folders: bool,
    ) -> BoxFuture<'a, Result<Vec<String>, StorageError>> {
        Box::pin(self.scan(path, files, folders))
    }

    fn get_file_content<'a>(
        &'a self,
        path: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            match tokio::fs::read(&full).await {
                Ok(data) => Ok(data),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(StorageError::NotFound(path.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn copy_to_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        _session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let dst = self.resolve(dest)?;
            self.copy_range(Path::new(source), &dst, request)
                .await
                .inspect_err(|e| {
                    warn!(source, dest, offset = request.offset, error = %e, "local upload chunk failed");
                })
        })
    }

    fn copy_from_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        _session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let src = self.resolve(source)?;
            self.copy_range(&src, Path::new(dest), request)
                .await
                .inspect_err(|e| {
                    warn!(source, dest, offset = request.offset, error = %e, "local download chunk failed");
                })
        })
    }
}
