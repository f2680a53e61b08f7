use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stowaway_storage::{
    BoxFuture, ChunkPolicy, ChunkReader, ChunkRequest, ChunkWriter, Deadline, MIB, PathInfo,
    PathInfoCache, SessionBag, SessionState, StorageAdapter, StorageError, join_storage_path,
    session_key,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{DropboxApi, DropboxError, UploadCursor};

/// Dropbox accepts at most 150 MiB per upload request.
pub const DROPBOX_CHUNK_POLICY: ChunkPolicy = ChunkPolicy::new(1, 1, 150 * MIB, 4 * MIB);

const DOWNLOAD_STEP: u64 = 5 * MIB;

/// Reserve kept before the per-call timeout to persist state.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Storage adapter over a folder in a Dropbox account.
pub struct DropboxAdapter {
    api: Arc<dyn DropboxApi>,
    /// Normalized folder below the account root.
    root: String,
    cache: PathInfoCache,
    writer: Mutex<ChunkWriter>,
}

impl DropboxAdapter {
    pub fn new(api: Arc<dyn DropboxApi>, storage_path: &str) -> Result<Self, StorageError> {
        Ok(Self {
            api,
            root: join_storage_path("", storage_path)?,
            cache: PathInfoCache::new(),
            writer: Mutex::new(ChunkWriter::new()),
        })
    }

    /// Absolute Dropbox path for a storage path; the account root is `""`.
    fn remote(&self, path: &str) -> Result<String, StorageError> {
        let full = join_storage_path(&self.root, path)?;
        Ok(if full.is_empty() {
            full
        } else {
            format!("/{full}")
        })
    }

    fn rel(path: &str) -> Result<String, StorageError> {
        join_storage_path("", path)
    }

    async fn stat_path(&self, path: &str) -> Result<PathInfo, StorageError> {
        let rel = Self::rel(path)?;
        if let Some(info) = self.cache.get(&rel) {
            return Ok(info);
        }
        let info = match self.api.get_metadata(&self.remote(path)?).await? {
            Some(entry) => entry.to_path_info(path),
            None => PathInfo::missing(path),
        };
        self.cache.insert(PathInfo {
            path: rel,
            ..info.clone()
        });
        Ok(info)
    }

    async fn make_dir(&self, path: &str) -> Result<(), StorageError> {
        let info = self.stat_path(path).await?;
        if info.exists {
            return if info.is_dir {
                Ok(())
            } else {
                Err(StorageError::InvalidPath(format!("{path} exists and is a file")))
            };
        }
        let remote = self.remote(path)?;
        self.api.create_folder(&remote).await?;
        self.cache.invalidate(&Self::rel(path)?);
        debug!(path = %remote, "created dropbox folder");
        Ok(())
    }

    async fn create_file_at(&self, path: &str, content: &[u8]) -> Result<u64, StorageError> {
        let rel = Self::rel(path)?;
        if rel.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let entry = self.api.upload(&self.remote(path)?, content.to_vec()).await?;
        self.cache.invalidate(&rel);
        Ok(entry.size.unwrap_or(content.len() as u64))
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let info = self.stat_path(path).await?;
        if !info.exists {
            return Ok(());
        }
        let remote = self.remote(path)?;
        if info.is_dir && !recursive && !self.api.list_folder(&remote).await?.entries.is_empty() {
            return Err(StorageError::DirectoryNotEmpty(path.to_string()));
        }
        match self.api.delete(&remote).await {
            Ok(()) | Err(DropboxError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.invalidate(&Self::rel(path)?);
        Ok(())
    }

    async fn move_entry(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        self.api
            .move_path(&self.remote(old_path)?, &self.remote(new_path)?)
            .await?;
        self.cache.invalidate(&Self::rel(old_path)?);
        self.cache.invalidate(&Self::rel(new_path)?);
        Ok(())
    }

    async fn scan(
        &self,
        path: &str,
        files: bool,
        folders: bool,
    ) -> Result<Vec<String>, StorageError> {
        let mut page = match self.api.list_folder(&self.remote(path)?).await {
            Ok(page) => page,
            Err(DropboxError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        loop {
            names.extend(
                page.entries
                    .into_iter()
                    .filter(|e| (e.is_folder() && folders) || (e.is_file() && files))
                    .map(|e| e.name),
            );
            if !page.has_more {
                return Ok(names);
            }
            page = self.api.list_folder_continue(&page.cursor).await?;
        }
    }

    async fn upload_chunk(
        &self,
        source: &str,
        dest: &str,
        request: ChunkRequest,
        session: &mut SessionBag,
    ) -> Result<u64, StorageError> {
        let skey = session_key(source, dest);
        let mut reader = ChunkReader::open(Path::new(source)).await?;
        let size = reader.file_size();
        let offset = request.offset;
        let remote = self.remote(dest)?;
        let chunk = DROPBOX_CHUNK_POLICY.normalize(request.max_length);
        let limit = request.max_length.map_or(u64::MAX, |_| chunk);
        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);

        let mut copied = 0u64;
        let session_id = match session.get(&skey).cloned() {
            Some(SessionState::Complete) => return Ok(size.saturating_sub(offset)),
            Some(SessionState::Cursor {
                session_id,
                offset: cursor,
            }) => {
                if cursor < offset {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(format!(
                        "dropbox cursor at {cursor}, resume requested at {offset}"
                    )));
                }
                if cursor > offset {
                    debug!(dest, cursor, offset, "reconciled dropbox cursor");
                    return Ok(cursor - offset);
                }
                debug!(dest, offset, "resuming dropbox upload session");
                session_id
            }
            Some(other) => {
                session.remove(&skey);
                return Err(StorageError::SessionExpired(format!(
                    "unexpected session state {other:?} for {dest}"
                )));
            }
            None if offset > 0 => {
                return Err(StorageError::SessionExpired(format!(
                    "no upload session for {dest} at offset {offset}"
                )));
            }
            None if size <= chunk => {
                let data = reader.read_up_to(size).await?.unwrap_or_default();
                self.api.upload(&remote, data).await?;
                session.mark_complete(&skey);
                self.cache.invalidate(&Self::rel(dest)?);
                info!(dest, size, "uploaded dropbox file in one request");
                return Ok(size);
            }
            None => {
                let data = reader.read_up_to(chunk).await?.unwrap_or_default();
                copied = data.len() as u64;
                let session_id = self.api.session_start(data).await?;
                session.insert(
                    &skey,
                    SessionState::Cursor {
                        session_id: session_id.clone(),
                        offset: copied,
                    },
                );
                info!(dest, size, session = %session_id, "started dropbox upload session");
                session_id
            }
        };

        while copied < limit {
            let at = offset + copied;
            reader.seek_to(at).await?;
            let data = reader.read_up_to(chunk).await?.unwrap_or_default();
            let len = data.len() as u64;
            let cursor = UploadCursor {
                session_id: session_id.clone(),
                offset: at,
            };
            let result = if at + len >= size {
                self.api
                    .session_finish(&cursor, data, &remote)
                    .await
                    .map(|_| true)
            } else {
                self.api.session_append(&cursor, data).await.map(|()| false)
            };
            match result {
                Ok(true) => {
                    session.mark_complete(&skey);
                    self.cache.invalidate(&Self::rel(dest)?);
                    info!(dest, size, "committed dropbox upload session");
                    return Ok(copied + len);
                }
                Ok(false) => {
                    copied += len;
                    session.insert(
                        &skey,
                        SessionState::Cursor {
                            session_id: session_id.clone(),
                            offset: offset + copied,
                        },
                    );
                    debug!(dest, offset = offset + copied, size, "appended dropbox chunk");
                    if deadline.reached() {
                        break;
                    }
                }
                Err(DropboxError::SessionExpired(msg)) => {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(msg));
                }
                Err(e) if copied > 0 => {
                    warn!(dest, offset = at, error = %e, "dropbox append failed, keeping accepted bytes");
                    return Ok(copied);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(copied)
    }

    async fn download_chunk(
        &self,
        source: &str,
        dest: &str,
        request: ChunkRequest,
        session: &mut SessionBag,
    ) -> Result<u64, StorageError> {
        let skey = session_key(source, dest);
        let remote = self.remote(source)?;
        let size = match session.get(&skey) {
            Some(SessionState::Download { size, .. }) => *size,
            _ => {
                let entry = match self.api.get_metadata(&remote).await? {
                    Some(e) if e.is_file() => e,
                    _ => return Err(StorageError::NotFound(source.to_string())),
                };
                let size = entry.size.unwrap_or(0);
                session.insert(
                    &skey,
                    SessionState::Download {
                        remote_id: entry.id,
                        size,
                    },
                );
                size
            }
        };

        let dest_path = Path::new(dest);
        let mut writer = self.writer.lock().await;
        if size == 0 && request.offset == 0 {
            writer.write_at(dest_path, 0, &[]).await?;
            return Ok(0);
        }

        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);
        let limit = request.max_length.unwrap_or(u64::MAX);
        let mut copied = 0u64;
        while copied < limit {
            let at = request.offset + copied;
            if at >= size {
                break;
            }
            let last = (at + DOWNLOAD_STEP.min(limit - copied)).min(size) - 1;
            let data = self.api.download(&remote, Some((at, last))).await?;
            if data.is_empty() {
                break;
            }
            match writer.write_at(dest_path, at, &data).await {
                Ok(n) => copied += n,
                Err(StorageError::NotFound(p)) => {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(format!(
                        "destination {p} vanished at offset {at}"
                    )));
                }
                Err(e) => return Err(e),
            }
            if deadline.reached() {
                break;
            }
        }
        Ok(copied)
    }
}

impl StorageAdapter for DropboxAdapter {
    fn name(&self) -> &str {
        "dropbox"
    }

    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>> {
        Box::pin(self.stat_path(path))
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.make_dir(path))
    }

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(self.create_file_at(path, content))
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
        Box::pin(self.move_entry(old_path, new_path))
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
        Box::pin(async move { Ok(self.api.download(&self.remote(path)?, None).await?) })
    }

    fn copy_to_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            self.upload_chunk(source, dest, request, session)
                .await
                .inspect_err(|e| {
                    warn!(source, dest, offset = request.offset, error = %e, "dropbox upload chunk failed");
                })
        })
    }

    fn copy_from_storage<'a>(
        &'a self,
        source: &'a str,
        dest: &'a str,
        request: ChunkRequest,
        session: &'a mut SessionBag,
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            self.download_chunk(source, dest, request, session)
                .await
                .inspect_err(|e| {
                    warn!(source, dest, offset = request.offset, error = %e, "dropbox download chunk failed");
                })
        })
    }
}
