use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stowaway_storage::{
    BoxFuture, ChunkPolicy, ChunkReader, ChunkRequest, ChunkWriter, Deadline, KIB, PathInfo,
    PathInfoCache, SessionBag, SessionState, StorageAdapter, StorageError,
    normalize_storage_path, session_key,
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::{DriveApi, DriveError, DriveFile, ResumableUpload};

/// Resumable chunks are multiples of 256 KiB; 5 MiB by default.
pub const GDRIVE_CHUNK_POLICY: ChunkPolicy =
    ChunkPolicy::new(256 * KIB, 256 * KIB, u64::MAX, 20 * 256 * KIB);

/// Reserve kept before the per-call timeout to persist state.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Splits a normalized path into its parent and final component.
fn split_parent(rel: &str) -> (&str, &str) {
    rel.rsplit_once('/').unwrap_or(("", rel))
}

/// Storage adapter over a Google Drive folder.
pub struct GDriveAdapter {
    api: Arc<dyn DriveApi>,
    /// Folder path of the storage root below "My Drive".
    storage_path: String,
    root: OnceCell<String>,
    cache: PathInfoCache,
    writer: Mutex<ChunkWriter>,
}

impl GDriveAdapter {
    pub fn new(api: Arc<dyn DriveApi>, storage_path: &str) -> Result<Self, StorageError> {
        Ok(Self {
            api,
            storage_path: normalize_storage_path(storage_path)?,
            root: OnceCell::new(),
            cache: PathInfoCache::new(),
            writer: Mutex::new(ChunkWriter::new()),
        })
    }

    /// Uses a known folder id as the storage root instead of walking
    /// `storage_path`.
    pub fn with_root_id(mut self, id: impl Into<String>) -> Self {
        self.root = OnceCell::new_with(Some(id.into()));
        self
    }

    /// Id of the storage root, creating the folder path on first use.
    async fn root_id(&self) -> Result<&str, StorageError> {
        let id = self
            .root
            .get_or_try_init(|| async {
                let mut parent = "root".to_string();
                for name in self.storage_path.split('/').filter(|p| !p.is_empty()) {
                    parent = match self.api.find_child(&parent, name, true).await? {
                        Some(folder) => folder.id,
                        None => self.api.create_folder(&parent, name).await?.id,
                    };
                }
                debug!(root = %parent, path = %self.storage_path, "resolved drive storage root");
                Ok::<_, StorageError>(parent)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Looks up `path`, using memoised folder ids for the intermediate
    /// components and a fresh lookup for the last one.
    async fn resolve(&self, path: &str) -> Result<Option<DriveFile>, StorageError> {
        let rel = normalize_storage_path(path)?;
        let mut parent = self.root_id().await?.to_string();
        if rel.is_empty() {
            return Ok(self.api.get_file(&parent).await?);
        }
        let parts: Vec<&str> = rel.split('/').collect();
        let mut current = String::new();
        for (i, name) in parts.iter().enumerate() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(name);
            let last = i + 1 == parts.len();
            if !last {
                if let Some(id) = self.cached_folder(&current) {
                    parent = id;
                    continue;
                }
            }
            match self.api.find_child(&parent, name, !last).await? {
                None => return Ok(None),
                Some(file) => {
                    self.cache.insert(file.to_path_info(&current));
                    if last {
                        return Ok(Some(file));
                    }
                    parent = file.id;
                }
            }
        }
        Ok(None)
    }

    fn cached_folder(&self, path: &str) -> Option<String> {
        self.cache
            .get(path)
            .filter(|info| info.exists && info.is_dir)
            .and_then(|info| info.id)
    }

    /// Returns the id of folder `path`, creating it and any missing parents.
    ///
    /// Existing folders are looked up until the first miss; everything below
    /// it is created without further lookups.
    async fn ensure_dir(&self, path: &str) -> Result<String, StorageError> {
        let rel = normalize_storage_path(path)?;
        let mut parent = self.root_id().await?.to_string();
        let mut current = String::new();
        let mut searching = true;
        for name in rel.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(name);
            if searching {
                if let Some(id) = self.cached_folder(&current) {
                    parent = id;
                    continue;
                }
                if let Some(folder) = self.api.find_child(&parent, name, true).await? {
                    self.cache.insert(folder.to_path_info(&current));
                    parent = folder.id;
                    continue;
                }
                searching = false;
            }
            let folder = self.api.create_folder(&parent, name).await?;
            debug!(path = %current, id = %folder.id, "created drive folder");
            self.cache.invalidate(&current);
            self.cache.insert(folder.to_path_info(&current));
            parent = folder.id;
        }
        Ok(parent)
    }

    async fn stat_path(&self, path: &str) -> Result<PathInfo, StorageError> {
        Ok(match self.resolve(path).await? {
            Some(file) => file.to_path_info(path),
            None => PathInfo::missing(path),
        })
    }

    async fn create_file_at(&self, path: &str, content: &[u8]) -> Result<u64, StorageError> {
        let rel = normalize_storage_path(path)?;
        let (parent, name) = split_parent(&rel);
        if name.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        let parent_id = self.ensure_dir(parent).await?;
        let file = self
            .api
            .create_file(&parent_id, name, content.to_vec())
            .await?;
        self.cache.invalidate(&rel);
        Ok(file.size.unwrap_or(content.len() as u64))
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let Some(file) = self.resolve(path).await? else {
            return Ok(());
        };
        if file.is_folder() && !recursive {
            let page = self.api.list_children(&file.id, None).await?;
            if !page.files.is_empty() {
                return Err(StorageError::DirectoryNotEmpty(path.to_string()));
            }
        }
        self.api.delete_file(&file.id).await?;
        self.cache.invalidate(&normalize_storage_path(path)?);
        Ok(())
    }

    async fn move_file_path(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        let file = self
            .resolve(old_path)
            .await?
            .ok_or_else(|| StorageError::NotFound(old_path.to_string()))?;
        let old_rel = normalize_storage_path(old_path)?;
        let new_rel = normalize_storage_path(new_path)?;
        let (new_parent, new_name) = split_parent(&new_rel);
        let old_parent = match file.parents.first() {
            Some(id) => id.clone(),
            None => self.ensure_dir(split_parent(&old_rel).0).await?,
        };
        let new_parent_id = self.ensure_dir(new_parent).await?;
        self.api
            .move_file(&file.id, &old_parent, &new_parent_id, new_name)
            .await?;
        self.cache.invalidate(&old_rel);
        self.cache.invalidate(&new_rel);
        Ok(())
    }

    async fn scan(
        &self,
        path: &str,
        files: bool,
        folders: bool,
    ) -> Result<Vec<String>, StorageError> {
        let folder = match self.resolve(path).await? {
            Some(f) if f.is_folder() => f,
            _ => return Ok(Vec::new()),
        };
        let mut names = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_children(&folder.id, token).await?;
            names.extend(
                page.files
                    .into_iter()
                    .filter(|f| if f.is_folder() { folders } else { files })
                    .map(|f| f.name),
            );
            token = page.next_page_token;
            if token.is_none() {
                return Ok(names);
            }
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

        let mut upload = match session.get(&skey).cloned() {
            Some(SessionState::Complete) => return Ok(size.saturating_sub(offset)),
            Some(SessionState::Resumable {
                resume_uri,
                confirmed,
            }) => {
                if confirmed < offset {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(format!(
                        "drive confirmed {confirmed} bytes, resume requested at {offset}"
                    )));
                }
                if confirmed > offset {
                    debug!(dest, confirmed, offset, "reconciled drive progress");
                    return Ok(confirmed - offset);
                }
                debug!(dest, offset, "resuming drive upload");
                ResumableUpload::resume_from(resume_uri, confirmed, size)
            }
            Some(other) => {
                session.remove(&skey);
                return Err(StorageError::SessionExpired(format!(
                    "unexpected session state {other:?} for {dest}"
                )));
            }
            None if offset > 0 => {
                return Err(StorageError::SessionExpired(format!(
                    "no resumable session for {dest} at offset {offset}"
                )));
            }
            None => {
                let rel = normalize_storage_path(dest)?;
                let (parent, name) = split_parent(&rel);
                let parent_id = self.ensure_dir(parent).await?;
                let upload = ResumableUpload::start(&*self.api, &parent_id, name, size).await?;
                session.insert(
                    &skey,
                    SessionState::Resumable {
                        resume_uri: upload.uri().to_string(),
                        confirmed: 0,
                    },
                );
                info!(dest, size, "started drive resumable upload");
                upload
            }
        };

        let chunk = GDRIVE_CHUNK_POLICY.normalize(request.max_length);
        let limit = request.max_length.map_or(u64::MAX, |_| chunk);
        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);

        loop {
            reader.seek_to(upload.progress()).await?;
            let data = reader.read_up_to(chunk).await?.unwrap_or_default();
            if data.is_empty() && upload.progress() < size {
                return Err(StorageError::provider(
                    "gdrive",
                    format!("{source} ended at {} of {size} bytes", upload.progress()),
                ));
            }

            match upload.send_chunk(&*self.api, data).await {
                Ok(()) => {}
                Err(DriveError::SessionExpired(uri)) => {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(uri));
                }
                Err(err) => {
                    warn!(dest, progress = upload.progress(), error = %err, "drive chunk failed, querying session progress");
                    match upload.refresh(&*self.api).await {
                        Ok(()) => {}
                        Err(DriveError::SessionExpired(uri)) => {
                            session.remove(&skey);
                            return Err(StorageError::SessionExpired(uri));
                        }
                        Err(e) => warn!(dest, error = %e, "drive status query failed"),
                    }
                    if !upload.is_complete() {
                        let copied = upload.progress().saturating_sub(offset);
                        if copied == 0 {
                            return Err(err.into());
                        }
                        session.insert(
                            &skey,
                            SessionState::Resumable {
                                resume_uri: upload.uri().to_string(),
                                confirmed: upload.progress(),
                            },
                        );
                        info!(dest, confirmed = upload.progress(), "kept confirmed drive progress");
                        return Ok(copied);
                    }
                }
            }

            if upload.is_complete() {
                session.mark_complete(&skey);
                self.cache.invalidate(&normalize_storage_path(dest)?);
                info!(dest, size, "completed drive upload");
                return Ok(size.saturating_sub(offset));
            }
            session.insert(
                &skey,
                SessionState::Resumable {
                    resume_uri: upload.uri().to_string(),
                    confirmed: upload.progress(),
                },
            );
            let copied = upload.progress().saturating_sub(offset);
            debug!(dest, confirmed = upload.progress(), size, "uploaded drive chunk");
            if copied >= limit || deadline.reached() {
                return Ok(copied);
            }
        }
    }

    async fn download_chunk(
        &self,
        source: &str,
        dest: &str,
        request: ChunkRequest,
        session: &mut SessionBag,
    ) -> Result<u64, StorageError> {
        let skey = session_key(source, dest);
        let (id, size) = match session.get(&skey) {
            Some(SessionState::Download {
                remote_id: Some(id),
                size,
            }) => (id.clone(), *size),
            _ => {
                let file = match self.resolve(source).await? {
                    Some(f) if !f.is_folder() => f,
                    _ => return Err(StorageError::NotFound(source.to_string())),
                };
                let size = file.size.unwrap_or(0);
                session.insert(
                    &skey,
                    SessionState::Download {
                        remote_id: Some(file.id.clone()),
                        size,
                    },
                );
                (file.id, size)
            }
        };

        let dest_path = Path::new(dest);
        let mut writer = self.writer.lock().await;
        if size == 0 && request.offset == 0 {
            writer.write_at(dest_path, 0, &[]).await?;
            return Ok(0);
        }

        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);
        let step = GDRIVE_CHUNK_POLICY.default;
        let limit = request.max_length.unwrap_or(u64::MAX);
        let mut copied = 0u64;
        while copied < limit {
            let at = request.offset + copied;
            if at >= size {
                break;
            }
            let last = (at + step.min(limit - copied)).min(size) - 1;
            let data = self.api.download(&id, Some((at, last))).await?;
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

impl StorageAdapter for GDriveAdapter {
    fn name(&self) -> &str {
        "gdrive"
    }

    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>> {
        Box::pin(self.stat_path(path))
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.ensure_dir(path).await?;
            Ok(())
        })
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
        Box::pin(self.move_file_path(old_path, new_path))
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
            match self.resolve(path).await? {
                Some(file) if !file.is_folder() => Ok(self.api.download(&file.id, None).await?),
                _ => Err(StorageError::NotFound(path.to_string())),
            }
        })
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
                    warn!(source, dest, offset = request.offset, error = %e, "drive upload chunk failed");
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
                    warn!(source, dest, offset = request.offset, error = %e, "drive download chunk failed");
                })
        })
    }
}
