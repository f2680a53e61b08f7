use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stowaway_storage::{
    BoxFuture, ChunkPolicy, ChunkReader, ChunkRequest, ChunkWriter, CompletedPart, Deadline, GIB,
    KIB, MIB, PathInfo, SessionBag, SessionState, StorageAdapter, StorageError, join_storage_path,
    normalize_storage_path, session_key,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{S3Api, S3Error};

/// Multipart part sizing: at least 5 MiB, at most 5 GiB, 6000 KiB by default.
pub const S3_CHUNK_POLICY: ChunkPolicy = ChunkPolicy::new(1, 5 * MIB, 5 * GIB, 6000 * KIB);

const TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Storage adapter over an S3-compatible bucket.
///
/// Paths are keys below `prefix`. Directories are zero-byte objects whose key
/// ends in `/`; a prefix with children also counts as a directory.
pub struct S3Adapter {
    api: Arc<dyn S3Api>,
    prefix: String,
    writer: Mutex<ChunkWriter>,
}

impl S3Adapter {
    pub fn new(api: Arc<dyn S3Api>, prefix: &str) -> Result<Self, StorageError> {
        Ok(Self {
            api,
            prefix: join_storage_path(prefix, "")?,
            writer: Mutex::new(ChunkWriter::new()),
        })
    }

    fn key(&self, path: &str) -> Result<String, StorageError> {
        join_storage_path(&self.prefix, path)
    }

    fn dir_prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    /// Every key below `prefix`, following continuation tokens.
    async fn all_keys(&self, prefix: &str) -> Result<Vec<String>, S3Error> {
        let mut keys = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_objects(prefix, None, token).await?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            token = page.next_token;
            if token.is_none() {
                return Ok(keys);
            }
        }
    }

    async fn stat_path(&self, path: &str) -> Result<PathInfo, StorageError> {
        let key = self.key(path)?;
        if key.is_empty() {
            return Ok(PathInfo::dir(path));
        }
        if let Some(meta) = self.api.head_object(&key).await? {
            let mut info = PathInfo::file(path, meta.size)
                .with_id(&meta.key)
                .with_times(None, meta.last_modified);
            info.checksum = meta.etag.map(|e| e.trim_matches('"').to_string());
            return Ok(info);
        }
        let page = self
            .api
            .list_objects(&Self::dir_prefix(&key), Some("/"), None)
            .await?;
        if page.objects.is_empty() && page.common_prefixes.is_empty() {
            return Ok(PathInfo::missing(path));
        }
        Ok(PathInfo::dir(path))
    }

    async fn create_dir_path(&self, path: &str) -> Result<(), StorageError> {
        let rel = normalize_storage_path(path)?;
        let mut current = self.prefix.clone();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            let marker = Self::dir_prefix(&current);
            if self.api.head_object(&marker).await?.is_some() {
                continue;
            }
            if self.api.head_object(&current).await?.is_some() {
                return Err(StorageError::InvalidPath(format!(
                    "{current} exists and is a file"
                )));
            }
            self.api.put_object(&marker, Vec::new()).await?;
            debug!(key = %marker, "created directory marker");
        }
        Ok(())
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), StorageError> {
        let info = self.stat_path(path).await?;
        if !info.exists {
            return Ok(());
        }
        let key = self.key(path)?;
        if info.is_file() {
            self.api.delete_object(&key).await?;
            return Ok(());
        }
        let marker = Self::dir_prefix(&key);
        let keys = self.all_keys(&marker).await?;
        if !recursive && keys.iter().any(|k| *k != marker) {
            return Err(StorageError::DirectoryNotEmpty(path.to_string()));
        }
        for k in &keys {
            self.api.delete_object(k).await?;
        }
        Ok(())
    }

    async fn move_key_path(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        let info = self.stat_path(old_path).await?;
        if !info.exists {
            return Err(StorageError::NotFound(old_path.to_string()));
        }
        let from = self.key(old_path)?;
        let to = self.key(new_path)?;
        if info.is_file() {
            self.api.copy_object(&from, &to).await?;
            self.api.delete_object(&from).await?;
            return Ok(());
        }
        let from_prefix = Self::dir_prefix(&from);
        let to_prefix = Self::dir_prefix(&to);
        for key in self.all_keys(&from_prefix).await? {
            let suffix = key.strip_prefix(&from_prefix).unwrap_or(&key);
            let target = format!("{to_prefix}{suffix}");
            self.api.copy_object(&key, &target).await?;
            self.api.delete_object(&key).await?;
        }
        Ok(())
    }

    async fn scan(
        &self,
        path: &str,
        files: bool,
        folders: bool,
    ) -> Result<Vec<String>, StorageError> {
        let prefix = Self::dir_prefix(&self.key(path)?);
        let mut names = Vec::new();
        let mut token = None;
        loop {
            let page = self.api.list_objects(&prefix, Some("/"), token).await?;
            if files {
                names.extend(
                    page.objects
                        .iter()
                        .filter_map(|o| o.key.strip_prefix(&prefix))
                        .filter(|name| !name.is_empty())
                        .map(str::to_string),
                );
            }
            if folders {
                names.extend(
                    page.common_prefixes
                        .iter()
                        .filter_map(|p| p.strip_prefix(&prefix))
                        .map(|p| p.trim_end_matches('/').to_string()),
                );
            }
            token = page.next_token;
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
        let key = self.key(dest)?;
        let skey = session_key(source, dest);
        let mut reader = ChunkReader::open(Path::new(source)).await?;
        let size = reader.file_size();
        let part_size = S3_CHUNK_POLICY.normalize(request.max_length);

        let (upload_id, mut parts, mut uploaded) = match session.get(&skey).cloned() {
            Some(SessionState::Complete) => {
                debug!(%key, "upload already committed");
                return Ok(size.saturating_sub(request.offset));
            }
            Some(SessionState::Multipart {
                upload_id,
                parts,
                uploaded,
            }) => {
                if uploaded < request.offset {
                    session.remove(&skey);
                    if let Err(e) = self.api.abort_multipart_upload(&key, &upload_id).await {
                        warn!(%key, %upload_id, error = %e, "failed to abort mismatched upload");
                    }
                    return Err(StorageError::SessionExpired(format!(
                        "multipart {upload_id} holds {uploaded} bytes, resume requested at {}",
                        request.offset
                    )));
                }
                if uploaded > request.offset {
                    // An earlier call stored parts and then failed before reporting them.
                    if uploaded >= size {
                        self.complete_upload(&key, &skey, &upload_id, &parts, session)
                            .await?;
                    }
                    debug!(%key, uploaded, offset = request.offset, "reconciled multipart progress");
                    return Ok(uploaded - request.offset);
                }
                (upload_id, parts, uploaded)
            }
            Some(other) => {
                session.remove(&skey);
                return Err(StorageError::SessionExpired(format!(
                    "unexpected session state {other:?} for {key}"
                )));
            }
            None if request.offset > 0 => {
                return Err(StorageError::SessionExpired(format!(
                    "no multipart session for {key} at offset {}",
                    request.offset
                )));
            }
            None if size <= part_size => {
                let body = reader.read_up_to(size).await?.unwrap_or_default();
                self.api.put_object(&key, body).await?;
                session.mark_complete(&skey);
                info!(%key, size, "uploaded object in a single request");
                return Ok(size);
            }
            None => {
                let upload_id = self.api.create_multipart_upload(&key).await?;
                info!(%key, %upload_id, size, "started multipart upload");
                session.insert(
                    &skey,
                    SessionState::Multipart {
                        upload_id: upload_id.clone(),
                        parts: Vec::new(),
                        uploaded: 0,
                    },
                );
                (upload_id, Vec::new(), 0)
            }
        };

        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);
        let limit = request.max_length.map_or(u64::MAX, |_| part_size);
        reader.seek_to(request.offset).await?;

        let mut copied = 0u64;
        while copied < limit {
            let Some(body) = reader.read_up_to(part_size).await? else {
                break;
            };
            let len = body.len() as u64;
            let part_number = parts.len() as u32 + 1;
            let etag = match self
                .api
                .upload_part(&key, &upload_id, part_number, body)
                .await
            {
                Ok(etag) => etag,
                Err(e) if e.is_no_such_upload() => {
                    session.remove(&skey);
                    return Err(StorageError::SessionExpired(e.to_string()));
                }
                Err(e) if copied > 0 => {
                    warn!(%key, part_number, uploaded, error = %e, "part upload failed, keeping accepted parts");
                    return Ok(copied);
                }
                Err(e) => return Err(e.into()),
            };
            parts.push(CompletedPart {
                part_number,
                etag,
                size: len,
            });
            uploaded += len;
            copied += len;
            session.insert(
                &skey,
                SessionState::Multipart {
                    upload_id: upload_id.clone(),
                    parts: parts.clone(),
                    uploaded,
                },
            );
            debug!(%key, part_number, uploaded, size, "uploaded part");
            if deadline.reached() {
                break;
            }
        }

        if uploaded >= size {
            self.complete_upload(&key, &skey, &upload_id, &parts, session)
                .await?;
        }
        Ok(copied)
    }

    /// Commits the multipart upload. On a transient failure the session keeps
    /// every part so a later call can retry the commit.
    async fn complete_upload(
        &self,
        key: &str,
        skey: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        session: &mut SessionBag,
    ) -> Result<(), StorageError> {
        match self
            .api
            .complete_multipart_upload(key, upload_id, parts)
            .await
        {
            Ok(()) => {
                session.mark_complete(skey);
                info!(%key, %upload_id, parts = parts.len(), "completed multipart upload");
                Ok(())
            }
            Err(e) if e.is_no_such_upload() => {
                session.remove(skey);
                Err(StorageError::SessionExpired(e.to_string()))
            }
            Err(e) => {
                warn!(%key, %upload_id, error = %e, "multipart commit failed");
                Err(e.into())
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
        let key = self.key(source)?;
        let skey = session_key(source, dest);
        let size = match session.get(&skey) {
            Some(SessionState::Download { size, .. }) => *size,
            _ => {
                let meta = self
                    .api
                    .head_object(&key)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
                session.insert(
                    &skey,
                    SessionState::Download {
                        remote_id: Some(meta.key),
                        size: meta.size,
                    },
                );
                meta.size
            }
        };

        let dest_path = Path::new(dest);
        let mut writer = self.writer.lock().await;
        if size == 0 && request.offset == 0 {
            writer.write_at(dest_path, 0, &[]).await?;
            return Ok(0);
        }

        let deadline = Deadline::with_margin(request.timeout, TIMEOUT_MARGIN);
        let step = S3_CHUNK_POLICY.default;
        let limit = request.max_length.unwrap_or(u64::MAX);
        let mut copied = 0u64;
        while copied < limit {
            let at = request.offset + copied;
            if at >= size {
                break;
            }
            let last = (at + step.min(limit - copied)).min(size) - 1;
            let data = self.api.get_object(&key, Some((at, last))).await?;
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

    async fn purge(&self, max_age: Duration) -> Result<usize, StorageError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StorageError::provider("s3", e.to_string()))?;
        let cutoff = Utc::now() - max_age;
        let prefix = Self::dir_prefix(&self.prefix);

        let mut stale = Vec::new();
        let (mut key_marker, mut id_marker) = (None, None);
        loop {
            let page = self
                .api
                .list_multipart_uploads(&prefix, key_marker, id_marker)
                .await?;
            stale.extend(page.uploads.into_iter().filter(|u| u.initiated < cutoff));
            key_marker = page.next_key_marker;
            id_marker = page.next_upload_id_marker;
            if key_marker.is_none() {
                break;
            }
        }

        for upload in &stale {
            self.api
                .abort_multipart_upload(&upload.key, &upload.upload_id)
                .await?;
            info!(key = %upload.key, upload_id = %upload.upload_id, initiated = %upload.initiated, "aborted stale multipart upload");
        }
        Ok(stale.len())
    }
}

impl StorageAdapter for S3Adapter {
    fn name(&self) -> &str {
        "s3"
    }

    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<PathInfo, StorageError>> {
        Box::pin(self.stat_path(path))
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.create_dir_path(path))
    }

    fn create_file<'a>(
        &'a self,
        path: &'a str,
        content: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let key = self.key(path)?;
            self.api.put_object(&key, content.to_vec()).await?;
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
        Box::pin(self.move_key_path(old_path, new_path))
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
            let key = self.key(path)?;
            match self.api.get_object(&key, None).await {
                Ok(data) => Ok(data),
                Err(e) if e.is_not_found() => Err(StorageError::NotFound(path.to_string())),
                Err(e) => Err(e.into()),
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
                    warn!(source, dest, offset = request.offset, error = %e, "s3 upload chunk failed");
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
                    warn!(source, dest, offset = request.offset, error = %e, "s3 download chunk failed");
                })
        })
    }

    fn purge_stale_sessions(
        &self,
        max_age: Duration,
    ) -> BoxFuture<'_, Result<usize, StorageError>> {
        Box::pin(self.purge(max_age))
    }
}
