use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::debug;

use crate::StorageError;

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a local file sequentially in bounded chunks from any offset.
pub struct ChunkReader {
    file: File,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading from offset 0.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            offset: 0,
            file_size,
        })
    }

    /// Seeks to the given byte offset (for resume).
    pub async fn seek_to(&mut self, offset: u64) -> Result<(), StorageError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.offset = offset;
        Ok(())
    }

    /// Reads at most `limit` bytes from the current offset. Returns `None`
    /// at EOF.
    pub async fn read_up_to(&mut self, limit: u64) -> Result<Option<Vec<u8>>, StorageError> {
        let want = self.remaining().min(limit);
        if want == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; want as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(Some(buf))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// How a destination file is opened for a partial write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or truncate; used for the first chunk of a file.
    Truncate,
    /// Write into an existing file at an offset.
    Existing,
}

impl WriteMode {
    pub fn for_offset(offset: u64) -> Self {
        if offset == 0 {
            Self::Truncate
        } else {
            Self::Existing
        }
    }
}

/// Writes chunks into local files at exact offsets.
///
/// The most recently used destination handle is kept open and reused for
/// consecutive writes to the same path; it is reopened when the path
/// changes.
#[derive(Default)]
pub struct ChunkWriter {
    current: Option<(PathBuf, File)>,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `data` to `path` at `offset` and flushes it.
    ///
    /// Offset 0 truncates (creating parent directories); any other offset
    /// requires the file to exist already.
    pub async fn write_at(
        &mut self,
        path: &Path,
        offset: u64,
        data: &[u8],
    ) -> Result<u64, StorageError> {
        let mode = WriteMode::for_offset(offset);
        let file = self.handle(path, mode).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u64)
    }

    async fn handle(&mut self, path: &Path, mode: WriteMode) -> Result<&mut File, StorageError> {
        let reusable = mode == WriteMode::Existing
            && self.current.as_ref().is_some_and(|(p, _)| p == path);
        if !reusable {
            let file = match mode {
                WriteMode::Truncate => {
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    OpenOptions::new()
                        .create(true)
                        .write(true)
                        .truncate(true)
                        .open(path)
                        .await?
                }
                WriteMode::Existing => match OpenOptions::new().write(true).open(path).await {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::NotFound(path.display().to_string()));
                    }
                    Err(e) => return Err(e.into()),
                },
            };
            debug!(path = %path.display(), ?mode, "opened destination handle");
            self.current = Some((path.to_path_buf(), file));
        }
        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(StorageError::NotFound(path.display().to_string())),
        }
    }

    /// Path of the cached destination handle, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(p, _)| p.as_path())
    }

    /// Closes the cached handle.
    pub async fn close(&mut self) -> Result<(), StorageError> {
        if let Some((_, mut file)) = self.current.take() {
            file.flush().await?;
        }
        Ok(())
    }
}
