//! Google Drive backend.
//!
//! Paths are resolved by walking folder names from the storage root; the
//! resolved ids are memoised per adapter. Uploads use Drive resumable
//! sessions, persisted in the session bag as the session URI plus the byte
//! count Drive has confirmed.

mod adapter;
mod api;
mod client;
mod error;
mod resumable;

#[cfg(test)]
mod testing;

pub use adapter::{GDRIVE_CHUNK_POLICY, GDriveAdapter};
pub use api::{ChunkOutcome, DriveApi, DriveFile, FOLDER_MIME_TYPE, FileList};
pub use client::HttpDriveClient;
pub use error::DriveError;
pub use resumable::ResumableUpload;
