//! Dropbox backend.
//!
//! Large uploads run as Dropbox upload sessions: the session id and the
//! byte offset form a cursor that is stored in the session bag between
//! chunks. Files that fit in one chunk are uploaded with a single request.

mod adapter;
mod api;
mod client;
mod error;

#[cfg(test)]
mod testing;

pub use adapter::{DROPBOX_CHUNK_POLICY, DropboxAdapter};
pub use api::{DropboxApi, Entry, ListFolderPage, UploadCursor};
pub use client::HttpDropboxClient;
pub use error::DropboxError;
