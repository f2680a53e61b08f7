//! Object store API seam.

use chrono::{DateTime, Utc};
use stowaway_storage::{BoxFuture, CompletedPart};

use crate::S3Error;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a (possibly delimited) object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    /// Common prefixes, including the trailing delimiter.
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: String,
    pub initiated: DateTime<Utc>,
}

/// One page of in-progress multipart uploads.
#[derive(Debug, Clone, Default)]
pub struct MultipartPage {
    pub uploads: Vec<MultipartUpload>,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Operations the adapter needs from an S3-compatible service.
///
/// Keys are full object keys within the configured bucket.
pub trait S3Api: Send + Sync {
    /// Returns `None` when the object does not exist.
    fn head_object<'a>(&'a self, key: &'a str)
    -> BoxFuture<'a, Result<Option<ObjectMeta>, S3Error>>;

    /// Stores `body` under `key`, returning the ETag.
    fn put_object<'a>(&'a self, key: &'a str, body: Vec<u8>)
    -> BoxFuture<'a, Result<String, S3Error>>;

    /// Reads an object, optionally restricted to the inclusive byte range
    /// `(first, last)`.
    fn get_object<'a>(
        &'a self,
        key: &'a str,
        range: Option<(u64, u64)>,
    ) -> BoxFuture<'a, Result<Vec<u8>, S3Error>>;

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), S3Error>>;

    fn copy_object<'a>(&'a self, from: &'a str, to: &'a str)
    -> BoxFuture<'a, Result<(), S3Error>>;

    fn list_objects<'a>(
        &'a self,
        prefix: &'a str,
        delimiter: Option<&'a str>,
        continuation: Option<String>,
    ) -> BoxFuture<'a, Result<ListPage, S3Error>>;

    /// Starts a multipart upload and returns its id.
    fn create_multipart_upload<'a>(&'a self, key: &'a str)
    -> BoxFuture<'a, Result<String, S3Error>>;

    /// Uploads one part, returning its ETag.
    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        part_number: u32,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, S3Error>>;

    fn complete_multipart_upload<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
        parts: &'a [CompletedPart],
    ) -> BoxFuture<'a, Result<(), S3Error>>;

    fn abort_multipart_upload<'a>(
        &'a self,
        key: &'a str,
        upload_id: &'a str,
    ) -> BoxFuture<'a, Result<(), S3Error>>;

    fn list_multipart_uploads<'a>(
        &'a self,
        prefix: &'a str,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
    ) -> BoxFuture<'a, Result<MultipartPage, S3Error>>;
}
