//! S3-compatible object store backend.
//!
//! [`S3Adapter`] implements the storage contract on top of the [`S3Api`]
//! seam. Large files go through multipart uploads whose state is carried in
//! the transfer's session bag, so an upload interrupted between parts picks
//! up at the next part number in a later tick. [`HttpS3Client`] is the
//! production implementation of the seam (reqwest + SigV4).

mod adapter;
mod api;
mod client;
mod error;
mod signing;
mod xml;

#[cfg(test)]
mod testing;

pub use adapter::{S3_CHUNK_POLICY, S3Adapter};
pub use api::{ListPage, MultipartPage, MultipartUpload, ObjectMeta, S3Api};
pub use client::{HttpS3Client, S3ClientConfig};
pub use error::S3Error;
pub use signing::Credentials;
