//! Named storage configurations and the adapters built from them.
//!
//! Providers are a closed set ([`StorageKind`]). A [`StorageRegistry`] maps
//! each kind to a constructor, holds the configured storages by name and
//! knows which one is the default. It is built once at startup and passed to
//! whoever needs an adapter.

mod config;
mod registry;

pub use config::{StorageConfig, StorageKind};
pub use registry::{Constructor, StorageRegistry};

use stowaway_dropbox::DropboxError;
use stowaway_gdrive::DriveError;
use stowaway_s3::S3Error;
use stowaway_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown storage: {0}")]
    UnknownStorage(String),

    #[error("no default storage configured")]
    NoDefault,

    #[error("no constructor registered for {0}")]
    Unsupported(StorageKind),

    #[error("storage {0} has no access token")]
    MissingToken(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    S3(#[from] S3Error),

    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error(transparent)]
    Dropbox(#[from] DropboxError),
}
