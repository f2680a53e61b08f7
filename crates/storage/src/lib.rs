//! Storage adapter contract shared by every backend.
//!
//! A backend implements [`StorageAdapter`]: a handful of primitive path
//! operations plus the two partial-copy primitives that the transfer engine
//! drives chunk by chunk. Resumable provider state travels between calls in a
//! [`SessionBag`], keyed per (source, destination) pair.

mod adapter;
mod cache;
mod chunked;
mod error;
mod local;
mod path_info;
mod policy;
mod session;
mod validation;

pub use adapter::{BoxFuture, ChunkRequest, StorageAdapter};
pub use cache::PathInfoCache;
pub use chunked::{ChunkReader, ChunkWriter, WriteMode};
pub use error::StorageError;
pub use local::LocalAdapter;
pub use path_info::PathInfo;
pub use policy::{ChunkPolicy, Deadline};
pub use session::{CompletedPart, SessionBag, SessionState, session_key};
pub use validation::{join_storage_path, normalize_storage_path};

/// Default chunk size used when a caller asks for "everything" and the
/// provider has no native preference: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
