//! Remote object store contract consumed by the file service.
//!
//! The trait mirrors the primitives an S3-compatible store offers: bucket
//! existence and creation, listing, stat, put, get, remove, and a
//! copy-with-new-metadata used for metadata-only updates. Implementations
//! must be safe to share across concurrent requests; the service holds one
//! `Arc<dyn ObjectStore>` for the process lifetime.

use crate::models::metadata::Metadata;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::{S3Settings, S3Store};

/// Object content as a stream of chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// A name returned by [`ObjectStore::list_objects`].
///
/// The listing primitive carries names only; metadata needs a stat per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub name: String,
}

/// Everything a store reports about one object without transferring it.
#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
    pub metadata: Metadata,
}

/// Preconditions for [`ObjectStore::copy_object`].
#[derive(Debug, Clone, Default)]
pub struct CopyConditions {
    /// Only copy when the source ETag still equals this value.
    pub match_etag: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{name}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, name: String },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("name `{name}` invalid: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("object store unreachable: {0}")]
    Unavailable(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("object store error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn not_found(bucket: &str, name: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        }
    }

    /// True when the named object (not the bucket) is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    async fn make_bucket(&self, bucket: &str, region: &str) -> StoreResult<()>;

    /// List object names, optionally restricted to `prefix`. Non-recursive
    /// listings stop at the next `/` below the prefix.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectEntry>>;

    async fn stat_object(&self, bucket: &str, name: &str) -> StoreResult<ObjectStat>;

    /// Store `content` under `name`, replacing any previous object.
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: Bytes,
        size: u64,
        metadata: &Metadata,
    ) -> StoreResult<()>;

    async fn get_object(&self, bucket: &str, name: &str) -> StoreResult<ByteStream>;

    /// Remove an object. Removing a missing name succeeds.
    async fn remove_object(&self, bucket: &str, name: &str) -> StoreResult<()>;

    /// Copy `source` to `dest` within `bucket`, replacing the metadata with
    /// `metadata`. Copying an object onto itself updates metadata in place.
    async fn copy_object(
        &self,
        bucket: &str,
        source: &str,
        dest: &str,
        conditions: &CopyConditions,
        metadata: &Metadata,
    ) -> StoreResult<()>;
}

/// Non-recursive listing filter shared by the local and memory backends:
/// keeps names directly below `prefix`.
pub(crate) fn is_direct_child(name: &str, prefix: &str, recursive: bool) -> bool {
    match name.strip_prefix(prefix) {
        Some(rest) => recursive || !rest.contains('/'),
        None => false,
    }
}

/// Lowercase hex MD5, the ETag flavour S3 uses for single-part objects.
pub(crate) fn content_etag(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}
