//! Represents an object (file) stored in a bucket.

use super::metadata::Metadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A stored object as reported by a listing.
///
/// Size and modification time are observed from the store; the caller never
/// sets them.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Generated object name (hash plus original extension).
    pub name: String,

    /// Size in bytes.
    pub size: u64,

    /// Timestamp when the object was last written.
    pub last_modified: DateTime<Utc>,

    /// Full metadata, including `content-type` and `original-name`.
    pub metadata: Metadata,
}

/// Object row of the local SQLite backend.
///
/// The row stores what the store observes; user metadata lives in
/// `object_metadata`, one row per key.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Name of the parent bucket.
    pub bucket: String,

    /// Object name within the bucket.
    pub name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the content, lowercase hex.
    pub etag: String,

    /// Timestamp when the object (content or metadata) was last written.
    pub last_modified: DateTime<Utc>,
}
