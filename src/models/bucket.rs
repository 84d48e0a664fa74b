//! Represents a bucket row of the local SQLite backend.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A bucket: a flat namespace of objects.
#[derive(Clone, FromRow, Debug)]
pub struct BucketRecord {
    /// Bucket name, unique per store.
    pub name: String,

    /// Region recorded at creation (e.g. "us-east-1").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
