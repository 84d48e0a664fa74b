//! Data models shared by the store backends, the file service and the HTTP
//! layer.
//!
//! `Metadata` and `StoredObject` are the service-facing types; the `*Record`
//! structs map rows of the local SQLite backend via `sqlx::FromRow`.

pub mod bucket;
pub mod metadata;
pub mod object;
