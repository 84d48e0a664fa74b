//! src/store/local.rs
//!
//! LocalStore: the store contract backed by SQLite for object rows and
//! metadata, and by local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{name}`. Lets the file manager run
//! without a remote S3-compatible service.

use super::{
    ByteStream, CopyConditions, ObjectEntry, ObjectStat, ObjectStore, StoreError, StoreResult,
    content_etag, is_direct_child,
};
use crate::models::{bucket::BucketRecord, metadata::Metadata, object::ObjectRecord};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Schema applied on connect and by `--migrate`.
const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_NAME_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for object rows and metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open (creating if needed) the SQLite database and payload directory,
    /// then apply the schema.
    pub async fn connect(database_url: &str, base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        debug!("connecting to SQLite at {}", database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        apply_schema(&pool).await?;

        Ok(Self::new(Arc::new(pool), base_path))
    }

    /// Reject names that could escape the bucket directory.
    fn ensure_name_safe(&self, name: &str) -> StoreResult<()> {
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_OBJECT_NAME_LEN {
            Some("is longer than 1024 bytes")
        } else if name.starts_with('/') || name.contains("..") {
            Some("must be relative and must not contain `..`")
        } else if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            Some("contains control characters or backslashes")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(StoreError::InvalidName {
                name: name.to_string(),
                reason: reason.into(),
            }),
            None => Ok(()),
        }
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard directories: first two bytes of MD5(bucket/name).
    fn object_shards(bucket: &str, name: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, name));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, name);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<BucketRecord> {
        sqlx::query_as::<_, BucketRecord>(
            "SELECT name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn fetch_object(&self, bucket: &str, name: &str) -> StoreResult<ObjectRecord> {
        self.ensure_name_safe(name)?;
        self.fetch_bucket(bucket).await?;
        sqlx::query_as::<_, ObjectRecord>(
            "SELECT bucket, name, size_bytes, etag, last_modified
             FROM objects WHERE bucket = ? AND name = ?",
        )
        .bind(bucket)
        .bind(name)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| StoreError::not_found(bucket, name))
    }

    async fn fetch_metadata(&self, bucket: &str, name: &str) -> StoreResult<Metadata> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT meta_key, meta_value FROM object_metadata
             WHERE bucket = ? AND object_name = ?",
        )
        .bind(bucket)
        .bind(name)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Write `content` to a fsynced temp file beside `file_path` and return
    /// its path. The caller renames it into place once the row is committed.
    async fn stage_payload(&self, file_path: &Path, content: &[u8]) -> StoreResult<PathBuf> {
        let parent = file_path.parent().ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(tmp_path)
    }

    /// Remove empty shard directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Upsert an object row, keeping the primary key stable so the metadata
/// rows are not cascaded away.
async fn upsert_object_row(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ObjectRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO objects (bucket, name, size_bytes, etag, last_modified)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(bucket, name) DO UPDATE SET
            size_bytes = excluded.size_bytes,
            etag = excluded.etag,
            last_modified = excluded.last_modified
        "#,
    )
    .bind(&record.bucket)
    .bind(&record.name)
    .bind(record.size_bytes)
    .bind(&record.etag)
    .bind(record.last_modified)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Replace the full metadata set of an object.
async fn replace_metadata_rows(
    tx: &mut Transaction<'_, Sqlite>,
    bucket: &str,
    name: &str,
    metadata: &Metadata,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM object_metadata WHERE bucket = ? AND object_name = ?")
        .bind(bucket)
        .bind(name)
        .execute(&mut **tx)
        .await?;
    for (key, value) in metadata.iter() {
        sqlx::query(
            "INSERT INTO object_metadata (bucket, object_name, meta_key, meta_value)
             VALUES (?, ?, ?, ?)",
        )
        .bind(bucket)
        .bind(name)
        .bind(key)
        .bind(value)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.fetch_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(StoreError::BucketNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> StoreResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;

        let record = BucketRecord {
            name: bucket.to_string(),
            region: region.to_lowercase(),
            created_at: Utc::now(),
        };
        let result = sqlx::query("INSERT INTO buckets (name, region, created_at) VALUES (?, ?, ?)")
            .bind(&record.name)
            .bind(&record.region)
            .bind(record.created_at)
            .execute(&*self.db)
            .await;

        match result {
            Ok(_) => {
                info!(bucket, region = %record.region, "created local bucket");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => Err(StoreError::Backend(format!(
                "bucket `{}` already exists",
                bucket
            ))),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectEntry>> {
        self.fetch_bucket(bucket).await?;
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM objects WHERE bucket = ? ORDER BY name ASC",
        )
        .bind(bucket)
        .fetch_all(&*self.db)
        .await?;

        Ok(names
            .into_iter()
            .filter(|name| is_direct_child(name, prefix, recursive))
            .map(|name| ObjectEntry { name })
            .collect())
    }

    async fn stat_object(&self, bucket: &str, name: &str) -> StoreResult<ObjectStat> {
        let record = self.fetch_object(bucket, name).await?;
        let metadata = self.fetch_metadata(bucket, name).await?;
        Ok(ObjectStat {
            size: record.size_bytes.max(0) as u64,
            last_modified: record.last_modified,
            etag: Some(record.etag),
            metadata,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: Bytes,
        size: u64,
        metadata: &Metadata,
    ) -> StoreResult<()> {
        self.ensure_name_safe(name)?;
        self.fetch_bucket(bucket).await?;
        if content.len() as u64 != size {
            return Err(StoreError::Backend(format!(
                "declared size {} does not match content length {}",
                size,
                content.len()
            )));
        }

        let file_path = self.object_path(bucket, name);
        let tmp_path = self.stage_payload(&file_path, &content).await?;

        let record = ObjectRecord {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size_bytes: content.len() as i64,
            etag: content_etag(&content),
            last_modified: Utc::now(),
        };
        let committed = async {
            let mut tx = self.db.begin().await?;
            upsert_object_row(&mut tx, &record).await?;
            replace_metadata_rows(&mut tx, bucket, name, metadata).await?;
            tx.commit().await
        }
        .await;

        // A failed commit leaves any previous row and payload untouched.
        if let Err(err) = committed {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Sqlx(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            error!(bucket, name, "payload rename failed after commit: {}", err);
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        debug!(bucket, name, size, "stored payload {}", file_path.display());
        Ok(())
    }

    async fn get_object(&self, bucket: &str, name: &str) -> StoreResult<ByteStream> {
        self.fetch_object(bucket, name).await?;
        let file_path = self.object_path(bucket, name);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::not_found(bucket, name)
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> StoreResult<()> {
        self.ensure_name_safe(name)?;
        self.fetch_bucket(bucket).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_metadata WHERE bucket = ? AND object_name = ?")
            .bind(bucket)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND name = ?")
            .bind(bucket)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!(bucket, name, "remove of missing object ignored");
            return Ok(());
        }

        let file_path = self.object_path(bucket, name);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket)).await;
        }
        Ok(())
    }

    async fn copy_object(
        &self,
        bucket: &str,
        source: &str,
        dest: &str,
        conditions: &CopyConditions,
        metadata: &Metadata,
    ) -> StoreResult<()> {
        let source_rec = self.fetch_object(bucket, source).await?;
        self.ensure_name_safe(dest)?;
        if let Some(expected) = conditions.match_etag.as_deref() {
            if source_rec.etag != expected {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag of `{}` is `{}`, expected `{}`",
                    source, source_rec.etag, expected
                )));
            }
        }

        if source != dest {
            let dest_path = self.object_path(bucket, dest);
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(self.object_path(bucket, source), &dest_path).await?;
        }

        let record = ObjectRecord {
            name: dest.to_string(),
            last_modified: Utc::now(),
            ..source_rec
        };
        let mut tx = self.db.begin().await?;
        upsert_object_row(&mut tx, &record).await?;
        replace_metadata_rows(&mut tx, bucket, dest, metadata).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Apply the embedded schema one statement at a time.
pub async fn apply_schema(db: &SqlitePool) -> StoreResult<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    debug!("applying {} schema statements", statements.len());
    for stmt in statements {
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
