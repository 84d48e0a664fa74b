//! src/services/file_service.rs
//!
//! FileService: the file lifecycle on top of an [`ObjectStore`]: generated
//! names, upload with default metadata, existence-checked download and
//! metadata reads, delete, and metadata-only updates via copy-onto-self.
//!
//! Every operation is one independent request against the store. Nothing is
//! retried here; callers own retry and timeout policy.

use crate::{
    models::{
        metadata::{CONTENT_TYPE, Metadata, ORIGINAL_NAME},
        object::StoredObject,
    },
    store::{ByteStream, CopyConditions, ObjectStat, ObjectStore, StoreError},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("object store unavailable during {context}: {source}")]
    StoreUnavailable {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to upload `{name}`: {source}")]
    UploadFailed {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to delete `{name}`: {source}")]
    DeleteFailed {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to update metadata of `{name}`: {source}")]
    MetadataUpdateFailed {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type FileResult<T> = Result<T, FileError>;

/// Which MIME types an upload may declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedTypes {
    Any,
    Only(Vec<String>),
}

impl AllowedTypes {
    /// Parse `*/*` or a comma-separated MIME list.
    pub fn parse(raw: &str) -> Self {
        let types: Vec<String> = raw
            .split(',')
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if types.is_empty() || types.iter().any(|t| t == "*/*") {
            AllowedTypes::Any
        } else {
            AllowedTypes::Only(types)
        }
    }

    pub fn permits(&self, mime: &str) -> bool {
        match self {
            AllowedTypes::Any => true,
            AllowedTypes::Only(types) => types.iter().any(|t| t.eq_ignore_ascii_case(mime.trim())),
        }
    }
}

/// Checks applied to every upload before the store is touched.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_file_size: u64,
    pub allowed_types: AllowedTypes,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            allowed_types: AllowedTypes::Any,
        }
    }
}

/// A file about to be uploaded, fully buffered in memory.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub content: Bytes,
    pub original_name: String,
    pub mime_type: String,
    pub metadata: Metadata,
}

/// A started download: what the existence check saw, plus the content.
pub struct Download {
    pub stat: ObjectStat,
    pub body: ByteStream,
}

/// Generate the stored name for `original_name` uploaded at `at`.
///
/// MD5 over the original name followed by the nanosecond timestamp, plus the
/// original extension when there is one. Two uploads collide only when both
/// name and timestamp match; there is no existence check.
pub fn object_name(original_name: &str, at: DateTime<Utc>) -> String {
    let nanos = at
        .timestamp_nanos_opt()
        .map(i128::from)
        .unwrap_or_else(|| i128::from(at.timestamp()) * 1_000_000_000);
    let hash = md5::compute(format!("{}{}", original_name, nanos));
    match original_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!("{:x}.{}", hash, ext),
        _ => format!("{:x}", hash),
    }
}

/// The object store client shared by every request handler.
#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    region: String,
    policy: UploadPolicy,
}

impl FileService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        region: impl Into<String>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            region: region.into(),
            policy,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Create the configured bucket unless it already exists.
    ///
    /// Run once at startup. Two processes racing here may both see the
    /// bucket missing; the loser's create fails and is reported.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn initialize_bucket(&self) -> FileResult<()> {
        let exists = self
            .store
            .bucket_exists(&self.bucket)
            .await
            .map_err(|err| self.unavailable("initialize bucket", err))?;
        if exists {
            info!("Bucket {} already present", self.bucket);
            return Ok(());
        }
        self.store
            .make_bucket(&self.bucket, &self.region)
            .await
            .map_err(|err| self.unavailable("initialize bucket", err))?;
        info!("Bucket created successfully: {}", self.bucket);
        Ok(())
    }

    /// Report whether the store answers and the bucket is there.
    pub async fn ready(&self) -> FileResult<bool> {
        self.store
            .bucket_exists(&self.bucket)
            .await
            .map_err(|err| self.unavailable("readiness check", err))
    }

    /// List every object in the bucket with its stat-derived attributes.
    ///
    /// The listing primitive carries names only, so each entry costs one
    /// extra stat. Any failure, including an object vanishing between list
    /// and stat, fails the whole listing.
    #[instrument(skip(self))]
    pub async fn list(&self) -> FileResult<Vec<StoredObject>> {
        let entries = self
            .store
            .list_objects(&self.bucket, "", true)
            .await
            .map_err(|err| self.unavailable("list files", err))?;

        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            let stat = self
                .store
                .stat_object(&self.bucket, &entry.name)
                .await
                .map_err(|err| self.unavailable(&format!("list files (stat `{}`)", entry.name), err))?;
            files.push(StoredObject {
                name: entry.name,
                size: stat.size,
                last_modified: stat.last_modified,
                metadata: stat.metadata,
            });
        }
        Ok(files)
    }

    /// Store a new file under a generated name and return that name.
    #[instrument(skip(self, file), fields(original_name = %file.original_name, size = file.content.len()))]
    pub async fn upload(&self, file: NewFile) -> FileResult<String> {
        let metadata = self.check_upload(&file)?;
        let name = object_name(&file.original_name, Utc::now());
        let size = file.content.len() as u64;

        if let Err(err) = self
            .store
            .put_object(&self.bucket, &name, file.content, size, &metadata)
            .await
        {
            error!(object = %name, error = %err, "Error uploading file");
            return Err(FileError::UploadFailed { name, source: err });
        }

        info!(
            object = %name,
            original_name = %file.original_name,
            size,
            metadata = ?metadata,
            "File uploaded successfully"
        );
        Ok(name)
    }

    /// Stat the object, then open its content.
    ///
    /// Absent objects fail with `NotFound` before any transfer starts. The
    /// stat and the fetch are separate calls; a delete landing in between
    /// surfaces as whatever the fetch reports.
    #[instrument(skip(self))]
    pub async fn download(&self, name: &str) -> FileResult<Download> {
        let stat = self.stat(name, "download").await?;
        let body = self.store.get_object(&self.bucket, name).await.map_err(|err| {
            error!(object = %name, error = %err, "Error downloading file");
            self.read_error(name, "download", err)
        })?;
        Ok(Download { stat, body })
    }

    /// Remove an object without checking that it exists first.
    ///
    /// All bundled backends treat deleting a missing name as success.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> FileResult<()> {
        if let Err(err) = self.store.remove_object(&self.bucket, name).await {
            error!(object = %name, error = %err, "Error deleting file");
            return Err(match err {
                StoreError::InvalidName { reason, .. } => FileError::InvalidInput(reason),
                err => FileError::DeleteFailed {
                    name: name.to_string(),
                    source: err,
                },
            });
        }
        info!(object = %name, "File deleted successfully");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_metadata(&self, name: &str) -> FileResult<Metadata> {
        Ok(self.stat(name, "get metadata").await?.metadata)
    }

    /// Merge `update` into the stored metadata (right-biased) and write the
    /// result back by copying the object onto itself.
    ///
    /// Read-merge-write is not atomic: two concurrent updates each merge
    /// against what they read and the last copy to complete wins. The copy is
    /// conditioned on the ETag the stat saw, which pins the merged metadata
    /// to the content it was computed against.
    #[instrument(skip(self, update))]
    pub async fn update_metadata(&self, name: &str, update: &Metadata) -> FileResult<()> {
        update.validate().map_err(FileError::InvalidInput)?;

        let current = match self.store.stat_object(&self.bucket, name).await {
            Ok(stat) => stat,
            Err(err) if err.is_not_found() => return Err(FileError::NotFound(name.to_string())),
            Err(StoreError::InvalidName { reason, .. }) => {
                return Err(FileError::InvalidInput(reason));
            }
            Err(err) => {
                error!(object = %name, error = %err, "Error updating file metadata");
                return Err(FileError::MetadataUpdateFailed {
                    name: name.to_string(),
                    source: err,
                });
            }
        };

        let merged = current.metadata.merged(update);
        let conditions = CopyConditions {
            match_etag: current.etag.clone(),
        };
        if let Err(err) = self
            .store
            .copy_object(&self.bucket, name, name, &conditions, &merged)
            .await
        {
            error!(object = %name, error = %err, "Error updating file metadata");
            return Err(FileError::MetadataUpdateFailed {
                name: name.to_string(),
                source: err,
            });
        }

        info!(
            object = %name,
            updated_keys = update.len(),
            metadata = ?merged,
            "File metadata updated successfully"
        );
        Ok(())
    }

    /// Validate an upload against the policy and build its full metadata:
    /// defaults first, caller keys on top.
    fn check_upload(&self, file: &NewFile) -> FileResult<Metadata> {
        if file.original_name.trim().is_empty() {
            return Err(FileError::InvalidInput("file name must not be empty".into()));
        }
        let size = file.content.len() as u64;
        if size > self.policy.max_file_size {
            return Err(FileError::InvalidInput(format!(
                "file size {} exceeds the limit of {} bytes",
                size, self.policy.max_file_size
            )));
        }
        if !self.policy.allowed_types.permits(&file.mime_type) {
            return Err(FileError::InvalidInput(format!(
                "file type {} is not allowed",
                file.mime_type
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert(CONTENT_TYPE, file.mime_type.as_str());
        metadata.insert(ORIGINAL_NAME, file.original_name.as_str());
        metadata.extend_from(&file.metadata);
        metadata.validate().map_err(FileError::InvalidInput)?;
        Ok(metadata)
    }

    async fn stat(&self, name: &str, operation: &str) -> FileResult<ObjectStat> {
        self.store
            .stat_object(&self.bucket, name)
            .await
            .map_err(|err| {
                if !err.is_not_found() {
                    error!(object = %name, error = %err, "Error during {}", operation);
                }
                self.read_error(name, operation, err)
            })
    }

    fn read_error(&self, name: &str, operation: &str, err: StoreError) -> FileError {
        match err {
            err if err.is_not_found() => FileError::NotFound(name.to_string()),
            StoreError::InvalidName { reason, .. } => FileError::InvalidInput(reason),
            err => FileError::StoreUnavailable {
                context: format!("{} `{}`", operation, name),
                source: err,
            },
        }
    }

    fn unavailable(&self, context: &str, err: StoreError) -> FileError {
        error!(bucket = %self.bucket, error = %err, "Error during {}", context);
        FileError::StoreUnavailable {
            context: context.to_string(),
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use futures::TryStreamExt;
    use std::collections::HashSet;

    async fn service() -> FileService {
        service_with(UploadPolicy::default()).await
    }

    async fn service_with(policy: UploadPolicy) -> FileService {
        let svc = FileService::new(Arc::new(MemoryStore::new()), "files", "us-east-1", policy);
        svc.initialize_bucket().await.unwrap();
        svc
    }

    fn new_file(content: &'static [u8], name: &str, meta: &[(&str, &str)]) -> NewFile {
        NewFile {
            content: Bytes::from_static(content),
            original_name: name.to_string(),
            mime_type: "text/plain".to_string(),
            metadata: meta.iter().copied().collect(),
        }
    }

    async fn read_body(download: Download) -> Vec<u8> {
        let chunks: Vec<Bytes> = download.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[test]
    fn names_keep_extension_and_differ_by_timestamp() {
        let t1 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let t2 = Utc.timestamp_opt(1_700_000_000, 1).unwrap();

        let a = object_name("test.txt", t1);
        let b = object_name("test.txt", t2);
        assert!(a.ends_with(".txt"));
        assert_eq!(a.len(), 32 + 4);
        assert_ne!(a, b);
        assert_eq!(a, object_name("test.txt", t1));

        assert_eq!(object_name("README", t1).len(), 32);
        assert!(object_name("archive.tar.gz", t1).ends_with(".gz"));
        assert!(!object_name("trailing.", t1).contains('.'));
    }

    #[test]
    fn names_are_unique_across_many_timestamps() {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let names: HashSet<String> = (0..1000)
            .map(|i| object_name("same.pdf", base + chrono::Duration::nanoseconds(i)))
            .collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn allowed_types_parsing() {
        assert_eq!(AllowedTypes::parse("*/*"), AllowedTypes::Any);
        assert_eq!(AllowedTypes::parse(""), AllowedTypes::Any);
        let only = AllowedTypes::parse("text/plain, application/json");
        assert!(only.permits("text/plain"));
        assert!(only.permits("Application/JSON"));
        assert!(!only.permits("image/png"));
    }

    #[tokio::test]
    async fn initialize_bucket_is_idempotent() {
        let svc = service().await;
        svc.initialize_bucket().await.unwrap();
        svc.initialize_bucket().await.unwrap();
        assert!(svc.ready().await.unwrap());
    }

    #[tokio::test]
    async fn upload_then_download_returns_same_bytes() {
        let svc = service().await;
        let name = svc
            .upload(new_file(b"round trip content", "notes.md", &[]))
            .await
            .unwrap();
        let download = svc.download(&name).await.unwrap();
        assert_eq!(download.stat.size, 18);
        assert_eq!(read_body(download).await, b"round trip content");
    }

    #[tokio::test]
    async fn upload_attaches_default_metadata() {
        let svc = service().await;
        let name = svc
            .upload(new_file(b"x", "a.txt", &[("a", "1")]))
            .await
            .unwrap();
        let meta = svc.get_metadata(&name).await.unwrap();
        assert_eq!(meta.get("a"), Some("1"));
        assert_eq!(meta.get("Content-Type"), Some("text/plain"));
        assert_eq!(meta.get("Original-Name"), Some("a.txt"));
    }

    #[tokio::test]
    async fn caller_metadata_overrides_defaults() {
        let svc = service().await;
        let name = svc
            .upload(new_file(b"{}", "a.txt", &[("Content-Type", "application/json")]))
            .await
            .unwrap();
        let meta = svc.get_metadata(&name).await.unwrap();
        assert_eq!(meta.get(CONTENT_TYPE), Some("application/json"));
        assert_eq!(meta.get(ORIGINAL_NAME), Some("a.txt"));
    }

    #[tokio::test]
    async fn update_metadata_merges() {
        let svc = service().await;
        let name = svc
            .upload(new_file(b"x", "a.txt", &[("a", "1"), ("b", "1")]))
            .await
            .unwrap();

        let update: Metadata = [("a", "2")].into_iter().collect();
        svc.update_metadata(&name, &update).await.unwrap();

        let meta = svc.get_metadata(&name).await.unwrap();
        assert_eq!(meta.get("a"), Some("2"));
        assert_eq!(meta.get("b"), Some("1"));
        assert_eq!(meta.get(CONTENT_TYPE), Some("text/plain"));
        assert_eq!(meta.get(ORIGINAL_NAME), Some("a.txt"));
        assert_eq!(meta.len(), 4);

        let download = svc.download(&name).await.unwrap();
        assert_eq!(read_body(download).await, b"x");
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let svc = service().await;
        assert!(matches!(
            svc.download("nonexistent").await,
            Err(FileError::NotFound(_))
        ));
        assert!(matches!(
            svc.get_metadata("nonexistent").await,
            Err(FileError::NotFound(_))
        ));
        let update: Metadata = [("a", "1")].into_iter().collect();
        assert!(matches!(
            svc.update_metadata("nonexistent", &update).await,
            Err(FileError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_and_delete_scenario() {
        let svc = service().await;
        let name = svc
            .upload(new_file(b"0123456789", "test.txt", &[("test", "value")]))
            .await
            .unwrap();
        assert!(name.ends_with(".txt"));

        let files = svc.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, name);
        assert_eq!(files[0].size, 10);
        assert_eq!(files[0].metadata.get("test"), Some("value"));

        svc.delete(&name).await.unwrap();
        assert!(svc.list().await.unwrap().is_empty());

        // deleting again is silent on every bundled backend
        svc.delete(&name).await.unwrap();
    }

    #[tokio::test]
    async fn identical_names_do_not_collide() {
        let svc = service().await;
        let mut names = HashSet::new();
        for _ in 0..20 {
            names.insert(svc.upload(new_file(b"x", "same.txt", &[])).await.unwrap());
        }
        assert_eq!(names.len(), 20);
        assert_eq!(svc.list().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn policy_rejects_oversized_and_disallowed_uploads() {
        let svc = service_with(UploadPolicy {
            max_file_size: 4,
            allowed_types: AllowedTypes::parse("text/plain"),
        })
        .await;

        let too_big = svc.upload(new_file(b"12345", "a.txt", &[])).await;
        assert!(matches!(too_big, Err(FileError::InvalidInput(_))));

        let mut png = new_file(b"1", "a.png", &[]);
        png.mime_type = "image/png".into();
        assert!(matches!(svc.upload(png).await, Err(FileError::InvalidInput(_))));

        let bad_meta = svc.upload(new_file(b"1", "a.txt", &[("bad key", "v")])).await;
        assert!(matches!(bad_meta, Err(FileError::InvalidInput(_))));

        let unnamed = svc.upload(new_file(b"1", "  ", &[])).await;
        assert!(matches!(unnamed, Err(FileError::InvalidInput(_))));

        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_bucket_surfaces_as_unavailable() {
        let svc = FileService::new(
            Arc::new(MemoryStore::new()),
            "files",
            "us-east-1",
            UploadPolicy::default(),
        );
        assert!(!svc.ready().await.unwrap());
        assert!(matches!(
            svc.list().await,
            Err(FileError::StoreUnavailable { .. })
        ));
        assert!(matches!(
            svc.upload(new_file(b"x", "a.txt", &[])).await,
            Err(FileError::UploadFailed { .. })
        ));
    }
}
