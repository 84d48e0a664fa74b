//! Process-local object store.
//!
//! Keeps every bucket in a map behind a `tokio` lock. Nothing survives a
//! restart; used for tests and `--backend memory` development runs.

use super::{
    ByteStream, CopyConditions, ObjectEntry, ObjectStat, ObjectStore, StoreError, StoreResult,
    content_etag, is_direct_child,
};
use crate::models::metadata::Metadata;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Debug)]
struct MemoryObject {
    content: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
    metadata: Metadata,
}

#[derive(Default, Debug)]
struct MemoryBucket {
    objects: BTreeMap<String, MemoryObject>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    buckets: Arc<RwLock<HashMap<String, MemoryBucket>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StoreError::Backend(format!(
                "bucket `{}` already exists",
                bucket
            )));
        }
        buckets.insert(bucket.to_string(), MemoryBucket::default());
        debug!(bucket, region, "created in-memory bucket");
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectEntry>> {
        let buckets = self.buckets.read().await;
        let bucket_rec = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        Ok(bucket_rec
            .objects
            .keys()
            .filter(|name| is_direct_child(name, prefix, recursive))
            .map(|name| ObjectEntry { name: name.clone() })
            .collect())
    }

    async fn stat_object(&self, bucket: &str, name: &str) -> StoreResult<ObjectStat> {
        let buckets = self.buckets.read().await;
        let bucket_rec = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let object = bucket_rec
            .objects
            .get(name)
            .ok_or_else(|| StoreError::not_found(bucket, name))?;
        Ok(ObjectStat {
            size: object.content.len() as u64,
            last_modified: object.last_modified,
            etag: Some(object.etag.clone()),
            metadata: object.metadata.clone(),
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
        if content.len() as u64 != size {
            return Err(StoreError::Backend(format!(
                "declared size {} does not match content length {}",
                size,
                content.len()
            )));
        }
        let mut buckets = self.buckets.write().await;
        let bucket_rec = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let etag = content_etag(&content);
        bucket_rec.objects.insert(
            name.to_string(),
            MemoryObject {
                content,
                etag,
                last_modified: Utc::now(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, name: &str) -> StoreResult<ByteStream> {
        let buckets = self.buckets.read().await;
        let bucket_rec = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let object = bucket_rec
            .objects
            .get(name)
            .ok_or_else(|| StoreError::not_found(bucket, name))?;
        let content = object.content.clone();
        Ok(stream::once(async move { Ok(content) }).boxed())
    }

    async fn remove_object(&self, bucket: &str, name: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let bucket_rec = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        bucket_rec.objects.remove(name);
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
        let mut buckets = self.buckets.write().await;
        let bucket_rec = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        let src = bucket_rec
            .objects
            .get(source)
            .ok_or_else(|| StoreError::not_found(bucket, source))?;
        if let Some(expected) = conditions.match_etag.as_deref() {
            if src.etag != expected {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag of `{}` is `{}`, expected `{}`",
                    source, src.etag, expected
                )));
            }
        }
        let copied = MemoryObject {
            content: src.content.clone(),
            etag: src.etag.clone(),
            last_modified: Utc::now(),
            metadata: metadata.clone(),
        };
        bucket_rec.objects.insert(dest.to_string(), copied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn store_with_bucket() -> MemoryStore {
        let store = MemoryStore::new();
        store.make_bucket("files", "us-east-1").await.unwrap();
        store
    }

    #[tokio::test]
    async fn copy_onto_itself_replaces_metadata_only() {
        let store = store_with_bucket().await;
        let meta: Metadata = [("a", "1")].into_iter().collect();
        store
            .put_object("files", "x.txt", Bytes::from_static(b"hello"), 5, &meta)
            .await
            .unwrap();

        let replacement: Metadata = [("b", "2")].into_iter().collect();
        store
            .copy_object(
                "files",
                "x.txt",
                "x.txt",
                &CopyConditions::default(),
                &replacement,
            )
            .await
            .unwrap();

        let stat = store.stat_object("files", "x.txt").await.unwrap();
        assert_eq!(stat.metadata, replacement);
        assert_eq!(stat.size, 5);

        let body: Vec<Bytes> = store
            .get_object("files", "x.txt")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(body.concat(), b"hello");
    }

    #[tokio::test]
    async fn copy_with_stale_etag_is_rejected() {
        let store = store_with_bucket().await;
        store
            .put_object("files", "x.txt", Bytes::from_static(b"v1"), 2, &Metadata::new())
            .await
            .unwrap();
        let conditions = CopyConditions {
            match_etag: Some("not-the-etag".into()),
        };
        let err = store
            .copy_object("files", "x.txt", "x.txt", &conditions, &Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn non_recursive_listing_stops_at_slash() {
        let store = store_with_bucket().await;
        for name in ["a.txt", "dir/b.txt", "dir/sub/c.txt"] {
            store
                .put_object("files", name, Bytes::new(), 0, &Metadata::new())
                .await
                .unwrap();
        }
        let top = store.list_objects("files", "", false).await.unwrap();
        assert_eq!(top, vec![ObjectEntry { name: "a.txt".into() }]);

        let dir = store.list_objects("files", "dir/", false).await.unwrap();
        assert_eq!(dir, vec![ObjectEntry { name: "dir/b.txt".into() }]);

        let all = store.list_objects("files", "", true).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn removing_missing_object_succeeds() {
        let store = store_with_bucket().await;
        store.remove_object("files", "ghost").await.unwrap();
    }
}
