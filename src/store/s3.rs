//! S3-compatible remote store (MinIO, AWS S3, R2).
//!
//! Uses aws-sdk-s3 with a custom endpoint and path-style addressing so any
//! S3 speaking service works. `Content-Type` travels as the object content
//! type; every other metadata key is sent as user metadata (`x-amz-meta-*`)
//! and folded back into one map on stat.

use super::{
    ByteStream, CopyConditions, ObjectEntry, ObjectStat, ObjectStore, StoreError, StoreResult,
};
use crate::models::metadata::{CONTENT_TYPE, Metadata};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{BehaviorVersion, Builder, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream as SdkByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration, MetadataDirective},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::HashMap;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

/// Characters left unescaped in `x-amz-copy-source`.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Default region S3 assumes when no location constraint is sent.
const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// Host name or IP, with or without an `http(s)://` scheme.
    pub endpoint: String,
    pub port: u16,
    pub use_ssl: bool,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl S3Settings {
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            return self.endpoint.trim_end_matches('/').to_string();
        }
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.endpoint, self.port)
    }
}

#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    pub fn new(settings: &S3Settings) -> Self {
        let endpoint = settings.endpoint_url();
        debug!("Creating S3 client with endpoint: {}", endpoint);

        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None, // session token
            None, // expiry
            "file-manager-static-credentials",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: S3Client::from_conf(config),
        }
    }
}

/// Map an SDK failure onto the store taxonomy.
///
/// Dispatch and timeout failures mean the endpoint was not reached; 401/403
/// mean it refused our credentials. Both count as unavailable.
fn classify<E>(err: SdkError<E>, bucket: &str, name: Option<&str>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    if matches!(
        err,
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)
    ) {
        return StoreError::Unavailable(message);
    }

    let status = err.raw_response().map(|resp| resp.status().as_u16());
    match (err.code(), status) {
        (Some("NoSuchBucket"), _) => StoreError::BucketNotFound(bucket.to_string()),
        (Some("NoSuchKey" | "NotFound"), _) | (_, Some(404)) => match name {
            Some(name) => StoreError::not_found(bucket, name),
            None => StoreError::BucketNotFound(bucket.to_string()),
        },
        (Some("PreconditionFailed"), _) | (_, Some(412)) => {
            StoreError::PreconditionFailed(message)
        }
        (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _)
        | (_, Some(401 | 403)) => StoreError::Unavailable(message),
        _ => StoreError::Backend(message),
    }
}

/// Split a metadata map into the content type and the user metadata S3
/// stores under `x-amz-meta-*`.
fn split_metadata(metadata: &Metadata) -> (Option<String>, HashMap<String, String>) {
    let content_type = metadata.get(CONTENT_TYPE).map(str::to_string);
    let user = metadata
        .iter()
        .filter(|(key, _)| *key != CONTENT_TYPE)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    (content_type, user)
}

fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|ts| DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos()))
        .unwrap_or_default()
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => match classify(err, bucket, None) {
                StoreError::BucketNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self))]
    async fn make_bucket(&self, bucket: &str, region: &str) -> StoreResult<()> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if region != DEFAULT_REGION {
            let location = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build();
            request = request.create_bucket_configuration(location);
        }
        request
            .send()
            .await
            .map_err(|err| classify(err, bucket, None))?;
        info!("Created S3 bucket {} in {}", bucket, region);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> StoreResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take());
            if !recursive {
                request = request.delimiter("/");
            }

            let page = request
                .send()
                .await
                .map_err(|err| classify(err, bucket, None))?;

            entries.extend(page.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectEntry {
                    name: key.to_string(),
                })
            }));

            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("Listed {} objects with prefix: {:?}", entries.len(), prefix);
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn stat_object(&self, bucket: &str, name: &str) -> StoreResult<ObjectStat> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| classify(err, bucket, Some(name)))?;

        let mut metadata: Metadata = head.metadata().into_iter().flatten().collect();
        if let Some(content_type) = head.content_type() {
            metadata.insert(CONTENT_TYPE, content_type);
        }

        Ok(ObjectStat {
            size: head.content_length().unwrap_or_default().max(0) as u64,
            last_modified: to_chrono(head.last_modified()),
            etag: head.e_tag().map(|etag| etag.trim_matches('"').to_string()),
            metadata,
        })
    }

    #[instrument(skip(self, content, metadata))]
    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content: Bytes,
        size: u64,
        metadata: &Metadata,
    ) -> StoreResult<()> {
        let (content_type, user_metadata) = split_metadata(metadata);
        let length = i64::try_from(size)
            .map_err(|_| StoreError::Backend(format!("size {} exceeds i64", size)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(name)
            .body(SdkByteStream::from(content))
            .content_length(length)
            .set_content_type(content_type)
            .set_metadata(Some(user_metadata))
            .send()
            .await
            .map_err(|err| classify(err, bucket, Some(name)))?;

        debug!("Uploaded {} bytes to S3: {}", size, name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, name: &str) -> StoreResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| classify(err, bucket, Some(name)))?;

        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }

    #[instrument(skip(self))]
    async fn remove_object(&self, bucket: &str, name: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(name)
            .send()
            .await
            .map_err(|err| classify(err, bucket, Some(name)))?;

        debug!("Deleted from S3: {}", name);
        Ok(())
    }

    #[instrument(skip(self, metadata))]
    async fn copy_object(
        &self,
        bucket: &str,
        source: &str,
        dest: &str,
        conditions: &CopyConditions,
        metadata: &Metadata,
    ) -> StoreResult<()> {
        let (content_type, user_metadata) = split_metadata(metadata);
        let copy_source = format!("{}/{}", bucket, utf8_percent_encode(source, COPY_SOURCE));

        self.client
            .copy_object()
            .bucket(bucket)
            .key(dest)
            .copy_source(copy_source)
            .set_copy_source_if_match(conditions.match_etag.clone())
            .metadata_directive(MetadataDirective::Replace)
            .set_content_type(content_type)
            .set_metadata(Some(user_metadata))
            .send()
            .await
            .map_err(|err| classify(err, bucket, Some(source)))?;

        debug!("Copied {} to {} in S3 bucket {}", source, dest, bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::{
        config::http::HttpResponse,
        error::ErrorMetadata,
        operation::{
            copy_object::CopyObjectError, head_bucket::HeadBucketError,
            head_object::HeadObjectError, list_objects_v2::ListObjectsV2Error,
        },
        primitives::SdkBody,
        types::error::NotFound,
    };

    fn service_error<E>(err: E, status: u16) -> SdkError<E> {
        let status = status.try_into().unwrap();
        SdkError::service_error(err, HttpResponse::new(status, SdkBody::empty()))
    }

    fn coded(code: &str) -> ErrorMetadata {
        ErrorMetadata::builder().code(code).build()
    }

    fn settings(endpoint: &str, use_ssl: bool) -> S3Settings {
        S3Settings {
            endpoint: endpoint.into(),
            port: 9000,
            use_ssl,
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn endpoint_url_uses_scheme_and_port() {
        assert_eq!(
            settings("localhost", false).endpoint_url(),
            "http://localhost:9000"
        );
        assert_eq!(
            settings("minio.internal", true).endpoint_url(),
            "https://minio.internal:9000"
        );
        assert_eq!(
            settings("https://s3.example.com/", true).endpoint_url(),
            "https://s3.example.com"
        );
    }

    #[test]
    fn content_type_is_split_from_user_metadata() {
        let meta: Metadata = [
            ("Content-Type", "text/plain"),
            ("Original-Name", "test.txt"),
            ("test", "value"),
        ]
        .into_iter()
        .collect();

        let (content_type, user) = split_metadata(&meta);
        assert_eq!(content_type.as_deref(), Some("text/plain"));
        assert_eq!(user.len(), 2);
        assert_eq!(user.get("original-name").map(String::as_str), Some("test.txt"));
        assert!(!user.contains_key(CONTENT_TYPE));
    }

    #[test]
    fn copy_source_escapes_unsafe_characters() {
        let encoded = utf8_percent_encode("dir/a b+c.txt", COPY_SOURCE).to_string();
        assert_eq!(encoded, "dir/a%20b%2Bc.txt");
    }

    #[test]
    fn head_object_404_is_object_not_found() {
        let err = service_error(HeadObjectError::NotFound(NotFound::builder().build()), 404);
        match classify(err, "files", Some("x")) {
            StoreError::NotFound { bucket, name } => {
                assert_eq!(bucket, "files");
                assert_eq!(name, "x");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_bucket_is_bucket_not_found() {
        let head = service_error(HeadBucketError::NotFound(NotFound::builder().build()), 404);
        assert!(matches!(
            classify(head, "files", None),
            StoreError::BucketNotFound(bucket) if bucket == "files"
        ));

        // the code wins over the status, even when an object name is known
        let list = service_error(ListObjectsV2Error::generic(coded("NoSuchBucket")), 404);
        assert!(matches!(
            classify(list, "files", Some("x")),
            StoreError::BucketNotFound(_)
        ));
    }

    #[test]
    fn stale_copy_source_is_precondition_failed() {
        let err = service_error(CopyObjectError::generic(coded("PreconditionFailed")), 412);
        assert!(matches!(
            classify(err, "files", Some("x")),
            StoreError::PreconditionFailed(_)
        ));

        let bare = service_error(CopyObjectError::generic(ErrorMetadata::builder().build()), 412);
        assert!(matches!(
            classify(bare, "files", Some("x")),
            StoreError::PreconditionFailed(_)
        ));
    }

    #[test]
    fn refused_credentials_are_unavailable() {
        for status in [401, 403] {
            let err = service_error(HeadObjectError::generic(ErrorMetadata::builder().build()), status);
            assert!(
                matches!(classify(err, "files", Some("x")), StoreError::Unavailable(_)),
                "{status}"
            );
        }
        let denied = service_error(HeadObjectError::generic(coded("AccessDenied")), 400);
        assert!(matches!(
            classify(denied, "files", Some("x")),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn unreachable_endpoint_is_unavailable() {
        let err: SdkError<HeadObjectError> =
            SdkError::timeout_error(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
        assert!(matches!(
            classify(err, "files", Some("x")),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn other_failures_are_backend_errors() {
        let err = service_error(HeadObjectError::generic(coded("InternalError")), 500);
        assert!(matches!(
            classify(err, "files", Some("x")),
            StoreError::Backend(_)
        ));
    }
}
