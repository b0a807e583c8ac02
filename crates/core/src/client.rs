//! S3-compatible storage client implementation using AWS S3 SDK
//!
//! S3 has no push notifications for multipart completion. The client
//! publishes [`StoreEvent::MultipartCompleted`] itself, but only when the
//! ETag returned by `CompleteMultipartUpload` carries the `-<parts>` suffix
//! of an object the store assembled from parts.

use crate::backend::{
    CompletedPart, ListPage, ObjectSummary, ObjectTarget, StorageBackend, StoreEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::config::{AdvancedConfig, StorageConfig};
use crate::encryption::EncryptionHandle;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{retry::RetryConfig, timeout::TimeoutConfig, Credentials, Region},
    primitives::ByteStream,
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CreateBucketConfiguration,
        ServerSideEncryption, ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration,
        ServerSideEncryptionRule,
    },
    Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Region in which buckets are created without a location constraint
const DEFAULT_REGION: &str = "us-east-1";

/// Attach the full set of server-side encryption parameters to a request builder.
macro_rules! with_sse {
    ($builder:expr, $handle:expr) => {
        with_customer_key!(
            $builder
                .set_server_side_encryption(sse_algorithm($handle))
                .set_ssekms_key_id(kms_key_id($handle)),
            $handle
        )
    };
}

/// Attach SSE-C parameters, required on every request touching an SSE-C object.
macro_rules! with_customer_key {
    ($builder:expr, $handle:expr) => {{
        let (algorithm, key, key_md5) = customer_key($handle);
        $builder
            .set_sse_customer_algorithm(algorithm)
            .set_sse_customer_key(key)
            .set_sse_customer_key_md5(key_md5)
    }};
}

/// Storage client for an S3-compatible object store
#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    object_locking: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl StorageClient {
    /// Create a new storage client.
    ///
    /// The SDK's own retries are disabled: re-sending an upload without an
    /// idempotency key can leave duplicate objects or stray multipart parts.
    pub fn new(storage: &StorageConfig, advanced: &AdvancedConfig) -> Self {
        // Create credentials
        let credentials = Credentials::new(
            &storage.access_key_id,
            &storage.secret_access_key,
            None,
            None,
            "s3gate",
        );

        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(advanced.timeout))
            .build();

        // Path-style addressing works with MinIO and every S3 clone
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(storage.endpoint_url())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts)
            .build();

        let client = Client::from_conf(config);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            client,
            object_locking: advanced.object_locking,
            events,
        }
    }
}

#[async_trait]
impl StorageBackend for StorageClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&self, bucket: &str, region: &str, object_locking: bool) -> Result<()> {
        let mut request = self
            .client
            .create_bucket()
            .bucket(bucket)
            .object_lock_enabled_for_bucket(object_locking);

        if !region.is_empty() && region != DEFAULT_REGION {
            let configuration = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build();
            request = request.create_bucket_configuration(configuration);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_bucket_already_owned_by_you()) => {
                debug!(bucket, "bucket already owned by us");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_default_encryption(&self, bucket: &str) -> Result<()> {
        let by_default = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build()
            .map_err(|e| Error::BackendTransfer(e.to_string()))?;

        let configuration = ServerSideEncryptionConfiguration::builder()
            .rules(
                ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(by_default)
                    .build(),
            )
            .build()
            .map_err(|e| Error::BackendTransfer(e.to_string()))?;

        self.client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, bucket))?;

        Ok(())
    }

    async fn put_object(
        &self,
        target: &ObjectTarget<'_>,
        body: ByteStream,
        length: u64,
    ) -> Result<Option<String>> {
        let request = self
            .client
            .put_object()
            .bucket(target.bucket)
            .key(target.key)
            .content_type(target.content_type)
            .content_length(length as i64)
            .body(body);

        let output = with_sse!(request, target.encryption)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, target.bucket))?;

        Ok(output.e_tag().map(str::to_string))
    }

    async fn create_multipart_upload(&self, target: &ObjectTarget<'_>) -> Result<String> {
        let request = self
            .client
            .create_multipart_upload()
            .bucket(target.bucket)
            .key(target.key)
            .content_type(target.content_type);

        let output = with_sse!(request, target.encryption)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, target.bucket))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::BackendTransfer("store returned no upload ID".to_string()))
    }

    async fn upload_part(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        let request = self
            .client
            .upload_part()
            .bucket(target.bucket)
            .key(target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body));

        let output = with_customer_key!(request, target.encryption)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, target.bucket))?;

        let etag = output.e_tag().ok_or_else(|| {
            Error::BackendTransfer(format!("store returned no ETag for part {}", part_number))
        })?;

        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>> {
        let parts = parts
            .into_iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();

        let request = self
            .client
            .complete_multipart_upload()
            .bucket(target.bucket)
            .key(target.key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build());

        let output = with_customer_key!(request, target.encryption)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, target.bucket))?;
        let etag = output.e_tag().map(str::to_string);

        if etag.as_deref().is_some_and(is_multipart_etag) {
            // Nobody listening is fine
            let _ = self.events.send(StoreEvent::MultipartCompleted {
                bucket: target.bucket.to_string(),
                key: target.key.to_string(),
                upload_id: upload_id.to_string(),
                etag: etag.clone(),
            });
        } else {
            debug!(key = target.key, etag = ?etag, "completed upload has no multipart ETag");
        }

        Ok(etag)
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, bucket))?;

        Ok(())
    }

    async fn uses_customer_key(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(output.sse_customer_algorithm().is_some()),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => {
                Err(Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            // HEAD of an SSE-C object without its key is refused with a bare 400
            Err(e) if e.raw_response().is_some_and(|r| r.status().as_u16() == 400) => Ok(true),
            Err(e) => Err(Error::in_bucket(e, bucket)),
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: &EncryptionHandle,
    ) -> Result<ByteStream> {
        let request = self.client.get_object().bucket(bucket).key(key);

        match with_customer_key!(request, encryption).send().await {
            Ok(output) => Ok(output.body),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                Err(Error::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(Error::in_bucket(e, bucket)),
        }
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix((!prefix.is_empty()).then(|| prefix.to_string()))
            .set_delimiter((!recursive).then(|| "/".to_string()))
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, bucket))?;

        let mut objects: Vec<ObjectSummary> = response
            .contents()
            .iter()
            .map(|obj| ObjectSummary {
                key: obj.key().unwrap_or("").to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj.last_modified().and_then(to_chrono),
                etag: obj.e_tag().unwrap_or("").trim_matches('"').to_string(),
            })
            .collect();

        // Folders of a non-recursive listing
        objects.extend(response.common_prefixes().iter().filter_map(|p| {
            p.prefix().map(|prefix| ObjectSummary {
                key: prefix.to_string(),
                size: 0,
                last_modified: None,
                etag: String::new(),
            })
        }));

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { objects, next_token })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut request = self.client.delete_object().bucket(bucket).key(key);
        if self.object_locking {
            request = request.bypass_governance_retention(true);
        }
        request
            .send()
            .await
            .map_err(|e| Error::in_bucket(e, bucket))?;

        info!(bucket, key, "removed object");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

fn sse_algorithm(handle: &EncryptionHandle) -> Option<ServerSideEncryption> {
    match handle {
        EncryptionHandle::ServerManaged => Some(ServerSideEncryption::Aes256),
        EncryptionHandle::Kms { .. } => Some(ServerSideEncryption::AwsKms),
        EncryptionHandle::None | EncryptionHandle::CustomerKey { .. } => None,
    }
}

fn kms_key_id(handle: &EncryptionHandle) -> Option<String> {
    match handle {
        EncryptionHandle::Kms { key_id } => Some(key_id.clone()),
        _ => None,
    }
}

fn customer_key(handle: &EncryptionHandle) -> (Option<String>, Option<String>, Option<String>) {
    match handle {
        EncryptionHandle::CustomerKey { key, key_md5 } => (
            Some("AES256".to_string()),
            Some(key.clone()),
            Some(key_md5.clone()),
        ),
        _ => (None, None, None),
    }
}

/// ETags of assembled multipart objects end in `-<part count>`
fn is_multipart_etag(etag: &str) -> bool {
    etag.trim_matches('"')
        .rsplit_once('-')
        .is_some_and(|(hash, parts)| {
            !hash.is_empty() && !parts.is_empty() && parts.bytes().all(|b| b.is_ascii_digit())
        })
}

fn to_chrono(value: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}
