//! The object-store capability shared by every component.
//!
//! A [`StorageBackend`] is built once at startup and handed around as an
//! `Arc<dyn StorageBackend>`. Implementations are never mutated after
//! construction and must be safe to call from many requests at once.
//! Every method reports failures already classified into [`crate::Error`]
//! kinds, so callers match on variants and never on message text.

use crate::encryption::EncryptionHandle;
use crate::error::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel a backend publishes on
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Where an object is written and how
#[derive(Debug, Clone)]
pub struct ObjectTarget<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub content_type: &'a str,
    pub encryption: &'a EncryptionHandle,
}

/// A part acknowledged by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Metadata of one listed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    #[serde(rename = "name")]
    pub key: String,
    pub size: i64,
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: String,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectSummary>,
    pub next_token: Option<String>,
}

/// Notifications published by a backend.
///
/// `MultipartCompleted` is only sent once the store itself shows the object
/// was assembled from parts. For S3 that evidence is the `-<parts>` suffix of
/// the ETag returned by `CompleteMultipartUpload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The backend assembled a multipart upload into an object
    MultipartCompleted {
        bucket: String,
        key: String,
        upload_id: String,
        etag: Option<String>,
    },
}

impl StoreEvent {
    /// Whether this event concerns `bucket`/`key`
    pub fn is_for(&self, bucket: &str, key: &str) -> bool {
        match self {
            StoreEvent::MultipartCompleted { bucket: b, key: k, .. } => b == bucket && k == key,
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create `bucket` in `region`. An existing bucket may be reported as an error.
    async fn create_bucket(&self, bucket: &str, region: &str, object_locking: bool) -> Result<()>;

    /// Make server-managed (AES256) encryption the bucket default
    async fn put_default_encryption(&self, bucket: &str) -> Result<()>;

    /// Single-shot upload of `length` bytes; returns the ETag when the store
    /// reports one
    async fn put_object(
        &self,
        target: &ObjectTarget<'_>,
        body: ByteStream,
        length: u64,
    ) -> Result<Option<String>>;

    /// Start a multipart upload; returns the upload ID
    async fn create_multipart_upload(&self, target: &ObjectTarget<'_>) -> Result<String>;

    async fn upload_part(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    /// Whether reading `bucket`/`key` requires SSE-C parameters.
    /// A missing key is `Error::ObjectNotFound`.
    async fn uses_customer_key(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Fetch an object body. A missing key is `Error::ObjectNotFound`.
    /// SSE-C parameters are rejected for objects not stored with them.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: &EncryptionHandle,
    ) -> Result<ByteStream>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;

    /// Remove the latest version of an object. Stores with object locking
    /// enabled bypass governance retention.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Subscribe to store events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
