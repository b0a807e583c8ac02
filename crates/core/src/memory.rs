//! In-process [`StorageBackend`] used by tests and local runs.
//!
//! Behaves like a small S3 store: buckets, objects, multipart uploads,
//! paginated listings and completion events. Failure switches let callers
//! simulate an unreachable or misbehaving store.

use crate::backend::{
    CompletedPart, ListPage, ObjectSummary, ObjectTarget, StorageBackend, StoreEvent,
    EVENT_CHANNEL_CAPACITY,
};
use crate::encryption::EncryptionHandle;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_PAGE_SIZE: usize = 1000;

/// An object held by [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
    pub encryption: EncryptionHandle,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub multipart: bool,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    put_calls: usize,
    part_calls: usize,
    list_calls: usize,
    default_encryption: BTreeSet<String>,

    unavailable: bool,
    fail_transfers: bool,
    fail_listing_after: Option<usize>,
    publish_events: bool,
    transfer_delay: Option<Duration>,
    page_size: usize,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State {
                publish_events: true,
                page_size: DEFAULT_PAGE_SIZE,
                ..State::default()
            }),
            events,
        }
    }

    /// Add an empty bucket
    pub fn with_bucket(self, bucket: &str) -> Self {
        self.state.lock().buckets.entry(bucket.to_string()).or_default();
        self
    }

    /// Store an object directly, bypassing the upload path
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let object = StoredObject {
            etag: md5_hex(&data),
            data,
            content_type: "application/octet-stream".to_string(),
            encryption: EncryptionHandle::None,
            last_modified: Utc::now(),
            multipart: false,
        };
        self.state
            .lock()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    /// Make every call fail as if the network were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Make object and part writes fail on the store side
    pub fn set_fail_transfers(&self, fail: bool) {
        self.state.lock().fail_transfers = fail;
    }

    /// Fail listing requests once `pages` pages have been served
    pub fn set_fail_listing_after(&self, pages: Option<usize>) {
        self.state.lock().fail_listing_after = pages;
    }

    /// Turn completion events on or off
    pub fn set_publish_events(&self, publish: bool) {
        self.state.lock().publish_events = publish;
    }

    /// Delay every object and part write
    pub fn set_transfer_delay(&self, delay: Option<Duration>) {
        self.state.lock().transfer_delay = delay;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().page_size = page_size.max(1);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    /// Number of single-shot `put_object` calls received
    pub fn put_calls(&self) -> usize {
        self.state.lock().put_calls
    }

    /// Number of `upload_part` calls received
    pub fn part_calls(&self) -> usize {
        self.state.lock().part_calls
    }

    /// Number of listing pages requested
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Multipart uploads started and neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    pub fn has_default_encryption(&self, bucket: &str) -> bool {
        self.state.lock().default_encryption.contains(bucket)
    }

    fn check_available(&self) -> Result<()> {
        if self.state.lock().unavailable {
            return Err(Error::BackendUnavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn before_write(&self) -> Result<()> {
        self.check_available()?;
        let (delay, fail) = {
            let state = self.state.lock();
            (state.transfer_delay, state.fail_transfers)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::BackendTransfer("InternalError: write rejected".to_string()));
        }
        Ok(())
    }
}

fn md5_hex(data: &[u8]) -> String {
    Md5::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn require_bucket<'a>(
    state: &'a mut State,
    bucket: &str,
) -> Result<&'a mut BTreeMap<String, StoredObject>> {
    state
        .buckets
        .get_mut(bucket)
        .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))
}

fn find_object<'a>(state: &'a mut State, bucket: &str, key: &str) -> Result<&'a StoredObject> {
    require_bucket(state, bucket)?
        .get(key)
        .ok_or_else(|| Error::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.state.lock().buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str, _region: &str, _object_locking: bool) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if state.buckets.contains_key(bucket) {
            return Err(Error::BackendTransfer(format!(
                "BucketAlreadyExists: {}",
                bucket
            )));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put_default_encryption(&self, bucket: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        require_bucket(&mut state, bucket)?;
        state.default_encryption.insert(bucket.to_string());
        Ok(())
    }

    async fn put_object(
        &self,
        target: &ObjectTarget<'_>,
        body: ByteStream,
        length: u64,
    ) -> Result<Option<String>> {
        self.state.lock().put_calls += 1;
        self.before_write().await?;

        let body = body.collect().await?.into_bytes();
        if body.len() as u64 != length {
            return Err(Error::BackendTransfer(format!(
                "IncompleteBody: {} bytes declared, {} received",
                length,
                body.len()
            )));
        }

        let etag = md5_hex(&body);
        let mut state = self.state.lock();
        let objects = require_bucket(&mut state, target.bucket)?;
        objects.insert(
            target.key.to_string(),
            StoredObject {
                data: body,
                content_type: target.content_type.to_string(),
                encryption: target.encryption.clone(),
                etag: etag.clone(),
                last_modified: Utc::now(),
                multipart: false,
            },
        );
        Ok(Some(etag))
    }

    async fn create_multipart_upload(&self, target: &ObjectTarget<'_>) -> Result<String> {
        self.check_available()?;
        let mut state = self.state.lock();
        require_bucket(&mut state, target.bucket)?;
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: target.bucket.to_string(),
                key: target.key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _target: &ObjectTarget<'_>,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart> {
        self.state.lock().part_calls += 1;
        self.before_write().await?;

        let etag = md5_hex(&body);
        let mut state = self.state.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Error::BackendTransfer(format!("NoSuchUpload: {}", upload_id)))?;
        upload.parts.insert(part_number, body);
        Ok(CompletedPart { part_number, etag })
    }

    async fn complete_multipart_upload(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<Option<String>> {
        self.check_available()?;

        let (etag, publish) = {
            let mut state = self.state.lock();
            let upload = state
                .uploads
                .remove(upload_id)
                .ok_or_else(|| Error::BackendTransfer(format!("NoSuchUpload: {}", upload_id)))?;

            let mut data = BytesMut::new();
            for part in &parts {
                let body = upload.parts.get(&part.part_number).ok_or_else(|| {
                    Error::BackendTransfer(format!("InvalidPart: {}", part.part_number))
                })?;
                data.extend_from_slice(body);
            }

            let etag = format!("{}-{}", md5_hex(&data), parts.len());
            let objects = require_bucket(&mut state, &upload.bucket)?;
            objects.insert(
                upload.key.clone(),
                StoredObject {
                    data: data.freeze(),
                    content_type: target.content_type.to_string(),
                    encryption: target.encryption.clone(),
                    etag: etag.clone(),
                    last_modified: Utc::now(),
                    multipart: true,
                },
            );
            (etag, state.publish_events)
        };

        if publish {
            let _ = self.events.send(StoreEvent::MultipartCompleted {
                bucket: target.bucket.to_string(),
                key: target.key.to_string(),
                upload_id: upload_id.to_string(),
                etag: Some(etag.clone()),
            });
        }

        Ok(Some(etag))
    }

    async fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> Result<()> {
        self.check_available()?;
        self.state.lock().uploads.remove(upload_id);
        Ok(())
    }

    async fn uses_customer_key(&self, bucket: &str, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock();
        let object = find_object(&mut state, bucket, key)?;
        Ok(object.encryption.is_customer_key())
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        encryption: &EncryptionHandle,
    ) -> Result<ByteStream> {
        self.check_available()?;
        let mut state = self.state.lock();
        let object = find_object(&mut state, bucket, key)?;

        match (object.encryption.is_customer_key(), encryption.is_customer_key()) {
            (true, _) if &object.encryption != encryption => {
                return Err(Error::BackendTransfer(
                    "InvalidRequest: the object was stored using a different customer key"
                        .to_string(),
                ));
            }
            (false, true) => {
                return Err(Error::BackendTransfer(
                    "InvalidRequest: the object was not stored with a customer key".to_string(),
                ));
            }
            _ => {}
        }

        Ok(ByteStream::from(object.data.clone()))
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.list_calls += 1;
        if let Some(limit) = state.fail_listing_after {
            if state.list_calls > limit {
                return Err(Error::BackendUnavailable("listing interrupted".to_string()));
            }
        }
        let page_size = state.page_size;
        let objects = require_bucket(&mut state, bucket)?;

        let mut entries: BTreeMap<String, ObjectSummary> = BTreeMap::new();
        for (key, object) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match rest.find('/') {
                Some(index) if !recursive => {
                    let folder = format!("{}{}", prefix, &rest[..=index]);
                    entries.entry(folder.clone()).or_insert(ObjectSummary {
                        key: folder,
                        size: 0,
                        last_modified: None,
                        etag: String::new(),
                    });
                }
                _ => {
                    entries.insert(
                        key.clone(),
                        ObjectSummary {
                            key: key.clone(),
                            size: object.data.len() as i64,
                            last_modified: Some(object.last_modified),
                            etag: object.etag.clone(),
                        },
                    );
                }
            }
        }

        let page: Vec<ObjectSummary> = entries
            .into_values()
            .filter(|entry| {
                continuation_token
                    .as_deref()
                    .map_or(true, |token| entry.key.as_str() > token)
            })
            .take(page_size + 1)
            .collect();

        let (objects, next_token) = if page.len() > page_size {
            let mut objects = page;
            objects.truncate(page_size);
            let token = objects.last().map(|o| o.key.clone());
            (objects, token)
        } else {
            (page, None)
        };

        Ok(ListPage { objects, next_token })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        require_bucket(&mut state, bucket)?.remove(key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
