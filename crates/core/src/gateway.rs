//! Per-request control flow over the transfer components

use crate::backend::{ObjectSummary, StorageBackend};
use crate::bucket::BucketDirectory;
use crate::config::ConfigFile;
use crate::download::{DownloadedObject, Downloader};
use crate::encryption::{EncryptionHandle, EncryptionPolicy, EncryptionSelector};
use crate::error::{Error, Result};
use crate::lister::ObjectLister;
use crate::planner::{TransferPlanner, TransferSettings};
use crate::progress::ProgressObserver;
use crate::request::{DownloadRequest, TransferRequest};
use crate::upload::{SourceFile, TransferOutcome, Uploader};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Everything one request needs, built once at startup and shared.
#[derive(Clone)]
pub struct FileGateway {
    backend: Arc<dyn StorageBackend>,
    buckets: BucketDirectory,
    selector: EncryptionSelector,
    planner: TransferPlanner,
    uploader: Uploader,
    downloader: Downloader,
    lister: ObjectLister,
    default_bucket: String,
    region: String,
}

impl FileGateway {
    pub fn new(config: &ConfigFile, backend: Arc<dyn StorageBackend>) -> Self {
        let storage = &config.storage;
        let advanced = &config.advanced;

        Self {
            buckets: BucketDirectory::new(backend.clone(), advanced.object_locking),
            selector: EncryptionSelector::new(EncryptionPolicy::from_storage(storage)),
            planner: TransferPlanner::new(TransferSettings::from_storage(storage)),
            uploader: Uploader::new(
                backend.clone(),
                Duration::from_millis(advanced.completion_wait_ms),
            ),
            downloader: Downloader::new(backend.clone()),
            lister: ObjectLister::new(backend.clone()),
            default_bucket: storage.bucket.clone(),
            region: storage.region.clone(),
            backend,
        }
    }

    /// Bucket used when a request does not name one
    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    pub fn buckets(&self) -> &BucketDirectory {
        &self.buckets
    }

    /// Upload a local file.
    ///
    /// Request errors and a missing bucket are reported before any data is
    /// sent. A transfer that started and failed comes back as an error too;
    /// its outcome is only returned on success.
    #[instrument(skip_all, fields(bucket = %request.bucket_name, object = %request.object_name))]
    pub async fn upload(
        &self,
        request: &TransferRequest,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome> {
        request.validate()?;
        self.require_bucket(&request.bucket_name).await?;

        let spec = self.selector.select(
            request.encryption_key_id.as_deref(),
            &request.bucket_name,
            &request.object_name,
        )?;
        let handle = self.selector.resolve(&spec)?;

        let source = SourceFile::open(&request.source_path).await?;
        let plan = self.planner.plan(source.size(), spec)?;

        self.uploader
            .upload(request, source, &plan, &handle, observer, cancel)
            .await
            .into_result()
    }

    /// Download an object to `request.download_path`.
    #[instrument(skip_all, fields(bucket = %request.bucket_name, object = %request.object_name))]
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<DownloadedObject> {
        request.validate()?;
        self.require_bucket(&request.bucket_name).await?;

        let mut handle = self
            .selector
            .for_download(&request.bucket_name, &request.object_name)?;
        if handle.is_customer_key()
            && !self
                .backend
                .uses_customer_key(&request.bucket_name, &request.object_name)
                .await?
        {
            debug!(object = %request.object_name, "object is not SSE-C, reading without a customer key");
            handle = EncryptionHandle::None;
        }

        self.downloader
            .download(
                &request.bucket_name,
                &request.object_name,
                &request.download_path,
                &handle,
                cancel,
            )
            .await
    }

    /// List the objects of `bucket` under `prefix`
    pub async fn list(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<ObjectSummary>> {
        let objects = self.lister.list(bucket, prefix, recursive).await?;
        info!(bucket, prefix, count = objects.len(), "listed objects");
        Ok(objects)
    }

    /// Delete the latest version of `bucket`/`key`
    pub async fn remove(&self, bucket: &str, key: &str) -> Result<()> {
        if bucket.trim().is_empty() {
            return Err(Error::Validation("Insert valid bucket name".to_string()));
        }
        if key.trim().is_empty() {
            return Err(Error::Validation("Insert valid object name".to_string()));
        }
        self.require_bucket(bucket).await?;

        self.backend.delete_object(bucket, key).await?;
        info!(bucket, key, "removed object");
        Ok(())
    }

    /// Create `bucket` if needed, in `region` or the configured one
    pub async fn ensure_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        if bucket.trim().is_empty() {
            return Err(Error::Validation("Insert valid bucket name".to_string()));
        }
        let region = region
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(&self.region);
        self.buckets.ensure_created(bucket, region).await
    }

    async fn require_bucket(&self, bucket: &str) -> Result<()> {
        if self.buckets.exists(bucket).await? {
            Ok(())
        } else {
            Err(Error::BucketNotFound(bucket.to_string()))
        }
    }
}
