//! Bucket existence checks and creation

use crate::backend::StorageBackend;
use crate::error::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Queries and creates buckets on the backing store.
///
/// Nothing is cached: every call asks the store again, so a bucket deleted
/// or created by someone else is seen by the very next request.
#[derive(Clone)]
pub struct BucketDirectory {
    backend: Arc<dyn StorageBackend>,
    object_locking: bool,
}

impl BucketDirectory {
    pub fn new(backend: Arc<dyn StorageBackend>, object_locking: bool) -> Self {
        Self {
            backend,
            object_locking,
        }
    }

    pub async fn exists(&self, bucket: &str) -> Result<bool> {
        let found = self.backend.bucket_exists(bucket).await?;
        debug!(bucket, found, "checked bucket");
        Ok(found)
    }

    /// Create `bucket` unless it is already there. Safe to call repeatedly.
    pub async fn ensure_created(&self, bucket: &str, region: &str) -> Result<()> {
        if self.exists(bucket).await? {
            info!(bucket, "bucket already exists");
            return Ok(());
        }

        match self
            .backend
            .create_bucket(bucket, region, self.object_locking)
            .await
        {
            Ok(()) => {
                info!(bucket, region, "created bucket");
                Ok(())
            }
            // Lost a race with another creator
            Err(e) => {
                if self.exists(bucket).await.unwrap_or(false) {
                    debug!(bucket, error = %e, "bucket appeared while creating it");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Make server-managed encryption the default for `bucket`
    pub async fn enable_default_encryption(&self, bucket: &str) -> Result<()> {
        self.backend.put_default_encryption(bucket).await?;
        info!(bucket, "enabled default server-side encryption");
        Ok(())
    }
}
