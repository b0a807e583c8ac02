//! Download pipeline: fetches an object into a local file

use crate::backend::StorageBackend;
use crate::encryption::EncryptionHandle;
use crate::error::{Error, Result};
use crate::upload::cancellable;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedObject {
    /// Final location of the file
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Clone)]
pub struct Downloader {
    backend: Arc<dyn StorageBackend>,
}

impl Downloader {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Fetch `bucket`/`key` into `destination`.
    ///
    /// If `destination` is an existing directory the object is written inside
    /// it under the last segment of `key`. The file only appears at its final
    /// path once the whole body has been written.
    pub async fn download(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
        encryption: &EncryptionHandle,
        cancel: &CancellationToken,
    ) -> Result<DownloadedObject> {
        // Fetch first so a missing object never leaves anything on disk
        let body = cancellable(cancel, self.backend.get_object(bucket, key, encryption)).await?;

        let path = resolve_destination(destination, key).await;
        let parent = parent_dir(&path);
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::destination_unwritable(&parent, e))?;

        let temp = temp_path(&path);
        debug!(bucket, key, temp = %temp.display(), "writing object");

        let result = cancellable(cancel, write_body(body, &temp)).await;
        let size = match result {
            Ok(size) => size,
            Err(e) => {
                remove_temp(&temp).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp, &path).await {
            remove_temp(&temp).await;
            return Err(Error::destination_unwritable(&path, e));
        }

        info!(bucket, key, path = %path.display(), size, "downloaded object");
        Ok(DownloadedObject { path, size })
    }
}

async fn write_body(body: aws_sdk_s3::primitives::ByteStream, temp: &Path) -> Result<u64> {
    let mut file = fs::File::create(temp)
        .await
        .map_err(|e| Error::destination_unwritable(temp, e))?;

    let mut reader = body.into_async_read();
    let size = tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| Error::destination_unwritable(temp, e))?;

    file.flush()
        .await
        .map_err(|e| Error::destination_unwritable(temp, e))?;
    file.sync_all()
        .await
        .map_err(|e| Error::destination_unwritable(temp, e))?;

    Ok(size)
}

async fn resolve_destination(destination: &Path, key: &str) -> PathBuf {
    let is_dir = fs::metadata(destination)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    if is_dir {
        let name = key.rsplit('/').find(|s| !s.is_empty()).unwrap_or(key);
        destination.join(name)
    } else {
        destination.to_path_buf()
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    parent_dir(path).join(format!(".{}.{}.part", name, uuid::Uuid::new_v4()))
}

async fn remove_temp(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(temp = %temp.display(), error = %e, "failed to remove temporary file");
        }
    }
}
