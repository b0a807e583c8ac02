//! Upload pipeline: streams a local file to the store under a [`TransferPlan`]

use crate::backend::{CompletedPart, ObjectTarget, StorageBackend, StoreEvent};
use crate::encryption::EncryptionHandle;
use crate::error::{Error, ErrorKind, Result};
use crate::planner::TransferPlan;
use crate::progress::{ProgressGuard, ProgressObserver};
use crate::request::TransferRequest;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::byte_stream::Length;
use bytes::Bytes;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A source file opened for the duration of one upload.
///
/// Owned by a single request; the handle closes when this value is dropped.
#[derive(Debug)]
pub struct SourceFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl SourceFile {
    /// Open `path` and record its size.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path)
            .await
            .map_err(|e| Error::source_unreadable(&path, e))?;

        let metadata = file
            .metadata()
            .await
            .map_err(|e| Error::source_unreadable(&path, e))?;

        if !metadata.is_file() {
            return Err(Error::source_unreadable(&path, "not a regular file"));
        }

        Ok(Self {
            path,
            file,
            size: metadata.len(),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What happened to one upload
#[derive(Debug)]
pub struct TransferOutcome {
    pub object_size: u64,
    pub succeeded: bool,
    /// Whether the store confirmed a multipart completion for the object
    pub used_multipart: bool,
    pub etag: Option<String>,
    pub error: Option<Error>,
}

impl TransferOutcome {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(Error::kind)
    }

    /// `Err` with the failure of an unsuccessful upload, `Ok` otherwise
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    fn failed(object_size: u64, error: Error) -> Self {
        Self {
            object_size,
            succeeded: false,
            used_multipart: false,
            etag: None,
            error: Some(error),
        }
    }
}

/// Writes local files to the store.
///
/// Failed uploads are never retried here; re-sending without an idempotency
/// key could leave duplicate objects behind.
#[derive(Clone)]
pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    completion_wait: Duration,
}

impl Uploader {
    /// `completion_wait` bounds how long an upload waits, once its data is
    /// written, for the store's multipart completion notification.
    pub fn new(backend: Arc<dyn StorageBackend>, completion_wait: Duration) -> Self {
        Self {
            backend,
            completion_wait,
        }
    }

    /// Upload `source` as `request.object_name` in `request.bucket_name`.
    pub async fn upload(
        &self,
        request: &TransferRequest,
        mut source: SourceFile,
        plan: &TransferPlan,
        encryption: &EncryptionHandle,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let size = source.size;
        let progress = ProgressGuard::register(observer, size);

        // Subscribe before any data moves so the completion cannot be missed
        let (done_tx, done_rx) = oneshot::channel();
        let listener = tokio::spawn(await_multipart_completion(
            self.backend.subscribe(),
            request.bucket_name.clone(),
            request.object_name.clone(),
            done_rx,
            self.completion_wait,
        ));

        let target = ObjectTarget {
            bucket: &request.bucket_name,
            key: &request.object_name,
            content_type: &request.content_type,
            encryption,
        };

        info!(
            bucket = %request.bucket_name,
            object = %request.object_name,
            size,
            multipart = plan.use_multipart,
            part_size = plan.part_size_bytes,
            encryption = plan.encryption.label(),
            "starting upload"
        );

        let result = if plan.use_multipart {
            self.put_multipart(&target, &mut source, plan, &progress, cancel).await
        } else {
            self.put_single(&target, &source, &progress, cancel).await
        };

        match result {
            Ok(etag) => {
                let _ = done_tx.send(());
                let used_multipart = listener.await.unwrap_or(false);
                progress.succeed();

                if used_multipart {
                    info!(object = %request.object_name, size, "used multipart upload");
                } else {
                    info!(object = %request.object_name, size, "did not use multipart upload");
                }

                TransferOutcome {
                    object_size: size,
                    succeeded: true,
                    used_multipart,
                    etag,
                    error: None,
                }
            }
            Err(e) => {
                listener.abort();
                warn!(
                    bucket = %request.bucket_name,
                    object = %request.object_name,
                    error = %e,
                    "upload failed"
                );
                TransferOutcome::failed(size, e)
            }
        }
    }

    /// Stream the file from disk in one `PutObject`.
    async fn put_single(
        &self,
        target: &ObjectTarget<'_>,
        source: &SourceFile,
        progress: &ProgressGuard<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let body = ByteStream::read_from()
            .path(&source.path)
            .length(Length::Exact(source.size))
            .build()
            .await
            .map_err(|e| Error::source_unreadable(&source.path, e))?;

        let etag = cancellable(cancel, self.backend.put_object(target, body, source.size)).await?;
        progress.advance(source.size);
        Ok(etag)
    }

    async fn put_multipart(
        &self,
        target: &ObjectTarget<'_>,
        source: &mut SourceFile,
        plan: &TransferPlan,
        progress: &ProgressGuard<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let upload_id = cancellable(cancel, self.backend.create_multipart_upload(target)).await?;
        debug!(object = target.key, upload_id = %upload_id, "created multipart upload");

        let result = self
            .put_parts(target, &upload_id, source, plan, progress, cancel)
            .await;

        if result.is_err() {
            // Leave no orphaned parts behind
            if let Err(e) = self
                .backend
                .abort_multipart_upload(target.bucket, target.key, &upload_id)
                .await
            {
                warn!(upload_id = %upload_id, error = %e, "failed to abort multipart upload");
            }
        }

        result
    }

    async fn put_parts(
        &self,
        target: &ObjectTarget<'_>,
        upload_id: &str,
        source: &mut SourceFile,
        plan: &TransferPlan,
        progress: &ProgressGuard<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let mut parts: Vec<CompletedPart> = Vec::with_capacity(plan.part_count as usize);
        let mut transferred = 0u64;
        let mut part_number = 1i32;

        loop {
            let remaining = source.size.saturating_sub(transferred);
            let mut buffer = Vec::with_capacity(remaining.min(plan.part_size_bytes) as usize);
            (&mut source.file)
                .take(plan.part_size_bytes)
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| Error::source_unreadable(&source.path, e))?;

            if buffer.is_empty() {
                break;
            }

            let length = buffer.len() as u64;
            let part = cancellable(
                cancel,
                self.backend
                    .upload_part(target, upload_id, part_number, Bytes::from(buffer)),
            )
            .await?;

            parts.push(part);
            transferred += length;
            progress.advance(transferred);
            part_number += 1;
        }

        check_length(source, transferred)?;

        cancellable(
            cancel,
            self.backend.complete_multipart_upload(target, upload_id, parts),
        )
        .await
    }
}

fn check_length(source: &SourceFile, read: u64) -> Result<()> {
    if read != source.size {
        return Err(Error::source_unreadable(
            &source.path,
            format!("file changed during upload ({} bytes expected, {} read)", source.size, read),
        ));
    }
    Ok(())
}

/// Run `operation` unless `cancel` fires first.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}

/// Wait for the store to report a multipart completion of `bucket`/`key`.
///
/// Listens for as long as the transfer runs, then at most `wait` longer.
async fn await_multipart_completion(
    mut events: broadcast::Receiver<StoreEvent>,
    bucket: String,
    key: String,
    transfer_done: oneshot::Receiver<()>,
    wait: Duration,
) -> bool {
    let completion = next_completion(&mut events, &bucket, &key);
    tokio::pin!(completion);

    tokio::select! {
        found = &mut completion => return found,
        _ = transfer_done => {}
    }

    tokio::time::timeout(wait, completion).await.unwrap_or(false)
}

async fn next_completion(
    events: &mut broadcast::Receiver<StoreEvent>,
    bucket: &str,
    key: &str,
) -> bool {
    loop {
        match events.recv().await {
            Ok(event) if event.is_for(bucket, key) => {
                debug!(?event, "multipart completion notification");
                return true;
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "completion listener lagged");
                continue;
            }
            Err(RecvError::Closed) => return false,
        }
    }
}
