use crate::dto::{
    CreateBucketRequest, DeleteFileRequest, DownloadFileRequest, ListQuery, UploadFileRequest,
    UploadResponse,
};
use crate::error::ApiError;
use crate::progress::BarProgress;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use bytes::Bytes;
use s3gate_core::{ObjectSummary, ProgressObserver, TracingProgress};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(crate) async fn home() -> &'static str {
    "home"
}

pub(crate) async fn health() -> &'static str {
    "healthy"
}

/// `POST /files`
pub(crate) async fn upload_file(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let body: UploadFileRequest = decode(&body)?;
    let request = body.into_request();

    let response = run_transfer(move |cancel| async move {
        let observer: Box<dyn ProgressObserver> = if state.show_progress {
            Box::new(BarProgress::new(&request.object_name))
        } else {
            Box::new(TracingProgress::new(request.object_name.clone()))
        };

        let outcome = state
            .gateway
            .upload(&request, observer.as_ref(), &cancel)
            .await?;
        Ok::<_, s3gate_core::Error>(UploadResponse::new(&request, outcome))
    })
    .await?;

    Ok(Json(response))
}

/// `GET /files`
pub(crate) async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ObjectSummary>>, ApiError> {
    let objects = state
        .gateway
        .list(state.gateway.default_bucket(), &query.prefix, query.recursive)
        .await?;
    Ok(Json(objects))
}

/// `GET /files/<name>`
pub(crate) async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<String, ApiError> {
    info!(file = %name, "download requested");

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("No Request JSON Body".to_string()));
    }
    let body: DownloadFileRequest = decode(&body)?;
    let requested_path = body.download_path.clone();
    let request = body.into_request(name.clone());

    run_transfer(move |cancel| async move { state.gateway.download(&request, &cancel).await })
        .await?;

    Ok(format!(
        "File {} correctly downloaded in: {}",
        name, requested_path
    ))
}

/// `DELETE /files/<name>`; without a body the configured bucket is used
pub(crate) async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<String, ApiError> {
    let body: DeleteFileRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DeleteFileRequest::default()
    } else {
        decode(&body)?
    };
    let bucket = body
        .bucket_name
        .unwrap_or_else(|| state.gateway.default_bucket().to_string());

    state.gateway.remove(&bucket, &name).await?;
    Ok(format!("File {} removed from bucket {}", name, bucket))
}

/// `POST /buckets`
pub(crate) async fn create_bucket(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<String, ApiError> {
    let body: CreateBucketRequest = decode(&body)?;
    state
        .gateway
        .ensure_bucket(&body.bucket_name, body.region.as_deref())
        .await?;
    Ok(format!("Bucket {} is ready", body.bucket_name))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Run a transfer on its own task.
///
/// The task is cancelled when this future is dropped, which is what happens
/// to a handler whose client disconnected.
async fn run_transfer<T, F, Fut>(transfer: F) -> Result<T, ApiError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = s3gate_core::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match tokio::spawn(transfer(cancel)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}
