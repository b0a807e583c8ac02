//! JSON bodies of the HTTP API

use s3gate_core::{DownloadRequest, TransferOutcome, TransferRequest};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Body of `POST /files`. Missing fields decode as empty and fail validation.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadFileRequest {
    pub bucket_name: String,
    pub object_name: String,
    pub filepath: String,
    pub content_type: String,
    pub encryption_key_id: Option<String>,
}

impl UploadFileRequest {
    pub fn into_request(self) -> TransferRequest {
        TransferRequest {
            bucket_name: self.bucket_name,
            object_name: self.object_name,
            source_path: PathBuf::from(self.filepath),
            content_type: self.content_type,
            encryption_key_id: self.encryption_key_id,
        }
    }
}

/// Body of `GET /files/<name>`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DownloadFileRequest {
    pub bucket_name: String,
    pub download_path: String,
}

impl DownloadFileRequest {
    pub fn into_request(self, object_name: String) -> DownloadRequest {
        DownloadRequest {
            bucket_name: self.bucket_name,
            object_name,
            download_path: PathBuf::from(self.download_path),
        }
    }
}

/// Body of `DELETE /files/<name>`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteFileRequest {
    pub bucket_name: Option<String>,
}

/// Body of `POST /buckets`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateBucketRequest {
    pub bucket_name: String,
    pub region: Option<String>,
}

/// Query of `GET /files`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub prefix: String,
    pub recursive: bool,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            recursive: true,
        }
    }
}

/// Result of a successful upload
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub bucket_name: String,
    pub object_name: String,
    pub size: u64,
    pub multipart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl UploadResponse {
    pub fn new(request: &TransferRequest, outcome: TransferOutcome) -> Self {
        Self {
            bucket_name: request.bucket_name.clone(),
            object_name: request.object_name.clone(),
            size: outcome.object_size,
            multipart: outcome.used_multipart,
            etag: outcome.etag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_body_uses_camel_case() {
        let body: UploadFileRequest = serde_json::from_str(
            r#"{"bucketName":"b","objectName":"o","filepath":"/tmp/f","contentType":"text/plain","encryptionKeyId":"k"}"#,
        )
        .unwrap();
        let request = body.into_request();

        assert_eq!(request.bucket_name, "b");
        assert_eq!(request.source_path, PathBuf::from("/tmp/f"));
        assert_eq!(request.encryption_key_id.as_deref(), Some("k"));
    }

    #[test]
    fn test_missing_fields_decode_empty() {
        let body: UploadFileRequest = serde_json::from_str(r#"{"objectName":"o"}"#).unwrap();
        let err = body.into_request().validate().unwrap_err();
        assert_eq!(err.to_string(), "Insert valid bucket name");
    }
}
