//! Transfer requests and their validation

use crate::error::{Error, Result};
use std::path::PathBuf;

/// An upload of a local file into a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferRequest {
    pub bucket_name: String,
    pub object_name: String,
    pub source_path: PathBuf,
    pub content_type: String,
    pub encryption_key_id: Option<String>,
}

impl TransferRequest {
    /// Check required fields in order; the first missing one is reported.
    pub fn validate(&self) -> Result<()> {
        require(&self.bucket_name, "bucket name")?;
        require(&self.object_name, "object name")?;
        require(self.source_path.as_os_str().to_str().unwrap_or("?"), "filepath")?;
        require(&self.content_type, "content type")?;
        Ok(())
    }
}

/// A download of an object to a local path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub bucket_name: String,
    pub object_name: String,
    pub download_path: PathBuf,
}

impl DownloadRequest {
    pub fn validate(&self) -> Result<()> {
        require(&self.bucket_name, "bucket name")?;
        require(self.download_path.as_os_str().to_str().unwrap_or("?"), "download folder path")?;
        require(&self.object_name, "object name")?;
        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("Insert valid {}", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_upload() -> TransferRequest {
        TransferRequest {
            bucket_name: "b".to_string(),
            object_name: "o".to_string(),
            source_path: PathBuf::from("/tmp/test.txt"),
            content_type: "application/octet-stream".to_string(),
            encryption_key_id: None,
        }
    }

    fn message(result: Result<()>) -> String {
        result.unwrap_err().to_string()
    }

    #[test]
    fn test_upload_field_order() {
        assert_eq!(message(TransferRequest::default().validate()), "Insert valid bucket name");

        let mut req = valid_upload();
        req.bucket_name.clear();
        req.content_type.clear();
        assert_eq!(message(req.validate()), "Insert valid bucket name");

        let mut req = valid_upload();
        req.object_name.clear();
        assert_eq!(message(req.validate()), "Insert valid object name");

        let mut req = valid_upload();
        req.source_path = PathBuf::new();
        assert_eq!(message(req.validate()), "Insert valid filepath");

        let mut req = valid_upload();
        req.content_type = " ".to_string();
        assert_eq!(message(req.validate()), "Insert valid content type");

        assert!(valid_upload().validate().is_ok());
    }

    #[test]
    fn test_validation_errors_are_client_errors() {
        let err = TransferRequest::default().validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn test_download_field_order() {
        let req = DownloadRequest {
            object_name: "o".to_string(),
            ..DownloadRequest::default()
        };
        assert_eq!(message(req.validate()), "Insert valid bucket name");

        let req = DownloadRequest {
            bucket_name: "b".to_string(),
            object_name: "o".to_string(),
            download_path: PathBuf::new(),
        };
        assert_eq!(message(req.validate()), "Insert valid download folder path");

        let req = DownloadRequest {
            bucket_name: "b".to_string(),
            object_name: "o".to_string(),
            download_path: PathBuf::from("/tmp/o"),
        };
        assert!(req.validate().is_ok());
    }
}
