//! Error types for s3gate-core

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for s3gate-core
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    BucketNotFound,
    ObjectNotFound,
    EncryptionConfig,
    BackendUnavailable,
    BackendTransfer,
    SourceUnreadable,
    DestinationUnwritable,
    Config,
    Cancelled,
}

impl ErrorKind {
    /// Whether the failure was caused by the request rather than the gateway.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation | ErrorKind::BucketNotFound | ErrorKind::ObjectNotFound
        )
    }
}

/// Main error type for s3gate-core
#[derive(Error, Debug)]
pub enum Error {
    /// A required request field is missing or malformed
    #[error("{0}")]
    Validation(String),

    /// The named bucket does not exist on the backend
    #[error("bucket {0} does not exist")]
    BucketNotFound(String),

    /// The named object does not exist in the bucket
    #[error("Specified file {key} is not present in bucket {bucket}")]
    ObjectNotFound { bucket: String, key: String },

    /// Encryption could not be resolved (missing key, KMS failure, insecure transport)
    #[error("Encryption configuration error: {0}")]
    EncryptionConfig(String),

    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend rejected or failed a transfer
    #[error("Backend transfer failed: {0}")]
    BackendTransfer(String),

    /// The local source file could not be opened or read
    #[error("Source file {path} is unreadable: {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },

    /// The local destination could not be created or written
    #[error("Destination {path} is not writable: {reason}")]
    DestinationUnwritable { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidConfig(String),

    /// The transfer was abandoned because its request went away
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::BucketNotFound(_) => ErrorKind::BucketNotFound,
            Error::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            Error::EncryptionConfig(_) => ErrorKind::EncryptionConfig,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::BackendTransfer(_) => ErrorKind::BackendTransfer,
            Error::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            Error::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            Error::Config(_)
            | Error::ConfigNotFound(_)
            | Error::InvalidConfig(_)
            | Error::Deserialization(_) => ErrorKind::Config,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) | Error::Json(_) => ErrorKind::BackendTransfer,
        }
    }

    /// Classify an S3 error for a request addressed to `bucket`.
    ///
    /// `NoSuchBucket` replies become [`Error::BucketNotFound`] naming the
    /// bucket; anything else is classified as usual.
    pub(crate) fn in_bucket<E>(err: SdkError<E>, bucket: &str) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let code = err.as_service_error().and_then(|e| e.code());
        if code == Some("NoSuchBucket") {
            return Error::BucketNotFound(bucket.to_string());
        }
        err.into()
    }

    pub(crate) fn source_unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::SourceUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn destination_unwritable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::DestinationUnwritable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Error codes the S3 protocol uses for failures of the key-management service.
fn is_kms_code(code: &str) -> bool {
    code.starts_with("KMS") || code == "InvalidEncryptionAlgorithmError"
}

// Generic SdkError classification for all S3 operations.
//
// Transport-level failures never reach the service, so they become
// `BackendUnavailable`; service errors are classified by their S3 error code.
impl<E> From<SdkError<E>> for Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    fn from(err: SdkError<E>) -> Self {
        match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                Error::BackendUnavailable(err.to_string())
            }
            SdkError::ServiceError(service) => {
                let detail = service
                    .err()
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                match service.err().code() {
                    Some(code) if is_kms_code(code) => Error::EncryptionConfig(detail),
                    Some("ServiceUnavailable") | Some("SlowDown") => {
                        Error::BackendUnavailable(detail)
                    }
                    _ => Error::BackendTransfer(detail),
                }
            }
            _ => Error::BackendTransfer(err.to_string()),
        }
    }
}

// ByteStreamError conversion
impl From<aws_sdk_s3::primitives::ByteStreamError> for Error {
    fn from(err: aws_sdk_s3::primitives::ByteStreamError) -> Self {
        Error::BackendTransfer(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::http::HttpResponse;
    use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
    use aws_smithy_types::body::SdkBody;
    use aws_smithy_types::error::ErrorMetadata;

    #[test]
    fn test_client_error_kinds() {
        assert!(Error::Validation("Insert valid bucket name".into()).kind().is_client_error());
        assert!(Error::BucketNotFound("b".into()).kind().is_client_error());
        assert!(!Error::BackendUnavailable("down".into()).kind().is_client_error());
        assert!(!Error::Cancelled.kind().is_client_error());
    }

    #[test]
    fn test_messages_match_http_contract() {
        assert_eq!(
            Error::BucketNotFound("b".into()).to_string(),
            "bucket b does not exist"
        );
        let err = Error::ObjectNotFound {
            bucket: "testbucket".into(),
            key: "report.pdf".into(),
        };
        assert_eq!(
            err.to_string(),
            "Specified file report.pdf is not present in bucket testbucket"
        );
    }

    fn list_error(code: &str, message: &str) -> SdkError<ListObjectsV2Error> {
        let metadata = ErrorMetadata::builder().code(code).message(message).build();
        SdkError::service_error(
            ListObjectsV2Error::generic(metadata),
            HttpResponse::new(404u16.try_into().unwrap(), SdkBody::empty()),
        )
    }

    #[test]
    fn test_missing_bucket_reply_names_the_bucket() {
        let err = Error::in_bucket(
            list_error("NoSuchBucket", "The specified bucket does not exist"),
            "testbucket",
        );
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
        assert_eq!(err.to_string(), "bucket testbucket does not exist");

        // Without a bucket the reply text is never formatted as a bucket name
        let err: Error = list_error("NoSuchBucket", "The specified bucket does not exist").into();
        assert!(!err.to_string().contains("bucket The specified"));
        assert_eq!(err.kind(), ErrorKind::BackendTransfer);
    }

    #[test]
    fn test_service_codes_in_bucket_context() {
        let err = Error::in_bucket(list_error("SlowDown", "Please reduce your request rate"), "b");
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);

        let err = Error::in_bucket(list_error("KMS.DisabledException", "key disabled"), "b");
        assert_eq!(err.kind(), ErrorKind::EncryptionConfig);

        let err = Error::in_bucket(list_error("AccessDenied", "Access Denied"), "b");
        assert_eq!(err.kind(), ErrorKind::BackendTransfer);
        assert_eq!(err.to_string(), "Backend transfer failed: Access Denied");
    }

    #[test]
    fn test_kms_codes() {
        assert!(is_kms_code("KMS.NotFoundException"));
        assert!(is_kms_code("KMSNotConfigured"));
        assert!(!is_kms_code("NoSuchKey"));
    }
}
