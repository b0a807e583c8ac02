//! Mapping of gateway errors onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use s3gate_core::{Error, ErrorKind};
use tracing::{error, info};

/// Status used when the client went away before the response
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the gateway
    Gateway(Error),
    /// The body could not be decoded
    BadRequest(String),
    /// The request task itself failed
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Gateway(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Gateway(e) => match e.kind() {
                kind if kind.is_client_error() => StatusCode::BAD_REQUEST,
                ErrorKind::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::BadRequest(message) => message,
            ApiError::Gateway(e) if status == StatusCode::BAD_REQUEST => {
                info!(error = %e, "rejected request");
                e.to_string()
            }
            ApiError::Gateway(Error::Cancelled) => {
                info!("request cancelled by client");
                "Request cancelled".to_string()
            }
            ApiError::Gateway(e) => {
                error!(error = %e, kind = ?e.kind(), "request failed");
                internal_message(status)
            }
            ApiError::Internal(detail) => {
                error!(error = %detail, "request task failed");
                internal_message(status)
            }
        };

        (status, body).into_response()
    }
}

fn internal_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("Internal Server Error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let validation = ApiError::from(Error::Validation("Insert valid bucket name".into()));
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from(Error::ObjectNotFound {
            bucket: "b".into(),
            key: "k".into(),
        });
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let down = ApiError::from(Error::BackendUnavailable("refused".into()));
        assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let kms = ApiError::from(Error::EncryptionConfig("KMS.NotFoundException".into()));
        assert_eq!(kms.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::from(Error::Cancelled).status().as_u16(), 499);
    }
}
