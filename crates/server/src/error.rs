//! The protocol error catalog.
//!
//! Every error the protocol engine can surface is a named entry with a
//! stable code, a default HTTP status, and a fixed message. Everything else
//! (store failures, bugs) is demoted to `ERR_INTERNAL_SERVER_ERROR`. The
//! [`IntoResponse`] impl is the single sink all errors flow through: it
//! counts the error by code, renders the JSON body, and applies any
//! hook-supplied response fragment.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use freight_core::ResponseFragment;
use freight_storage::StoreError;
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Protocol error type.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing, invalid or unsupported Tus-Resumable header")]
    UnsupportedVersion,

    #[error("maximum size exceeded")]
    MaxSizeExceeded,

    #[error("missing or invalid Content-Type header")]
    InvalidContentType,

    #[error("missing or invalid Upload-Length header")]
    InvalidUploadLength,

    #[error("missing or invalid Upload-Offset header")]
    InvalidOffset,

    #[error("upload not found")]
    NotFound,

    #[error("file currently locked")]
    FileLocked,

    #[error("failed to acquire lock before timeout")]
    LockTimeout,

    #[error("mismatched offset")]
    MismatchOffset,

    #[error("upload's size exceeded")]
    SizeExceeded,

    #[error("feature not implemented")]
    NotImplemented,

    #[error("one of the partial uploads is not finished")]
    UploadNotFinished,

    #[error("invalid Upload-Concat header")]
    InvalidConcat,

    #[error("modifying a final upload is not allowed")]
    ModifyFinal,

    #[error("provided both Upload-Length and Upload-Defer-Length")]
    AmbiguousUploadLength,

    #[error("invalid Upload-Defer-Length header")]
    InvalidUploadDeferLength,

    #[error("upload has been stopped by server")]
    UploadStopped {
        /// Response fragment the stopping hook asked to merge.
        response: Option<ResponseFragment>,
    },

    #[error("upload creation has been rejected by server")]
    UploadRejected {
        response: Option<ResponseFragment>,
    },

    #[error("upload has been interrupted by another request for this upload resource")]
    UploadInterrupted,

    #[error("request has been interrupted because the server is shutting down")]
    ServerShutdown,

    #[error("request origin is not allowed")]
    OriginNotAllowed,

    // The read timeout and connection reset responses are 500s on purpose:
    // most clients retry only on 5XX, and an interrupted upload should be
    // retried.
    #[error("timeout while reading request body")]
    ReadTimeout,

    #[error("TCP connection reset by peer")]
    ConnectionReset,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// Get the stable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "ERR_UNSUPPORTED_VERSION",
            Self::MaxSizeExceeded => "ERR_MAX_SIZE_EXCEEDED",
            Self::InvalidContentType => "ERR_INVALID_CONTENT_TYPE",
            Self::InvalidUploadLength => "ERR_INVALID_UPLOAD_LENGTH",
            Self::InvalidOffset => "ERR_INVALID_OFFSET",
            Self::NotFound => "ERR_UPLOAD_NOT_FOUND",
            Self::FileLocked => "ERR_UPLOAD_LOCKED",
            Self::LockTimeout => "ERR_LOCK_TIMEOUT",
            Self::MismatchOffset => "ERR_MISMATCHED_OFFSET",
            Self::SizeExceeded => "ERR_UPLOAD_SIZE_EXCEEDED",
            Self::NotImplemented => "ERR_NOT_IMPLEMENTED",
            Self::UploadNotFinished => "ERR_UPLOAD_NOT_FINISHED",
            Self::InvalidConcat => "ERR_INVALID_CONCAT",
            Self::ModifyFinal => "ERR_MODIFY_FINAL",
            Self::AmbiguousUploadLength => "ERR_AMBIGUOUS_UPLOAD_LENGTH",
            Self::InvalidUploadDeferLength => "ERR_INVALID_UPLOAD_LENGTH_DEFER",
            Self::UploadStopped { .. } => "ERR_UPLOAD_STOPPED",
            Self::UploadRejected { .. } => "ERR_UPLOAD_REJECTED",
            Self::UploadInterrupted => "ERR_UPLOAD_INTERRUPTED",
            Self::ServerShutdown => "ERR_SERVER_SHUTDOWN",
            Self::OriginNotAllowed => "ERR_ORIGIN_NOT_ALLOWED",
            Self::ReadTimeout => "ERR_READ_TIMEOUT",
            Self::ConnectionReset => "ERR_CONNECTION_RESET",
            Self::Store(StoreError::NotFound(_)) => "ERR_UPLOAD_NOT_FOUND",
            Self::Store(_) | Self::Internal(_) => "ERR_INTERNAL_SERVER_ERROR",
        }
    }

    /// Get the default HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedVersion => StatusCode::PRECONDITION_FAILED,
            Self::MaxSizeExceeded | Self::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidContentType
            | Self::InvalidUploadLength
            | Self::InvalidOffset
            | Self::UploadNotFinished
            | Self::InvalidConcat
            | Self::AmbiguousUploadLength
            | Self::InvalidUploadDeferLength
            | Self::UploadStopped { .. }
            | Self::UploadRejected { .. }
            | Self::UploadInterrupted => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::FileLocked => StatusCode::LOCKED,
            Self::MismatchOffset => StatusCode::CONFLICT,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::ModifyFinal | Self::OriginNotAllowed => StatusCode::FORBIDDEN,
            Self::ServerShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::LockTimeout | Self::ReadTimeout | Self::ConnectionReset => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn fragment(&self) -> Option<&ResponseFragment> {
        match self {
            Self::UploadStopped { response } | Self::UploadRejected { response } => {
                response.as_ref()
            }
            _ => None,
        }
    }
}

impl From<freight_core::Error> for ProtocolError {
    fn from(err: freight_core::Error) -> Self {
        match err {
            freight_core::Error::InvalidConcat(_) => Self::InvalidConcat,
            // An unusable path segment means the referenced upload cannot
            // exist.
            freight_core::Error::InvalidUploadPath(_) => Self::NotFound,
        }
    }
}

impl From<freight_storage::ChunkWriteError> for ProtocolError {
    fn from(err: freight_storage::ChunkWriteError) -> Self {
        Self::Store(err.source)
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Store(_) | Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }
        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.code()])
            .inc();

        let mut status = self.status_code();
        let mut body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        let mut extra_headers = Vec::new();

        if let Some(fragment) = self.fragment() {
            if let Some(code) = fragment.status
                && let Ok(parsed) = StatusCode::from_u16(code)
            {
                status = parsed;
            }
            for (name, value) in &fragment.headers {
                extra_headers.push((name.clone(), value.clone()));
            }
            if let Some(text) = &fragment.body {
                body.message = text.clone();
            }
        }

        let mut response = (status, Json(body)).into_response();
        for (name, value) in extra_headers {
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::try_from(name.as_str()),
                axum::http::HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// Result type for protocol handlers.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_codes_and_statuses() {
        let cases: &[(ProtocolError, &str, StatusCode)] = &[
            (
                ProtocolError::UnsupportedVersion,
                "ERR_UNSUPPORTED_VERSION",
                StatusCode::PRECONDITION_FAILED,
            ),
            (
                ProtocolError::MismatchOffset,
                "ERR_MISMATCHED_OFFSET",
                StatusCode::CONFLICT,
            ),
            (
                ProtocolError::FileLocked,
                "ERR_UPLOAD_LOCKED",
                StatusCode::LOCKED,
            ),
            (
                ProtocolError::SizeExceeded,
                "ERR_UPLOAD_SIZE_EXCEEDED",
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                ProtocolError::ModifyFinal,
                "ERR_MODIFY_FINAL",
                StatusCode::FORBIDDEN,
            ),
            (
                ProtocolError::NotImplemented,
                "ERR_NOT_IMPLEMENTED",
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                ProtocolError::ServerShutdown,
                "ERR_SERVER_SHUTDOWN",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProtocolError::ReadTimeout,
                "ERR_READ_TIMEOUT",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.code(), *code);
            assert_eq!(err.status_code(), *status);
        }
    }

    #[test]
    fn test_store_not_found_maps_to_upload_not_found() {
        let err = ProtocolError::Store(StoreError::NotFound("x".into()));
        assert_eq!(err.code(), "ERR_UPLOAD_NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unknown_errors_demote_to_internal() {
        let err = ProtocolError::Internal("boom".into());
        assert_eq!(err.code(), "ERR_INTERNAL_SERVER_ERROR");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
