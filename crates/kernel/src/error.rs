//! The error taxonomy shared by every ingestion component and the HTTP
//! layer, generalizing the teacher's per-feature error enum +
//! `impl From<ChunkedUploadError> for UploadArtifactError` conversion chain
//! into one flat surface, since the spec calls for a single shared error
//! boundary rather than nested per-feature conversions.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadIndex(String),

    #[error("{0}")]
    ChecksumMismatch(String),

    #[error("{0}")]
    SizeExceeded(String),

    #[error("{0}")]
    SizeMismatch(String),

    #[error("{0}")]
    IOError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Internal(String),
}

impl IngestionError {
    /// Maps each error kind to the HTTP status spec.md §7 specifies:
    /// 404/409/400/400/413/500/500/499/504/401/500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestionError::NotFound(_) => StatusCode::NOT_FOUND,
            IngestionError::Conflict(_) => StatusCode::CONFLICT,
            IngestionError::BadIndex(_) => StatusCode::BAD_REQUEST,
            IngestionError::ChecksumMismatch(_) => StatusCode::BAD_REQUEST,
            IngestionError::SizeExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IngestionError::SizeMismatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestionError::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestionError::Cancelled => StatusCode::from_u16(499).expect("valid"),
            IngestionError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            IngestionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            IngestionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable `error` tag for the JSON body, matching spec.md §7's
    /// error kind names.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::NotFound(_) => "NotFound",
            IngestionError::Conflict(_) => "Conflict",
            IngestionError::BadIndex(_) => "BadIndex",
            IngestionError::ChecksumMismatch(_) => "ChecksumMismatch",
            IngestionError::SizeExceeded(_) => "SizeExceeded",
            IngestionError::SizeMismatch(_) => "SizeMismatch",
            IngestionError::IOError(_) => "IOError",
            IngestionError::Cancelled => "Cancelled",
            IngestionError::Timeout => "Timeout",
            IngestionError::Unauthorized(_) => "Unauthorized",
            IngestionError::Internal(_) => "Internal",
        }
    }

    /// Whether RecoveryController is the right place to decide the outcome,
    /// per the propagation policy in spec.md §7: `NotFound`, `BadIndex`,
    /// `SizeExceeded`, `Unauthorized` and `ChecksumMismatch` are terminal and
    /// surfaced immediately with no retry.
    pub fn is_recoverable_candidate(&self) -> bool {
        matches!(
            self,
            IngestionError::IOError(_) | IngestionError::Timeout | IngestionError::Internal(_)
        )
    }
}

impl From<std::io::Error> for IngestionError {
    fn from(err: std::io::Error) -> Self {
        IngestionError::IOError(err.to_string())
    }
}

/// Attached to a 500-class response when RecoveryController has already
/// decided what happens next, so the client doesn't have to guess.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAction {
    pub action: &'static str,
    pub delay_ms: Option<u64>,
}

impl RecoveryAction {
    pub fn retry(delay_ms: u64) -> Self {
        Self { action: "retry", delay_ms: Some(delay_ms) }
    }

    pub fn fail() -> Self {
        Self { action: "fail", delay_ms: None }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryAction>,
}

impl IngestionError {
    /// Builds the response body, optionally carrying a `RecoveryAction` the
    /// caller already computed (e.g. via `RecoveryController::handle`).
    pub fn into_response_with_recovery(self, recovery: Option<RecoveryAction>) -> Response {
        let status = self.status_code();
        let body = ErrorBody { error: self.kind(), message: self.to_string(), recovery };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for IngestionError {
    fn into_response(self) -> Response {
        self.into_response_with_recovery(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(IngestionError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(IngestionError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(IngestionError::BadIndex("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            IngestionError::SizeExceeded("x".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(IngestionError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            IngestionError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn recoverable_candidates_are_the_spec_set() {
        assert!(IngestionError::IOError("x".into()).is_recoverable_candidate());
        assert!(IngestionError::Timeout.is_recoverable_candidate());
        assert!(!IngestionError::NotFound("x".into()).is_recoverable_candidate());
        assert!(!IngestionError::Unauthorized("x".into()).is_recoverable_candidate());
    }
}
