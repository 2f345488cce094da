//! Server error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::snapshot::SnapshotError;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The reading store could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] rfrelay_core::Error),
}

/// Error returned from HTTP handlers.
///
/// Rendered as `{"success": false, "error": "<message>"}` with a matching
/// status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::ServiceUnavailable => AppError::ServiceUnavailable(err.to_string()),
            SnapshotError::Query(message) => AppError::Internal(message),
        }
    }
}

impl From<rfrelay_core::Error> for AppError {
    fn from(err: rfrelay_core::Error) -> Self {
        match err {
            rfrelay_core::Error::NotFound => AppError::NotFound("reading not found".to_string()),
            rfrelay_core::Error::Protocol(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<rfrelay_proto::Error> for AppError {
    fn from(err: rfrelay_proto::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
