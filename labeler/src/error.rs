//! Error types for the labeler service
//!
//! `SessionError` covers the annotation session itself; `ApiError` is what
//! HTTP handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Source directory is unreadable or holds a non-image entry (fatal at startup)
    #[error("Invalid image source {path}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    /// Label not in the catalog, or catalog not locked yet
    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    /// `partition` was called a second time
    #[error("Image pool is already partitioned")]
    AlreadyPartitioned,

    /// Evaluation fraction outside [0, 1]
    #[error("Evaluation fraction must be within [0, 1], got {0}")]
    InvalidFraction(f64),

    /// Snapshot could not be read or written
    #[error("Session store error: {0}")]
    Store(#[from] labeler_common::Error),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
