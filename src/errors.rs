use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Failures surfaced by the tree, blob store, janitor and mover.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("{0}")]
    InvalidRequest(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage I/O failed: {0}")]
    StorageIo(#[from] io::Error),
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("{source}; compensating action also failed: {cleanup}")]
    Compensation {
        source: Box<StoreError>,
        cleanup: Box<StoreError>,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidPath { .. } | Self::InvalidRequest(_) | Self::InvalidFilter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::StorageIo(_) | Self::Persistence(_) | Self::Compensation { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_correctable_errors_map_to_4xx() {
        assert_eq!(
            StoreError::NotFound("box `docs`".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            StoreError::AlreadyExists("item `a`".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            StoreError::invalid_path("a//b", "empty segment").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StoreError::Conflict("cleaning is in progress".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn compensation_reports_both_failures() {
        let err = StoreError::Compensation {
            source: Box::new(StoreError::StorageIo(io::Error::other("disk full"))),
            cleanup: Box::new(StoreError::NotFound("item".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("disk full"));
        assert!(msg.contains("item not found"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
