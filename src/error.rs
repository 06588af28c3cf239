//! Request-time error type.
//!
//! Transient request errors are recovered locally and surfaced as an HTTP
//! status; the process keeps serving.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                (StatusCode::NOT_FOUND, "not found").into_response()
            }
            AppError::Io(_) => {
                tracing::error!(error = ?self, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
