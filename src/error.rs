//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
///
/// All failures are terminal for the current request only; the session and
/// its history remain valid and reusable for the next request.
#[derive(Error, Debug)]
pub enum AppError {
    /// User input was empty or malformed; rejected before any persistence
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Session with the given identifier was never created
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The persistent store is unreachable or a query failed
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The completion provider failed (network, auth, rate-limit, or
    /// malformed response)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::SessionNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                AppError::Validation("empty".into()).into_response().status(),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::SessionNotFound("x".into()).into_response().status(),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Upstream("boom".into()).into_response().status(),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (got, want) in cases {
            assert_eq!(got, want);
        }
    }
}
