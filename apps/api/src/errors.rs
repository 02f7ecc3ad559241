use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::jobs::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Catalog-load and assessment failures are deliberately absent: both are
/// recovered inside the pipeline (empty catalog / provider fallback) and never
/// surface as HTTP errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The job exists but its report has not been composed yet.
    /// Distinct from NotFound so callers can poll instead of giving up.
    #[error("Report not ready: {0}")]
    StillProcessing(String),

    /// The job reached a terminal failure; its report will never exist.
    /// Distinct from StillProcessing so callers stop polling.
    #[error("Report failed: {0}")]
    ReportFailed(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Compose error: {0}")]
    Compose(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::StillProcessing(msg) => {
                (StatusCode::CONFLICT, "STILL_PROCESSING", msg.clone())
            }
            AppError::ReportFailed(msg) => (StatusCode::GONE, "REPORT_FAILED", msg.clone()),
            AppError::Store(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Compose(msg) => {
                tracing::error!("Compose error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMPOSE_ERROR",
                    "Report composition failed".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let cases = [
            (AppError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (AppError::Validation("x".to_string()), StatusCode::BAD_REQUEST),
            (AppError::StillProcessing("x".to_string()), StatusCode::CONFLICT),
            (AppError::ReportFailed("x".to_string()), StatusCode::GONE),
            (AppError::Compose("x".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
