use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error taxonomy.
///
/// Validation and AccessDenied are raised before any backend call is made;
/// the remaining variants classify backend and collaborator failures so the
/// orchestrator can phrase a helpful message per category.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable category, used in audit records and tests.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::AccessDenied(_) => "access_denied",
            AppError::NotFound(_) => "not_found",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Timeout(_) => "timeout",
            AppError::Network(_) => "network",
            AppError::Configuration(_) => "configuration",
            AppError::Database(_) => "database",
            AppError::LlmService(_) => "llm_service",
            AppError::Internal(_) => "internal",
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::AccessDenied(msg) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new("ACCESS_DENIED", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::RateLimited { retry_after_secs } => {
                let mut detail = ErrorDetail::new(
                    "RATE_LIMITED",
                    format!("Too many requests. Retry after {} seconds.", retry_after_secs),
                );
                detail.retry_after_secs = Some(retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, detail)
            }
            AppError::Timeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorDetail::new("TIMEOUT", msg),
            ),
            AppError::Network(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("NETWORK_ERROR", msg),
            ),
            AppError::Configuration(msg) => {
                // Configuration errors are fatal for the request and should
                // be visible in logs even if the client only sees a 500.
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail::new("CONFIGURATION_ERROR", msg),
                )
            }
            AppError::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", msg),
            ),
            AppError::LlmService(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("LLM_SERVICE_ERROR", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse { error: error_detail });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let response = AppError::AccessDenied("nope".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = AppError::RateLimited { retry_after_secs: 12 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = AppError::Timeout("slow".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_error_detail_creation() {
        let detail = ErrorDetail::new("TEST_CODE", "Test message");
        assert_eq!(detail.code, "TEST_CODE");
        assert_eq!(detail.message, "Test message");
        assert!(detail.retry_after_secs.is_none());
    }

    #[test]
    fn test_category_names() {
        assert_eq!(AppError::Validation("x".into()).category(), "validation");
        assert_eq!(AppError::Network("x".into()).category(), "network");
    }
}
