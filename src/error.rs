use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::Violation;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate resource (e.g. budget id reuse within a tenant)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Policy or budget block. Carries the evaluation detail so the
    /// response body can include `blocked_by` and `violations`.
    #[error("Forbidden: {message}")]
    Forbidden {
        message: String,
        blocked_by: Vec<String>,
        violations: Vec<Violation>,
    },

    /// A single provider failed; recoverable, the router advances the
    /// fallback chain. Never surfaced over HTTP.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Fallback chain exhausted
    #[error("All providers failed: {0}")]
    AllProvidersFailed(String),

    /// Transient persistence failure
    #[error("Datastore error: {0}")]
    DataStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation deadline exceeded
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::AllProvidersFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::DataStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Forbidden { .. } => "FORBIDDEN",
            AppError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            AppError::AllProvidersFailed(_) => "ALL_PROVIDERS_FAILED",
            AppError::DataStore(_) => "DATASTORE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Convert AppError to HTTP response with the `{error, message}` envelope
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        tracing::error!(
            error_code = error_code,
            status_code = status.as_u16(),
            message = %message,
            "Request error"
        );

        let body = match &self {
            AppError::Forbidden {
                message,
                blocked_by,
                violations,
            } => Json(json!({
                "error": status.canonical_reason().unwrap_or("Forbidden"),
                "message": message,
                "blocked_by": blocked_by,
                "violations": violations,
            })),
            _ => Json(json!({
                "error": status.canonical_reason().unwrap_or("Error"),
                "message": message,
            })),
        };

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
