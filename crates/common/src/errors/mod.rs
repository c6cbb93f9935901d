//! Error types for DataChat services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for session, tenant, data and agent failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    PayloadTooLarge,
    InvalidTenantId,
    InvalidData,

    // Authentication errors (2xxx)
    Unauthorized,
    SessionNotFound,
    SessionExpired,

    // Isolation errors (3xxx)
    TenantMismatch,
    IsolationViolation,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    DatabaseError,
    StorageError,

    // Resource and agent errors (8xxx)
    BuildFailure,
    BuildTimeout,
    AgentError,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::PayloadTooLarge => 1003,
            ErrorCode::InvalidTenantId => 1004,
            ErrorCode::InvalidData => 1005,

            ErrorCode::Unauthorized => 2001,
            ErrorCode::SessionNotFound => 2002,
            ErrorCode::SessionExpired => 2003,

            ErrorCode::TenantMismatch => 3001,
            ErrorCode::IsolationViolation => 3002,

            ErrorCode::RateLimited => 6001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::StorageError => 7002,

            ErrorCode::BuildFailure => 8001,
            ErrorCode::BuildTimeout => 8002,
            ErrorCode::AgentError => 8003,
            ErrorCode::UpstreamError => 8004,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid tenant id '{tenant_id}': {reason}")]
    InvalidTenantId { tenant_id: String, reason: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Session not found, please log in again")]
    SessionNotFound { id: String },

    #[error("Session expired, please log in again")]
    SessionExpired { id: String },

    // Isolation errors
    #[error("Tenant mismatch")]
    TenantMismatch,

    #[error("Isolation violation: {message}")]
    IsolationViolation { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },

    // Resource and agent errors
    #[error("Failed to prepare session resources: {message}")]
    BuildFailure { message: String },

    #[error("Timed out after {timeout_ms}ms waiting for session resources")]
    BuildTimeout { timeout_ms: u64 },

    #[error("Agent error: {message}")]
    AgentError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::InvalidTenantId { .. } => ErrorCode::InvalidTenantId,
            AppError::InvalidData { .. } => ErrorCode::InvalidData,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::SessionExpired { .. } => ErrorCode::SessionExpired,
            AppError::TenantMismatch => ErrorCode::TenantMismatch,
            AppError::IsolationViolation { .. } => ErrorCode::IsolationViolation,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::BuildFailure { .. } => ErrorCode::BuildFailure,
            AppError::BuildTimeout { .. } => ErrorCode::BuildTimeout,
            AppError::AgentError { .. } => ErrorCode::AgentError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidTenantId { .. }
            | AppError::InvalidData { .. } => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::Unauthorized { .. }
            | AppError::SessionNotFound { .. }
            | AppError::SessionExpired { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::TenantMismatch | AppError::IsolationViolation { .. } => {
                StatusCode::FORBIDDEN
            }

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::Storage { .. }
            | AppError::BuildFailure { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::AgentError { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::BuildTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Tenant isolation failures are fatal for the request and always logged loudly
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            AppError::TenantMismatch | AppError::IsolationViolation { .. }
        )
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_security_relevant() {
            tracing::error!(
                security = true,
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Tenant isolation check failed"
            );
        } else if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::InvalidData {
            message: format!("malformed CSV: {}", err),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SessionNotFound { id: "sess_x".into() };
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(err.to_string().contains("log in again"));
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::InvalidData {
            message: "empty table".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_isolation_errors_are_security_relevant() {
        assert!(AppError::TenantMismatch.is_security_relevant());
        assert!(AppError::IsolationViolation {
            message: "escape".into()
        }
        .is_security_relevant());
        assert!(!AppError::InvalidTenantId {
            tenant_id: "../x".into(),
            reason: "bad".into()
        }
        .is_security_relevant());
        assert_eq!(AppError::TenantMismatch.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_build_errors() {
        let err = AppError::BuildTimeout { timeout_ms: 500 };
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code().as_code(), 8002);
        assert!(AppError::BuildFailure { message: "boom".into() }.is_server_error());
    }
}
