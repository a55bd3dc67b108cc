//! Error type system for the extension bridge
//!
//! This module provides the bridge-wide error type with:
//! - One variant per failure class in the install/load/dispatch pipeline
//! - HTTP status code mapping for the RPC façade
//! - Detailed error messages with trace IDs
//!
//! The core performs no automatic retries: every error is surfaced to the
//! caller after partial artifacts have been cleaned up.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // Package pipeline errors
    #[error("Invalid extension package: {0}")]
    Validation(String),

    #[error("No bytecode payload in package: {0}")]
    MissingPayload(String),

    #[error("Module conversion failed: {0}")]
    Conversion(String),

    #[error("Entry point resolution failed: {0}")]
    InvalidExtension(String),

    // Lifecycle precondition errors
    #[error("Extension already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Extension already up to date: {0}")]
    AlreadyUpToDate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Boundary collaborators
    #[error("Repository error: {0}")]
    Repo(String),

    #[error("Network error: {0}")]
    Network(String),

    // Delegated plugin failures, propagated verbatim with origin context
    #[error("Source call failed: {0}")]
    SourceCall(String),

    // Infrastructure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            BridgeError::Validation(_)
            | BridgeError::Serialization(_)
            | BridgeError::Repo(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict: caller precondition violations
            BridgeError::AlreadyInstalled(_) | BridgeError::AlreadyUpToDate(_) => {
                StatusCode::CONFLICT
            }

            // 422 Unprocessable: the package itself is unusable
            BridgeError::MissingPayload(_)
            | BridgeError::Conversion(_)
            | BridgeError::InvalidExtension(_) => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 Bad Gateway: upstream faults
            BridgeError::Network(_) | BridgeError::SourceCall(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            BridgeError::Io(_) | BridgeError::Config(_) | BridgeError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            BridgeError::Validation(_) => "ValidationError",
            BridgeError::MissingPayload(_) => "MissingPayloadError",
            BridgeError::Conversion(_) => "ConversionError",
            BridgeError::InvalidExtension(_) => "InvalidExtensionError",
            BridgeError::AlreadyInstalled(_) => "AlreadyInstalledError",
            BridgeError::AlreadyUpToDate(_) => "AlreadyUpToDateError",
            BridgeError::NotFound(_) => "NotFoundError",
            BridgeError::Repo(_) => "RepoError",
            BridgeError::Network(_) => "NetworkError",
            BridgeError::SourceCall(_) => "SourceCallError",
            BridgeError::Io(_) => "IoError",
            BridgeError::Serialization(_) => "SerializationError",
            BridgeError::Config(_) => "ConfigError",
            BridgeError::Internal(_) => "InternalError",
        }
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from a BridgeError
    pub fn from_error(error: &BridgeError) -> Self {
        Self::new(error.error_type().to_string(), error.to_string())
    }
}

/// Implement IntoResponse so read-query handlers propagate BridgeError
/// directly as transport-level errors.
impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        tracing::error!(
            error_type = self.error_type(),
            trace_id = %error_response.trace_id,
            status_code = %status_code,
            "Request failed: {}",
            self
        );

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Context extension trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error, producing an Internal variant
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let context_str = context.into();
            BridgeError::Internal(format!("{}: {}", context_str, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            BridgeError::Validation("bad version".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::NotFound("source 7".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BridgeError::AlreadyInstalled("com.example.foo".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BridgeError::AlreadyUpToDate("com.example.foo".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BridgeError::MissingPayload("pkg".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BridgeError::SourceCall("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            BridgeError::Internal("oops".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_types() {
        assert_eq!(
            BridgeError::Validation("x".into()).error_type(),
            "ValidationError"
        );
        assert_eq!(
            BridgeError::InvalidExtension("x".into()).error_type(),
            "InvalidExtensionError"
        );
        assert_eq!(
            BridgeError::AlreadyUpToDate("x".into()).error_type(),
            "AlreadyUpToDateError"
        );
    }

    #[test]
    fn test_error_response_creation() {
        let error = BridgeError::NotFound("source 42".into());
        let response = ErrorResponse::from_error(&error);

        assert_eq!(response.error, "NotFoundError");
        assert!(response.message.contains("source 42"));
        assert!(!response.trace_id.is_empty());
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let contexted = result.context("Failed to read module archive");

        assert!(contexted.is_err());
        let err = contexted.unwrap_err();
        assert!(err.to_string().contains("Failed to read module archive"));
        assert!(err.to_string().contains("file not found"));
    }
}
