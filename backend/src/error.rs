use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application error types
///
/// Not-found and access-denied are deliberately the same variant so callers
/// cannot probe for other users' objects.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found or access denied: {0}")]
    NotFound(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedDialect(String),

    /// Dial, ping or query failure against the user's external database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure reading or writing the schema catalog.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not supported yet: {0}")]
    UnsupportedComposition(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::UnsupportedDialect(_) => "UNSUPPORTED_DIALECT",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::UnsupportedComposition(_) => "UNSUPPORTED_COMPOSITION",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    /// Only external connectivity failures are transient; the core never retries itself.
    pub fn retryable(&self) -> bool {
        matches!(self, AppError::Connection(_))
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
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let detail = match err {
            // Catalog internals stay behind a wrapped message
            AppError::Database(_) | AppError::Internal(_) => {
                ErrorDetail::new(err.code(), "Internal metadata store failure")
            }
            AppError::Connection(msg) => {
                ErrorDetail::new(err.code(), "Failed to reach the external database")
                    .with_details(msg.clone())
            }
            other => ErrorDetail::new(other.code(), other.to_string()),
        };
        ErrorResponse { error: detail }
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Failed to (de)serialize definition: {}", err))
    }
}
