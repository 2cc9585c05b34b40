//! Error types for Keygate core

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in Keygate core
///
/// Refused downloads are not errors; they come back as
/// [`keygate_types::Decision::Deny`].
#[derive(Debug, Error)]
pub enum KeygateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Resource not found: {0}")]
    ResourceNotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File does not exist: {}", .0.display())]
    FileMissing(PathBuf),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),
}

impl KeygateError {
    /// Check if this error was caused by bad caller input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KeygateError::ResourceNotFound(_)
                | KeygateError::InvalidInput(_)
                | KeygateError::FileMissing(_)
        )
    }
}

impl From<serde_json::Error> for KeygateError {
    fn from(error: serde_json::Error) -> Self {
        KeygateError::Serialization(error.to_string())
    }
}
