//! Error types for feedhook.

use thiserror::Error;

/// Common error type for feedhook.
#[derive(Error, Debug)]
pub enum FeedhookError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error for configuration or feed definitions.
    #[error("validation error: {0}")]
    Validation(String),

    /// A required external capability is missing.
    ///
    /// This is the only error that is fatal once the process is running.
    #[error("missing dependency: {0}")]
    Dependency(String),

    /// Feed fetch error.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Webhook delivery error.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for FeedhookError {
    fn from(e: reqwest::Error) -> Self {
        FeedhookError::Http(e.to_string())
    }
}

/// Result type alias for feedhook operations.
pub type Result<T> = std::result::Result<T, FeedhookError>;
