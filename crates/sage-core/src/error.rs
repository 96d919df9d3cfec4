//! Error types for the Sage core library.

use thiserror::Error;

/// Result type alias using Sage core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for configuration and setup.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error while layering config values
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
