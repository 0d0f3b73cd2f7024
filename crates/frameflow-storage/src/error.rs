//! Storage error types

use thiserror::Error;

/// Result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Store construction or registry lookup failed
    #[error("storage configuration error: {0}")]
    Config(String),

    /// The requested key does not exist in the store
    #[error("object '{0}' not found")]
    NotFound(String),

    /// The remote answered with a non-success status
    #[error("fetching '{key}' returned status {status}")]
    Status {
        key: String,
        status: reqwest::StatusCode,
    },

    /// Transport-level failure from the HTTP client
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Every allowed attempt failed; `source` is the last failure
    #[error("giving up on '{key}' after {attempts} attempt(s): {source}")]
    RetryExhausted {
        key: String,
        attempts: u32,
        source: Box<StorageError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
