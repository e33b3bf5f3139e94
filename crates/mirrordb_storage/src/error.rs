//! Error types for metadata operations.

use std::io;
use thiserror::Error;

/// Result type for metadata operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing metadata.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The metadata document could not be parsed.
    #[error("metadata corrupted: {0}")]
    Corrupted(String),

    /// The metadata document could not be serialized.
    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
