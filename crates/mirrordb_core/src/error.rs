//! Error types for store operations.

use crate::types::Collection;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while opening, reading or writing a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another connection prevents the upgrade or delete from proceeding.
    #[error("store {name} is blocked by another connection")]
    Blocked {
        /// Name of the store.
        name: String,
    },

    /// The store exists at a higher version than requested.
    #[error("store version {existing} is newer than requested version {requested}")]
    VersionTooLow {
        /// The version the caller asked for.
        requested: u32,
        /// The version found on disk.
        existing: u32,
    },

    /// The store does not exist and creation was not requested.
    #[error("store not found: {name}")]
    NotFound {
        /// Name of the store.
        name: String,
    },

    /// Store structures (manifest, logs) are unreadable.
    #[error("store corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The connection was closed, or the store was deleted underneath it.
    #[error("store connection is closed")]
    Closed,

    /// The collection is not part of the opened store.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// Name of the collection.
        name: String,
    },

    /// A record was written without its key field.
    #[error("record for {collection} has no key field {key_field:?}")]
    MissingKey {
        /// Target collection.
        collection: Collection,
        /// The declared key field.
        key_field: String,
    },

    /// A record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a blocked error.
    pub fn blocked(name: impl Into<String>) -> Self {
        Self::Blocked { name: name.into() }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Returns true if the store itself is damaged, as opposed to being
    /// temporarily unreachable.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(StoreError::corrupted("bad manifest").is_corruption());
        assert!(!StoreError::blocked("mirror_alice").is_corruption());
        assert!(!StoreError::Closed.is_corruption());
    }

    #[test]
    fn error_display() {
        let err = StoreError::VersionTooLow {
            requested: 5,
            existing: 6,
        };
        assert_eq!(
            err.to_string(),
            "store version 6 is newer than requested version 5"
        );

        let err = StoreError::MissingKey {
            collection: Collection::Users,
            key_field: "u".into(),
        };
        assert!(err.to_string().contains("users"));
    }
}
