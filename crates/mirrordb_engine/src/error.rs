//! Error types for the cache engine.
//!
//! Almost every error here is absorbed by the engine: open failures redirect
//! to a live fetch and commit failures are logged and skipped. Conditions
//! that are not failures of an operation are not errors at all: lock
//! contention is a [`crate::LiveFetchReason`], and version mismatches and
//! corrupt records are [`crate::ReloadReason`]s. Only remote errors reach
//! the caller of [`crate::CacheEngine::start_session`].

use mirrordb_core::{Collection, StoreError};
use mirrordb_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The store could not be opened: unavailable, blocked or timed out.
    #[error("store open failed: {reason}")]
    OpenFailure {
        /// What went wrong.
        reason: String,
    },

    /// A single queued write or delete was rejected.
    #[error("commit failed in {collection}: {message}")]
    CommitFailure {
        /// Collection of the rejected entry.
        collection: Collection,
        /// Error message.
        message: String,
    },

    /// Embedded store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Metadata backend error.
    #[error("metadata error: {0}")]
    Metadata(#[from] StorageError),

    /// The remote collaborator failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl CacheError {
    /// Creates an open failure.
    pub fn open_failure(reason: impl Into<String>) -> Self {
        Self::OpenFailure {
            reason: reason.into(),
        }
    }
}

/// Errors reported by a [`crate::RemoteSync`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}
