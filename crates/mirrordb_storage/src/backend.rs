//! Metadata backend trait definition.

use crate::error::StorageResult;

/// A durable key/value backend for small metadata values.
///
/// Backends are **opaque string stores**. They do not interpret keys or
/// values; the engine owns the key layout (one prefix per account) and the
/// value encodings.
///
/// # Invariants
///
/// - `get` after a successful `set` returns the value that was set
/// - `get` after a successful `remove` returns `None`
/// - Writes made through one handle are visible through every other handle
///   on the same backend
/// - Backends must be `Send + Sync`
///
/// # Blocking
///
/// Every call is synchronous and may block: [`super::FileMetadata`] takes
/// file locks and fsyncs on each write. Values are small, so the engine
/// calls the backend directly from async code for per-mutation counter
/// updates, and moves the periodic heartbeat write onto a blocking thread.
///
/// # Implementors
///
/// - [`super::InMemoryMetadata`] - For testing
/// - [`super::FileMetadata`] - For persistent metadata
pub trait MetadataBackend: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully the value survives process
    /// termination (for persistent backends).
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be made durable.
    fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns every key currently stored, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys(&self) -> StorageResult<Vec<String>>;
}
