//! Store traits.
//!
//! The engine never talks to a concrete store. It drives these traits, which
//! [`crate::MemoryStoreFactory`] and [`crate::FileStoreFactory`] implement and
//! which tests wrap to inject faults.
//!
//! Every method that can suspend returns a `Send` future so the write queue
//! can run its flush on a spawned task.

use crate::error::StoreResult;
use crate::record::Record;
use crate::schema::Schema;
use crate::types::{Collection, RecordKey};
use std::future::Future;

/// Parameters for opening a store.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Store name (one store per account).
    pub name: String,
    /// Required store version.
    pub version: u32,
    /// Collections to create if the store is created or upgraded.
    pub schema: Schema,
}

impl OpenRequest {
    /// Creates a request for the current schema.
    #[must_use]
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            schema: Schema::current(),
        }
    }
}

/// A successfully opened store.
#[derive(Debug)]
pub struct OpenedStore<C> {
    /// The connection.
    pub connection: C,
    /// Set when the open created or upgraded the store: the version found
    /// before (0 for a store that did not exist).
    pub upgraded_from: Option<u32>,
}

/// One step of a cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorItem {
    /// A decodable record.
    Record(Record),
    /// A stored value that could not be decoded.
    Unreadable {
        /// Key of the damaged entry.
        key: RecordKey,
        /// Why decoding failed.
        reason: String,
    },
}

/// Opens and deletes named stores.
pub trait StoreFactory: Send + Sync + 'static {
    /// Connection type handed out by [`StoreFactory::open`].
    type Connection: StoreConnection;

    /// Opens the store, creating or upgrading it when needed.
    ///
    /// # Errors
    ///
    /// - `Blocked` if an upgrade is needed while another connection is open
    /// - `VersionTooLow` if the store exists at a higher version
    /// - `Corrupted` if the store's own structures are unreadable
    fn open(
        &self,
        request: OpenRequest,
    ) -> impl Future<Output = StoreResult<OpenedStore<Self::Connection>>> + Send;

    /// Deletes the store and everything in it. Deleting a missing store
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Blocked` if another connection still holds the store.
    fn delete(&self, name: &str) -> impl Future<Output = StoreResult<()>> + Send;
}

/// An open store.
///
/// Connections are cheap handles: clones refer to the same underlying
/// connection, and closing any clone closes all of them.
pub trait StoreConnection: Clone + Send + Sync + 'static {
    /// Write transaction type.
    type Transaction: WriteTransaction;
    /// Cursor type.
    type Cursor: RecordCursor;

    /// Name of the store.
    fn name(&self) -> &str;

    /// Version the store is at.
    fn version(&self) -> u32;

    /// Starts a write transaction scoped to one collection.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after close/delete and `UnknownCollection` for a
    /// collection the store was not created with.
    fn begin_write(&self, collection: Collection) -> StoreResult<Self::Transaction>;

    /// Opens a read cursor over `collection` in key order.
    fn open_cursor(
        &self,
        collection: Collection,
    ) -> impl Future<Output = StoreResult<Self::Cursor>> + Send;

    /// Counts the records in `collection`.
    fn count(&self, collection: Collection) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Closes the connection. Idempotent.
    fn close(&self);

    /// Returns true once the connection can no longer be used.
    fn is_closed(&self) -> bool;
}

/// A write transaction bound to a single collection.
pub trait WriteTransaction: Send + 'static {
    /// The collection this transaction writes to.
    fn collection(&self) -> Collection;

    /// Inserts or replaces a record; resolves once the entry is committed.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` if the record lacks the collection's key field.
    fn put(&mut self, record: Record) -> impl Future<Output = StoreResult<()>> + Send;

    /// Deletes a record by key; resolves once the entry is committed.
    /// Deleting a missing key succeeds.
    fn delete(&mut self, key: &str) -> impl Future<Output = StoreResult<()>> + Send;
}

/// A forward-only cursor over one collection.
pub trait RecordCursor: Send {
    /// Advances the cursor. Returns `None` once the collection is exhausted.
    fn advance(&mut self) -> impl Future<Output = StoreResult<Option<CursorItem>>> + Send;
}
