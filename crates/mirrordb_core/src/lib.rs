//! # mirrordb Core
//!
//! The embedded per-account store that backs the local cache.
//!
//! This crate provides:
//! - The four fixed collections and their key fields
//! - JSON-object records with CBOR encoding at rest
//! - The versioned schema applied when a store is created or upgraded
//! - Async store traits: factory, connection, write transaction, cursor
//! - An in-memory store and a file-backed store
//!
//! ## Store model
//!
//! A store is opened by name at a required version. If the store does not
//! exist yet, or exists at a lower version, it is upgraded: every collection
//! is dropped and recreated from the [`Schema`]. Upgrading is the only place
//! collections come into existence.
//!
//! Writes happen through a [`WriteTransaction`] bound to exactly one
//! collection. Each `put`/`delete` resolves once that single entry is
//! durable; there is no multi-entry atomicity.
//!
//! Reads stream a collection through a [`RecordCursor`]. A value that cannot
//! be decoded is reported as [`CursorItem::Unreadable`] instead of failing the
//! cursor, so callers can decide whether to keep draining.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod record;
mod schema;
mod store;
mod types;

pub use error::{StoreError, StoreResult};
pub use file::{FileConnection, FileCursor, FileStoreConfig, FileStoreFactory, FileTransaction};
pub use memory::{MemoryConnection, MemoryCursor, MemoryStoreFactory, MemoryTransaction};
pub use record::{Record, DERIVED_FIELDS};
pub use schema::{CollectionSpec, Schema};
pub use store::{
    CursorItem, OpenRequest, OpenedStore, RecordCursor, StoreConnection, StoreFactory,
    WriteTransaction,
};
pub use types::{Collection, RecordKey, SequenceNumber};
