//! # mirrordb Storage
//!
//! Durable metadata backends for mirrordb.
//!
//! The local cache keeps a handful of small facts outside the embedded store
//! itself: the pending-mutation count, the schema version the cached data was
//! written with, the last applied remote sequence marker and the session
//! heartbeat. They must survive the store being closed, deleted or found
//! corrupt, so they live in a separate key/value backend.
//!
//! ## Design Principles
//!
//! - Backends store opaque string values under string keys
//! - No knowledge of which keys the engine uses or how values are encoded
//! - Must be `Send + Sync`: the heartbeat task and the engine share one backend
//! - Every write is visible to other handles on the same backend immediately
//!
//! ## Available Backends
//!
//! - [`InMemoryMetadata`] - For testing and simulated multi-session setups
//! - [`FileMetadata`] - A single JSON document shared between processes
//!
//! ## Example
//!
//! ```rust
//! use mirrordb_storage::{InMemoryMetadata, MetadataBackend};
//!
//! let meta = InMemoryMetadata::new();
//! meta.set("alice_mirror_pending", "3").unwrap();
//! assert_eq!(meta.get("alice_mirror_pending").unwrap().as_deref(), Some("3"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::MetadataBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileMetadata;
pub use memory::InMemoryMetadata;
