//! # mirrordb Engine
//!
//! Keeps an account's local store in sync with the application's in-memory
//! model and a remote, sequence-numbered source of truth, so a restarted
//! application can hydrate from disk instead of downloading everything.
//!
//! This crate provides:
//! - Per-account persisted metadata (pending counter, schema version,
//!   sequence marker, heartbeat)
//! - A heartbeat lock between concurrent sessions of one account
//! - The session lifecycle: open, upgrade, validate, decide, rebuild
//! - An ordered write-back queue
//! - A bulk loader that streams the store into the model
//!
//! ## Failure model
//!
//! Nothing in the local cache is allowed to break the application. Every
//! store problem degrades to one of two outcomes:
//!
//! - **Live fetch**: skip the store for this session and fetch everything
//!   from the remote (lock held by another session, open failure, timeout).
//! - **Rebuild**: delete the store and its metadata and start over (schema
//!   mismatch, corrupt records, untrustworthy contents).
//!
//! Partially loaded state is never kept: a rebuild discards whatever the
//! model was hydrated with before starting again.
//!
//! ## Key invariants
//!
//! - The pending counter equals the number of queued entries not yet
//!   durably committed, and survives restarts
//! - Mutations of one collection commit in arrival order
//! - A recorded schema version lower than required always rebuilds before
//!   anything is loaded
//! - A session that finds a fresh heartbeat from another session never
//!   writes to the store

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod engine;
mod error;
mod lifecycle;
mod loader;
mod lock;
mod metadata;
mod ports;
mod queue;

pub use clock::{Clock, SystemClock};
pub use config::{EngineConfig, DEFAULT_SCHEMA_VERSION};
pub use engine::{CacheEngine, LiveFetchReason, SessionPath, SessionReport, SessionStatus};
pub use error::{CacheError, CacheResult, RemoteError};
pub use lifecycle::{check_schema, decide_load, LifecycleState, LoadDecision, ReloadReason, SchemaCheck};
pub use loader::{BulkLoader, Hydrated, LoadPass, LoadState};
pub use lock::{LockCheck, LockCoordinator};
pub use metadata::{Heartbeat, MetadataSnapshot, PersistedMetadata};
pub use ports::{ApplicationModel, RemoteSync};
pub use queue::{QueueEntry, QueueOp, WriteQueue};
