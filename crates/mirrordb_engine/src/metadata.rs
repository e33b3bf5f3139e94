//! Typed per-account view over the metadata backend.

use crate::error::CacheResult;
use mirrordb_core::SequenceNumber;
use mirrordb_storage::MetadataBackend;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const PENDING: &str = "pending";
const VERSION: &str = "version";
const SEQUENCE: &str = "sequence";
const HEARTBEAT: &str = "heartbeat";

/// The last heartbeat written by the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Token of the session that wrote it.
    pub token: Uuid,
    /// When it was written, in Unix milliseconds.
    pub at: u64,
}

impl Heartbeat {
    /// Returns the heartbeat's age at `now` (zero if it lies in the future).
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.at)
    }
}

/// All metadata of one account at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// Entries queued but not durably committed.
    pub pending: Option<u64>,
    /// Schema version the store was created with.
    pub schema_version: Option<u32>,
    /// Last applied remote position.
    pub sequence: Option<SequenceNumber>,
    /// Last heartbeat.
    pub heartbeat: Option<Heartbeat>,
}

/// Durable scalar facts about an account's cache.
///
/// Keys are `<account>_mirror_<name>`. Values are stored as strings; a value
/// that does not parse is treated as absent.
#[derive(Clone)]
pub struct PersistedMetadata {
    backend: Arc<dyn MetadataBackend>,
    account: String,
    // Serializes read-modify-write of the pending counter.
    counter: Arc<Mutex<()>>,
}

impl std::fmt::Debug for PersistedMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedMetadata")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl PersistedMetadata {
    /// Creates the view for `account`.
    pub fn new(backend: Arc<dyn MetadataBackend>, account: impl Into<String>) -> Self {
        Self {
            backend,
            account: account.into(),
            counter: Arc::new(Mutex::new(())),
        }
    }

    /// The account this view is scoped to.
    pub fn account(&self) -> &str {
        &self.account
    }

    fn key(&self, name: &str) -> String {
        format!("{}_mirror_{name}", self.account)
    }

    fn read<T: std::str::FromStr>(&self, name: &str) -> CacheResult<Option<T>> {
        let key = self.key(name);
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(None);
        };
        match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "ignoring unparseable metadata value");
                Ok(None)
            }
        }
    }

    fn write(&self, name: &str, value: impl ToString) -> CacheResult<()> {
        self.backend.set(&self.key(name), &value.to_string())?;
        Ok(())
    }

    fn remove(&self, name: &str) -> CacheResult<()> {
        self.backend.remove(&self.key(name))?;
        Ok(())
    }

    /// Returns the pending counter, `None` if never recorded.
    pub fn pending_count(&self) -> CacheResult<Option<u64>> {
        self.read(PENDING)
    }

    /// Increments the pending counter, returning the new value.
    pub fn increment_pending(&self) -> CacheResult<u64> {
        let _guard = self.counter.lock();
        let next = self.pending_count()?.unwrap_or(0).saturating_add(1);
        self.write(PENDING, next)?;
        Ok(next)
    }

    /// Decrements the pending counter, never below zero.
    pub fn decrement_pending(&self) -> CacheResult<u64> {
        let _guard = self.counter.lock();
        let next = self.pending_count()?.unwrap_or(0).saturating_sub(1);
        self.write(PENDING, next)?;
        Ok(next)
    }

    /// Records that nothing is pending.
    pub fn clear_pending(&self) -> CacheResult<()> {
        let _guard = self.counter.lock();
        self.write(PENDING, 0)
    }

    /// Returns the recorded schema version.
    pub fn schema_version(&self) -> CacheResult<Option<u32>> {
        self.read(VERSION)
    }

    /// Records the schema version.
    pub fn set_schema_version(&self, version: u32) -> CacheResult<()> {
        self.write(VERSION, version)
    }

    /// Returns the last applied remote position.
    pub fn sequence_marker(&self) -> CacheResult<Option<SequenceNumber>> {
        self.read(SEQUENCE)
    }

    /// Records the last applied remote position.
    pub fn set_sequence_marker(&self, marker: SequenceNumber) -> CacheResult<()> {
        self.write(SEQUENCE, marker.as_u64())
    }

    /// Returns the last heartbeat.
    pub fn heartbeat(&self) -> CacheResult<Option<Heartbeat>> {
        let key = self.key(HEARTBEAT);
        let Some(raw) = self.backend.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(heartbeat) => Ok(Some(heartbeat)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "ignoring unparseable heartbeat");
                Ok(None)
            }
        }
    }

    /// Writes a heartbeat.
    pub fn write_heartbeat(&self, heartbeat: &Heartbeat) -> CacheResult<()> {
        let value = serde_json::to_string(heartbeat).map_err(mirrordb_storage::StorageError::from)?;
        self.backend.set(&self.key(HEARTBEAT), &value)?;
        Ok(())
    }

    /// Removes the heartbeat.
    pub fn clear_heartbeat(&self) -> CacheResult<()> {
        self.remove(HEARTBEAT)
    }

    /// Removes every entry of this account.
    pub fn clear_all(&self) -> CacheResult<()> {
        let _guard = self.counter.lock();
        for name in [PENDING, VERSION, SEQUENCE, HEARTBEAT] {
            self.remove(name)?;
        }
        Ok(())
    }

    /// Reads every entry at once.
    pub fn snapshot(&self) -> CacheResult<MetadataSnapshot> {
        Ok(MetadataSnapshot {
            pending: self.pending_count()?,
            schema_version: self.schema_version()?,
            sequence: self.sequence_marker()?,
            heartbeat: self.heartbeat()?,
        })
    }
}
