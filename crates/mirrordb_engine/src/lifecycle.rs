//! Opening, validating and rebuilding the account's store.
//!
//! ```text
//! Init ─┬─ LockDenied ──────────────────────────────► LiveFetch
//!       └─ Opening ─(timeout/error/blocked)─────────► LiveFetch (store disabled)
//!             └─ [Upgrading] ─ Open ─ VersionCheck ─┬─ Reload ─► Init
//!                                                   └─ Decide ─┬─ BulkLoad
//!                                                              ├─ DirectFetch
//!                                                              ├─ LiveFetch
//!                                                              └─ Reload ─► Init
//! ```
//!
//! [`DatabaseLifecycle::prepare`] walks `Init` through `Decide` and reports
//! which path to take; [`DatabaseLifecycle::reload`] tears the store down.
//! The engine drives the loop between them.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{CacheError, CacheResult};
use crate::lock::{LockCheck, LockCoordinator};
use crate::metadata::PersistedMetadata;
use mirrordb_core::{Collection, OpenRequest, SequenceNumber, StoreConnection, StoreFactory};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A state of the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Session (re)started.
    Init,
    /// Another session owns the store.
    LockDenied,
    /// Open requested.
    Opening,
    /// The store was created or its collections recreated.
    Upgrading,
    /// The store is open.
    Open,
    /// Comparing the recorded schema version.
    VersionCheck,
    /// Choosing between bulk load and fetching.
    Decide,
    /// Streaming the store into the model.
    BulkLoad,
    /// Catching up from the recorded sequence marker without loading.
    DirectFetch,
    /// Fetching everything from the remote.
    LiveFetch,
    /// Deleting the store and starting over.
    Reload,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::LockDenied => "lock-denied",
            LifecycleState::Opening => "opening",
            LifecycleState::Upgrading => "upgrading",
            LifecycleState::Open => "open",
            LifecycleState::VersionCheck => "version-check",
            LifecycleState::Decide => "decide",
            LifecycleState::BulkLoad => "bulk-load",
            LifecycleState::DirectFetch => "direct-fetch",
            LifecycleState::LiveFetch => "live-fetch",
            LifecycleState::Reload => "reload",
        };
        f.write_str(name)
    }
}

/// Why a rebuild was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadReason {
    /// The recorded schema version differs from the required one, or is
    /// missing while mutations are recorded as pending.
    VersionMismatch {
        /// Version this build requires.
        required: u32,
        /// Version found in metadata.
        found: Option<u32>,
    },
    /// The store had to be recreated although metadata describes an
    /// existing one.
    StaleMetadata,
    /// The store's own structures are unreadable.
    CorruptStore(String),
    /// Populated nodes without a clean pending counter and sequence marker.
    UntrustedContents {
        /// Recorded pending counter.
        pending: Option<u64>,
        /// Whether a sequence marker is recorded.
        has_marker: bool,
    },
    /// Unreadable records were found during a bulk load.
    CorruptRecords {
        /// Collection of the first unreadable record.
        collection: Collection,
        /// Number of unreadable records in that collection.
        count: u64,
    },
    /// A cursor failed during a bulk load.
    LoadFailed(String),
    /// The load finished without a position to resume from, or with
    /// nothing loaded.
    NoResumePoint,
    /// The application asked for a rebuild.
    Requested,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadReason::VersionMismatch {
                required,
                found: Some(found),
            } => write!(f, "schema version {found} does not match required {required}"),
            ReloadReason::VersionMismatch {
                required,
                found: None,
            } => write!(f, "schema version missing, required {required}"),
            ReloadReason::StaleMetadata => f.write_str("metadata describes a store that no longer exists"),
            ReloadReason::CorruptStore(message) => write!(f, "store corrupted: {message}"),
            ReloadReason::UntrustedContents {
                pending,
                has_marker,
            } => write!(
                f,
                "populated store with pending={pending:?} and marker present={has_marker}"
            ),
            ReloadReason::CorruptRecords { collection, count } => {
                write!(f, "{count} unreadable record(s) in {collection}")
            }
            ReloadReason::LoadFailed(message) => write!(f, "bulk load failed: {message}"),
            ReloadReason::NoResumePoint => f.write_str("loaded data has no resumable position"),
            ReloadReason::Requested => f.write_str("rebuild requested"),
        }
    }
}

/// Outcome of comparing the recorded schema version with the required one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    /// The recorded version matches an existing store.
    Current,
    /// Nothing is recorded for a fresh account; the version should be written.
    Unrecorded,
    /// The metadata cannot be trusted.
    Reload(ReloadReason),
}

/// Compares recorded metadata with the store that was just opened.
///
/// `created` is true when the open created the store or recreated its
/// collections. A version missing while a pending counter exists is
/// treated as a mismatch: the counter may describe partially applied data.
pub fn check_schema(
    required: u32,
    recorded: Option<u32>,
    pending: Option<u64>,
    created: bool,
) -> SchemaCheck {
    match recorded {
        Some(version) if version != required => SchemaCheck::Reload(ReloadReason::VersionMismatch {
            required,
            found: Some(version),
        }),
        Some(_) if created => SchemaCheck::Reload(ReloadReason::StaleMetadata),
        Some(_) => SchemaCheck::Current,
        None if pending.is_some() => SchemaCheck::Reload(ReloadReason::VersionMismatch {
            required,
            found: None,
        }),
        None => SchemaCheck::Unrecorded,
    }
}

/// Load path for a store whose schema checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadDecision {
    /// Stream the store into the model, then catch up from `marker`.
    BulkLoad {
        /// Recorded sequence marker.
        marker: SequenceNumber,
    },
    /// Catch up from `marker` without loading.
    DirectFetch {
        /// Recorded sequence marker.
        marker: SequenceNumber,
    },
    /// The store is empty and untracked: fetch everything.
    LiveFetch,
    /// The contents cannot be trusted.
    Reload(ReloadReason),
}

/// Chooses the load path from the pending counter, the sequence marker and
/// the number of stored nodes.
///
/// Only a clean counter together with a marker makes stored data usable.
/// Anything else is fetched live when the store is empty and rebuilt when
/// it is not.
pub fn decide_load(
    pending: Option<u64>,
    marker: Option<SequenceNumber>,
    nodes: u64,
) -> LoadDecision {
    match (pending, marker) {
        (Some(0), Some(marker)) if nodes == 0 => LoadDecision::DirectFetch { marker },
        (Some(0), Some(marker)) => LoadDecision::BulkLoad { marker },
        _ if nodes == 0 => LoadDecision::LiveFetch,
        _ => LoadDecision::Reload(ReloadReason::UntrustedContents {
            pending,
            has_marker: marker.is_some(),
        }),
    }
}

/// Where [`DatabaseLifecycle::prepare`] ended up.
#[derive(Debug)]
pub(crate) enum Prepared<S> {
    /// Another session owns the store.
    LockDenied { age: Duration },
    /// The store cannot be used this session.
    Unusable(CacheError),
    /// Rebuild and start over.
    Reload(ReloadReason),
    /// Stream the store into the model, then catch up.
    BulkLoad {
        connection: S,
        marker: SequenceNumber,
    },
    /// Catch up from `marker` without loading.
    DirectFetch {
        connection: S,
        marker: SequenceNumber,
    },
    /// The store is empty and untracked: fetch everything.
    LiveFetch { connection: S },
}

/// Ordered record of visited lifecycle states.
#[derive(Debug, Clone)]
pub(crate) struct TransitionLog {
    account: Arc<str>,
    states: Arc<Mutex<Vec<LifecycleState>>>,
}

impl TransitionLog {
    pub fn new(account: &str) -> Self {
        Self {
            account: account.into(),
            states: Arc::default(),
        }
    }

    pub fn record(&self, state: LifecycleState) {
        tracing::debug!(account = %self.account, state = %state, "lifecycle transition");
        self.states.lock().push(state);
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }

    pub fn states(&self) -> Vec<LifecycleState> {
        self.states.lock().clone()
    }
}

/// Owns the store connection for the current session.
pub(crate) struct DatabaseLifecycle<F: StoreFactory, C: Clock> {
    config: EngineConfig,
    factory: F,
    metadata: PersistedMetadata,
    lock: LockCoordinator<C>,
    transitions: TransitionLog,
    connection: Mutex<Option<F::Connection>>,
    corrupt_open_seen: AtomicBool,
}

impl<F: StoreFactory, C: Clock> DatabaseLifecycle<F, C> {
    pub fn new(
        config: EngineConfig,
        factory: F,
        metadata: PersistedMetadata,
        clock: Arc<C>,
        transitions: TransitionLog,
    ) -> Self {
        let lock = LockCoordinator::new(
            metadata.clone(),
            clock,
            config.heartbeat_interval,
            config.heartbeat_staleness,
        );
        Self {
            config,
            factory,
            metadata,
            lock,
            transitions,
            connection: Mutex::new(None),
            corrupt_open_seen: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> &LockCoordinator<C> {
        &self.lock
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Resets per-session state.
    pub fn begin_session(&self) {
        self.corrupt_open_seen.store(false, Ordering::SeqCst);
    }

    /// Runs `Init` through `Decide`.
    pub async fn prepare(&self) -> Prepared<F::Connection> {
        let account = self.config.account.as_str();
        self.transitions.record(LifecycleState::Init);

        match self.lock.check() {
            Ok(LockCheck::Acquired) => {}
            Ok(LockCheck::Yield { age }) => {
                self.transitions.record(LifecycleState::LockDenied);
                return Prepared::LockDenied { age };
            }
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "heartbeat unavailable");
                return Prepared::Unusable(e);
            }
        }

        self.transitions.record(LifecycleState::Opening);
        let request = OpenRequest::new(self.config.store_name(), self.config.schema_version);
        let opened = match tokio::time::timeout(self.config.open_timeout, self.factory.open(request)).await {
            Err(_) => {
                return self.unusable(CacheError::open_failure(format!(
                    "open timed out after {:?}",
                    self.config.open_timeout
                )));
            }
            Ok(Err(e)) if e.is_corruption() => {
                if self.corrupt_open_seen.swap(true, Ordering::SeqCst) {
                    return self.unusable(CacheError::open_failure(e.to_string()));
                }
                tracing::warn!(account = %account, error = %e, "store corrupted on open");
                return Prepared::Reload(ReloadReason::CorruptStore(e.to_string()));
            }
            Ok(Err(e)) => return self.unusable(CacheError::open_failure(e.to_string())),
            Ok(Ok(opened)) => opened,
        };

        if let Some(from) = opened.upgraded_from {
            self.transitions.record(LifecycleState::Upgrading);
            tracing::info!(
                account = %account,
                from,
                to = self.config.schema_version,
                "store created"
            );
        }
        let connection = opened.connection;
        *self.connection.lock() = Some(connection.clone());
        self.transitions.record(LifecycleState::Open);

        self.transitions.record(LifecycleState::VersionCheck);
        let (recorded, pending) = match (self.metadata.schema_version(), self.metadata.pending_count()) {
            (Ok(version), Ok(pending)) => (version, pending),
            (Err(e), _) | (_, Err(e)) => return self.unusable(e),
        };
        let required = self.config.schema_version;
        match check_schema(required, recorded, pending, opened.upgraded_from.is_some()) {
            SchemaCheck::Current => {}
            SchemaCheck::Unrecorded => {
                if let Err(e) = self.metadata.set_schema_version(required) {
                    return self.unusable(e);
                }
            }
            SchemaCheck::Reload(reason) => return Prepared::Reload(reason),
        }

        self.transitions.record(LifecycleState::Decide);
        let marker = match self.metadata.sequence_marker() {
            Ok(marker) => marker,
            Err(e) => return self.unusable(e),
        };
        let nodes = match connection.count(Collection::Nodes).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "counting nodes failed, treating store as empty");
                0
            }
        };
        tracing::debug!(
            account = %account,
            pending = ?pending,
            marker = ?marker,
            nodes,
            "deciding load path"
        );

        match decide_load(pending, marker, nodes) {
            LoadDecision::DirectFetch { marker } => Prepared::DirectFetch { connection, marker },
            LoadDecision::BulkLoad { marker } => Prepared::BulkLoad { connection, marker },
            LoadDecision::LiveFetch => Prepared::LiveFetch { connection },
            LoadDecision::Reload(reason) => Prepared::Reload(reason),
        }
    }

    fn unusable(&self, error: CacheError) -> Prepared<F::Connection> {
        tracing::warn!(
            account = %self.config.account,
            error = %error,
            "local store unusable for this session"
        );
        self.close_connection();
        self.lock.stop();
        Prepared::Unusable(error)
    }

    /// Tears the store down: closes the connection, regenerates the session
    /// token, clears metadata and deletes the store.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata cannot be cleared or the delete fails or
    /// times out; the store must then be treated as unusable.
    pub async fn reload(&self, reason: &ReloadReason) -> CacheResult<()> {
        self.transitions.record(LifecycleState::Reload);
        tracing::info!(account = %self.config.account, reason = %reason, "rebuilding local store");

        self.close_connection();
        // The old token must be retired first so its refresh cannot rewrite
        // the heartbeat after it is cleared.
        self.lock.regenerate_token();
        self.metadata.clear_all()?;

        let name = self.config.store_name();
        match tokio::time::timeout(self.config.delete_timeout, self.factory.delete(&name)).await {
            Err(_) => Err(CacheError::open_failure(format!(
                "delete timed out after {:?}",
                self.config.delete_timeout
            ))),
            Ok(Err(e)) => Err(CacheError::open_failure(format!("delete failed: {e}"))),
            Ok(Ok(())) => Ok(()),
        }
    }

    pub fn close_connection(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.close();
        }
    }

    /// Stops the heartbeat and closes the connection.
    pub fn close(&self) {
        self.lock.stop();
        self.close_connection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_check_outcomes() {
        assert_eq!(check_schema(6, Some(6), Some(0), false), SchemaCheck::Current);
        assert_eq!(check_schema(6, None, None, true), SchemaCheck::Unrecorded);
        assert_eq!(
            check_schema(6, Some(5), Some(0), false),
            SchemaCheck::Reload(ReloadReason::VersionMismatch {
                required: 6,
                found: Some(5)
            })
        );
        assert_eq!(
            check_schema(6, Some(6), Some(0), true),
            SchemaCheck::Reload(ReloadReason::StaleMetadata)
        );
        assert_eq!(
            check_schema(6, None, Some(3), false),
            SchemaCheck::Reload(ReloadReason::VersionMismatch {
                required: 6,
                found: None
            })
        );
    }

    #[test]
    fn load_decisions() {
        let marker = SequenceNumber::new(42);
        assert_eq!(
            decide_load(Some(0), Some(marker), 0),
            LoadDecision::DirectFetch { marker }
        );
        assert_eq!(
            decide_load(Some(0), Some(marker), 7),
            LoadDecision::BulkLoad { marker }
        );
        assert_eq!(decide_load(None, None, 0), LoadDecision::LiveFetch);
        assert_eq!(decide_load(Some(2), Some(marker), 0), LoadDecision::LiveFetch);
        assert_eq!(
            decide_load(Some(0), None, 7),
            LoadDecision::Reload(ReloadReason::UntrustedContents {
                pending: Some(0),
                has_marker: false
            })
        );
    }

    #[test]
    fn version_mismatch_messages() {
        let stale = ReloadReason::VersionMismatch {
            required: 6,
            found: Some(5),
        };
        assert_eq!(stale.to_string(), "schema version 5 does not match required 6");
        let missing = ReloadReason::VersionMismatch {
            required: 6,
            found: None,
        };
        assert_eq!(missing.to_string(), "schema version missing, required 6");
    }
}
