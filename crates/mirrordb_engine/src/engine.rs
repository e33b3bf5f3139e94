//! The cache engine.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{CacheError, CacheResult};
use crate::lifecycle::{DatabaseLifecycle, LifecycleState, Prepared, ReloadReason, TransitionLog};
use crate::loader::BulkLoader;
use crate::metadata::PersistedMetadata;
use crate::ports::{ApplicationModel, RemoteSync};
use crate::queue::WriteQueue;
use mirrordb_core::{Collection, Record, RecordKey, SequenceNumber, StoreFactory};
use mirrordb_storage::MetadataBackend;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Why a session fetched everything from the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveFetchReason {
    /// Another session owns the store.
    LockDenied {
        /// Age of that session's heartbeat.
        age: Duration,
    },
    /// The store could not be opened or its metadata could not be read.
    StoreUnavailable(String),
    /// The store is empty and not tracking a remote position.
    EmptyStore,
    /// The session rebuilt the store too many times.
    RebuildLimit,
    /// Deleting the store failed or timed out.
    ReloadFailed(String),
}

impl fmt::Display for LiveFetchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveFetchReason::LockDenied { age } => {
                write!(f, "another session is active (heartbeat {}ms old)", age.as_millis())
            }
            LiveFetchReason::StoreUnavailable(reason) => write!(f, "store unavailable: {reason}"),
            LiveFetchReason::EmptyStore => f.write_str("store is empty"),
            LiveFetchReason::RebuildLimit => f.write_str("rebuild limit reached"),
            LiveFetchReason::ReloadFailed(reason) => write!(f, "rebuild failed: {reason}"),
        }
    }
}

/// How a session got the model populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPath {
    /// Loaded from the store, then caught up from the recorded marker.
    Hydrated {
        /// Records installed from the store.
        records: u64,
        /// Marker the catch-up started from.
        resumed_from: SequenceNumber,
    },
    /// The store needed no load; caught up from the recorded marker.
    CaughtUp {
        /// Marker the catch-up started from.
        resumed_from: SequenceNumber,
    },
    /// Fetched everything from the remote.
    LiveFetched {
        /// Why.
        reason: LiveFetchReason,
    },
}

/// Outcome of a session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Path taken.
    pub path: SessionPath,
    /// Rebuilds performed on the way.
    pub rebuilds: u32,
    /// Whether mutations are written to the store this session.
    pub store_active: bool,
    /// Remote position reached.
    pub sequence: SequenceNumber,
}

/// Completion signal for sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session started yet.
    Idle,
    /// A session is starting.
    Starting,
    /// The model is populated; mutations may be issued.
    Ready(SessionReport),
    /// The session failed (the remote could not be reached).
    Failed(String),
}

/// Keeps an account's local store in sync with the application model and
/// the remote.
///
/// # Example
///
/// ```rust,ignore
/// let engine = CacheEngine::new(
///     EngineConfig::new("alice"),
///     FileStoreFactory::new("/var/lib/app/stores"),
///     Arc::new(FileMetadata::open("/var/lib/app/metadata.json")?),
///     model,
///     remote,
/// );
/// let report = engine.start_session().await?;
/// engine.enqueue_put(Collection::Nodes, record)?;
/// ```
pub struct CacheEngine<F, M, R, C = SystemClock>
where
    F: StoreFactory,
    M: ApplicationModel,
    R: RemoteSync,
    C: Clock,
{
    config: EngineConfig,
    lifecycle: DatabaseLifecycle<F, C>,
    metadata: PersistedMetadata,
    queue: WriteQueue<F::Connection>,
    model: M,
    remote: R,
    transitions: TransitionLog,
    status: watch::Sender<SessionStatus>,
    store_active: AtomicBool,
    session: tokio::sync::Mutex<()>,
}

impl<F, M, R> CacheEngine<F, M, R, SystemClock>
where
    F: StoreFactory,
    M: ApplicationModel,
    R: RemoteSync,
{
    /// Creates an engine on the system clock.
    pub fn new(
        config: EngineConfig,
        factory: F,
        metadata: Arc<dyn MetadataBackend>,
        model: M,
        remote: R,
    ) -> Self {
        Self::with_clock(config, factory, metadata, model, remote, SystemClock)
    }
}

impl<F, M, R, C> CacheEngine<F, M, R, C>
where
    F: StoreFactory,
    M: ApplicationModel,
    R: RemoteSync,
    C: Clock,
{
    /// Creates an engine reading heartbeat time from `clock`.
    pub fn with_clock(
        config: EngineConfig,
        factory: F,
        metadata: Arc<dyn MetadataBackend>,
        model: M,
        remote: R,
        clock: C,
    ) -> Self {
        let metadata = PersistedMetadata::new(metadata, config.account.clone());
        let transitions = TransitionLog::new(&config.account);
        let lifecycle = DatabaseLifecycle::new(
            config.clone(),
            factory,
            metadata.clone(),
            Arc::new(clock),
            transitions.clone(),
        );
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            queue: WriteQueue::new(metadata.clone()),
            config,
            lifecycle,
            metadata,
            model,
            remote,
            transitions,
            status,
            store_active: AtomicBool::new(false),
            session: tokio::sync::Mutex::new(()),
        }
    }

    /// Runs the session lifecycle to completion.
    ///
    /// Store problems never surface here: they end in a live fetch or a
    /// rebuild, reported in the returned [`SessionReport`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] if the remote fetch fails.
    pub async fn start_session(&self) -> CacheResult<SessionReport> {
        let _session = self.session.lock().await;
        self.begin().await;
        let result = self.run(None).await;
        self.publish(&result);
        result
    }

    /// Deletes the store and all metadata, then runs the lifecycle again.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Remote`] if the remote fetch fails.
    pub async fn clear_and_rebuild(&self) -> CacheResult<SessionReport> {
        let _session = self.session.lock().await;
        self.begin().await;
        let result = self.run(Some(ReloadReason::Requested)).await;
        self.publish(&result);
        result
    }

    async fn begin(&self) {
        // Let an earlier session's writes land before its connection goes.
        self.queue.wait_idle().await;
        self.queue.reopen();
        self.lifecycle.close_connection();
        self.lifecycle.begin_session();
        self.store_active.store(false, Ordering::SeqCst);
        self.transitions.clear();
        self.status.send_replace(SessionStatus::Starting);
    }

    fn publish(&self, result: &CacheResult<SessionReport>) {
        let status = match result {
            Ok(report) => {
                tracing::info!(
                    account = %self.config.account,
                    path = ?report.path,
                    rebuilds = report.rebuilds,
                    store_active = report.store_active,
                    "session ready"
                );
                SessionStatus::Ready(report.clone())
            }
            Err(e) => {
                tracing::warn!(account = %self.config.account, error = %e, "session failed");
                SessionStatus::Failed(e.to_string())
            }
        };
        self.status.send_replace(status);
    }

    async fn run(&self, initial: Option<ReloadReason>) -> CacheResult<SessionReport> {
        let mut rebuilds = 0u32;
        let mut reload = initial;

        loop {
            if let Some(reason) = reload.take() {
                if rebuilds >= self.config.max_rebuilds {
                    tracing::warn!(
                        account = %self.config.account,
                        rebuilds,
                        reason = %reason,
                        "rebuild limit reached"
                    );
                    self.disable_store();
                    return self.live_fetch(LiveFetchReason::RebuildLimit, rebuilds).await;
                }
                rebuilds += 1;
                self.model.discard();
                self.queue.reset();
                self.store_active.store(false, Ordering::SeqCst);
                if let Err(e) = self.lifecycle.reload(&reason).await {
                    self.disable_store();
                    return self
                        .live_fetch(LiveFetchReason::ReloadFailed(e.to_string()), rebuilds)
                        .await;
                }
            }

            match self.lifecycle.prepare().await {
                Prepared::LockDenied { age } => {
                    self.disable_store();
                    return self.live_fetch(LiveFetchReason::LockDenied { age }, rebuilds).await;
                }
                Prepared::Unusable(e) => {
                    self.disable_store();
                    return self
                        .live_fetch(LiveFetchReason::StoreUnavailable(e.to_string()), rebuilds)
                        .await;
                }
                Prepared::Reload(reason) => reload = Some(reason),
                Prepared::LiveFetch { connection } => {
                    if let Err(e) = self
                        .metadata
                        .clear_pending()
                        .and_then(|()| self.activate(connection))
                    {
                        return self.fall_back(e, rebuilds).await;
                    }
                    return self.live_fetch(LiveFetchReason::EmptyStore, rebuilds).await;
                }
                Prepared::DirectFetch { connection, marker } => {
                    self.transitions.record(LifecycleState::DirectFetch);
                    if let Err(e) = self.activate(connection) {
                        return self.fall_back(e, rebuilds).await;
                    }
                    let sequence = self.catch_up(marker).await?;
                    return Ok(self.report(
                        SessionPath::CaughtUp {
                            resumed_from: marker,
                        },
                        rebuilds,
                        sequence,
                    ));
                }
                Prepared::BulkLoad { connection, marker } => {
                    self.transitions.record(LifecycleState::BulkLoad);
                    let loaded = BulkLoader::new(&connection, &self.model).load().await;
                    match loaded {
                        Ok(hydrated) if !self.model.is_empty() => {
                            tracing::info!(
                                account = %self.config.account,
                                records = hydrated.records,
                                share_keys = hydrated.share_keys,
                                "hydrated from local store"
                            );
                            if let Err(e) = self.activate(connection) {
                                self.model.discard();
                                return self.fall_back(e, rebuilds).await;
                            }
                            let sequence = self.catch_up(marker).await?;
                            return Ok(self.report(
                                SessionPath::Hydrated {
                                    records: hydrated.records,
                                    resumed_from: marker,
                                },
                                rebuilds,
                                sequence,
                            ));
                        }
                        Ok(_) => reload = Some(ReloadReason::NoResumePoint),
                        Err(reason) => reload = Some(reason),
                    }
                }
            }
        }
    }

    fn activate(&self, connection: F::Connection) -> CacheResult<()> {
        self.queue.attach(connection)?;
        self.store_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_store(&self) {
        self.queue.disable();
        self.lifecycle.close();
        self.store_active.store(false, Ordering::SeqCst);
    }

    async fn fall_back(&self, error: CacheError, rebuilds: u32) -> CacheResult<SessionReport> {
        tracing::warn!(account = %self.config.account, error = %error, "metadata unavailable");
        self.disable_store();
        self.live_fetch(LiveFetchReason::StoreUnavailable(error.to_string()), rebuilds)
            .await
    }

    async fn live_fetch(
        &self,
        reason: LiveFetchReason,
        rebuilds: u32,
    ) -> CacheResult<SessionReport> {
        self.transitions.record(LifecycleState::LiveFetch);
        tracing::info!(account = %self.config.account, reason = %reason, "fetching live");
        let sequence = self.remote.fetch_full_snapshot().await?;
        self.record_marker(sequence);
        Ok(self.report(SessionPath::LiveFetched { reason }, rebuilds, sequence))
    }

    async fn catch_up(&self, marker: SequenceNumber) -> CacheResult<SequenceNumber> {
        tracing::info!(account = %self.config.account, from = %marker, "catching up");
        let sequence = self.remote.fetch_since(marker).await?;
        self.record_marker(sequence);
        Ok(sequence)
    }

    fn record_marker(&self, marker: SequenceNumber) {
        if let Err(e) = self.set_sequence_marker(marker) {
            tracing::warn!(account = %self.config.account, error = %e, "failed to record sequence marker");
        }
    }

    fn report(&self, path: SessionPath, rebuilds: u32, sequence: SequenceNumber) -> SessionReport {
        SessionReport {
            path,
            rebuilds,
            store_active: self.is_store_active(),
            sequence,
        }
    }

    /// Queues a put. Dropped if the store is not used this session.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated.
    pub fn enqueue_put(&self, collection: Collection, record: Record) -> CacheResult<()> {
        self.queue.enqueue_put(collection, record)
    }

    /// Queues a delete. Dropped if the store is not used this session.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated.
    pub fn enqueue_delete(
        &self,
        collection: Collection,
        key: impl Into<RecordKey>,
    ) -> CacheResult<()> {
        self.queue.enqueue_delete(collection, key)
    }

    /// A handle to the write queue for collaborators that mutate the model.
    pub fn write_queue(&self) -> WriteQueue<F::Connection> {
        self.queue.clone()
    }

    /// Waits until every queued mutation has been committed or dropped.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Records a remote position reached outside a session start. Ignored
    /// (returns `false`) while the store is not in use.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata backend fails.
    pub fn set_sequence_marker(&self, marker: SequenceNumber) -> CacheResult<bool> {
        if !self.is_store_active() {
            return Ok(false);
        }
        self.metadata.set_sequence_marker(marker)?;
        Ok(true)
    }

    /// Subscribes to the completion signal.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// States visited by the most recent session, in order.
    pub fn transitions(&self) -> Vec<LifecycleState> {
        self.transitions.states()
    }

    /// Returns true if mutations are being written to the store.
    pub fn is_store_active(&self) -> bool {
        self.store_active.load(Ordering::SeqCst)
    }

    /// This session's heartbeat token.
    pub fn lock_token(&self) -> Uuid {
        self.lifecycle.lock().token()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Typed access to the account's metadata.
    pub fn metadata(&self) -> &PersistedMetadata {
        &self.metadata
    }

    /// The store factory.
    pub fn factory(&self) -> &F {
        self.lifecycle.factory()
    }

    /// The application model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The remote collaborator.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Ends the session: stops the heartbeat, drops queued mutations and
    /// closes the connection. Call [`Self::wait_idle`] first to let queued
    /// mutations land.
    pub fn close(&self) {
        self.disable_store();
        tracing::debug!(account = %self.config.account, "engine closed");
    }
}

impl<F, M, R, C> fmt::Debug for CacheEngine<F, M, R, C>
where
    F: StoreFactory,
    M: ApplicationModel,
    R: RemoteSync,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEngine")
            .field("account", &self.config.account)
            .field("status", &self.status())
            .field("store_active", &self.is_store_active())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
