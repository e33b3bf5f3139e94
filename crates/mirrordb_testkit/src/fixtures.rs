//! Record fixtures and seeding helpers.

use crate::clock::ManualClock;
use crate::model::RecordingModel;
use crate::remote::ScriptedRemote;
use mirrordb_core::{
    Collection, MemoryStoreFactory, OpenRequest, Record, StoreConnection, StoreFactory,
    StoreResult, WriteTransaction,
};
use mirrordb_engine::{CacheEngine, CacheResult, EngineConfig, PersistedMetadata};
use mirrordb_storage::{InMemoryMetadata, MetadataBackend};
use std::sync::Arc;

/// Account used by fixtures.
pub const TEST_ACCOUNT: &str = "acct";

/// An engine wired to test doubles.
pub type TestEngine<F = MemoryStoreFactory> =
    CacheEngine<F, RecordingModel, ScriptedRemote, ManualClock>;

/// A node record.
pub fn node(handle: &str, parent: &str) -> Record {
    Record::new()
        .with("h", handle)
        .with("p", parent)
        .with("t", 0)
}

/// A node record carrying a share key.
pub fn shared_node(handle: &str, parent: &str, share_key: &str) -> Record {
    node(handle, parent).with("sk", share_key)
}

/// A user record.
pub fn user(handle: &str, email: &str) -> Record {
    Record::new().with("u", handle).with("m", email)
}

/// A share record for `node` granted to `user`.
pub fn share(node: &str, user: &str) -> Record {
    Record::new()
        .with("h_u", format!("{node}_{user}"))
        .with("h", node)
        .with("u", user)
        .with("r", 0)
}

/// An outgoing key record.
pub fn outgoing_key(handle: &str) -> Record {
    Record::new().with("h", handle).with("k", format!("key-{handle}"))
}

/// Writes `records` into the named store, creating it at `version`, then
/// closes the connection.
///
/// # Errors
///
/// Propagates open and commit failures.
pub async fn seed_store<F: StoreFactory>(
    factory: &F,
    name: &str,
    version: u32,
    records: &[(Collection, Record)],
) -> StoreResult<()> {
    let connection = factory
        .open(OpenRequest::new(name, version))
        .await?
        .connection;
    for (collection, record) in records {
        let mut tx = connection.begin_write(*collection)?;
        tx.put(record.clone()).await?;
    }
    connection.close();
    Ok(())
}

/// Writes the pending counter, schema version and sequence marker for
/// `account` the way a cleanly finished session leaves them.
///
/// # Errors
///
/// Propagates backend failures.
pub fn seed_metadata(
    backend: Arc<dyn MetadataBackend>,
    account: &str,
    pending: Option<u64>,
    version: Option<u32>,
    marker: Option<u64>,
) -> CacheResult<PersistedMetadata> {
    let metadata = PersistedMetadata::new(backend, account);
    if let Some(pending) = pending {
        metadata.clear_pending()?;
        for _ in 0..pending {
            metadata.increment_pending()?;
        }
    }
    if let Some(version) = version {
        metadata.set_schema_version(version)?;
    }
    if let Some(marker) = marker {
        metadata.set_sequence_marker(mirrordb_core::SequenceNumber::new(marker))?;
    }
    Ok(metadata)
}

/// Shared doubles for one simulated account.
///
/// Engines built from the same environment share the store, metadata,
/// clock, model and remote, which models two sessions of one account.
#[derive(Debug, Clone)]
pub struct TestEnv<F = MemoryStoreFactory> {
    /// Store factory.
    pub factory: F,
    /// Metadata backend.
    pub backend: Arc<InMemoryMetadata>,
    /// Clock.
    pub clock: ManualClock,
    /// Application model.
    pub model: RecordingModel,
    /// Remote.
    pub remote: ScriptedRemote,
    /// Engine configuration.
    pub config: EngineConfig,
}

impl TestEnv<MemoryStoreFactory> {
    /// An environment over an in-memory store.
    pub fn new() -> Self {
        Self::with_factory(MemoryStoreFactory::new())
    }
}

impl Default for TestEnv<MemoryStoreFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StoreFactory + Clone> TestEnv<F> {
    /// An environment over `factory`.
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            backend: Arc::new(InMemoryMetadata::new()),
            clock: ManualClock::new(1_000_000),
            model: RecordingModel::new(),
            remote: ScriptedRemote::new(100),
            config: EngineConfig::new(TEST_ACCOUNT),
        }
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Metadata view for the environment's account.
    pub fn metadata(&self) -> PersistedMetadata {
        PersistedMetadata::new(self.backend.clone(), &self.config.account)
    }

    /// Name of the account's store.
    pub fn store_name(&self) -> String {
        self.config.store_name()
    }

    /// Builds an engine over the shared doubles.
    pub fn engine(&self) -> TestEngine<F> {
        self.engine_with_model(self.model.clone())
    }

    /// Builds an engine with its own model, sharing everything else.
    pub fn engine_with_model(&self, model: RecordingModel) -> TestEngine<F> {
        CacheEngine::with_clock(
            self.config.clone(),
            self.factory.clone(),
            self.backend.clone(),
            model,
            self.remote.clone(),
            self.clock.clone(),
        )
    }
}
