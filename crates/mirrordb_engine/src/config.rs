//! Configuration for the cache engine.

use std::time::Duration;

/// Store version the engine requires by default.
pub const DEFAULT_SCHEMA_VERSION: u32 = 6;

/// Configuration for a [`crate::CacheEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Account the cache belongs to. Scopes the store name and every
    /// metadata key.
    pub account: String,
    /// Store version this build requires.
    pub schema_version: u32,
    /// Deadline for opening the store.
    pub open_timeout: Duration,
    /// Deadline for deleting the store during a rebuild.
    pub delete_timeout: Duration,
    /// How often the active session refreshes its heartbeat.
    pub heartbeat_interval: Duration,
    /// A heartbeat younger than this belongs to a live session.
    pub heartbeat_staleness: Duration,
    /// Rebuilds allowed in one session before giving up on the store.
    pub max_rebuilds: u32,
    /// Prefix of the store name (the account id is appended).
    pub store_prefix: String,
}

impl EngineConfig {
    /// Creates a configuration for `account` with default settings.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            schema_version: DEFAULT_SCHEMA_VERSION,
            open_timeout: Duration::from_millis(2000),
            delete_timeout: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(500),
            heartbeat_staleness: Duration::from_millis(1000),
            max_rebuilds: 3,
            store_prefix: "mirror_".to_string(),
        }
    }

    /// Sets the required store version.
    #[must_use]
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the open deadline.
    #[must_use]
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Sets the delete deadline.
    #[must_use]
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Sets the heartbeat refresh interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the heartbeat staleness threshold.
    #[must_use]
    pub fn with_heartbeat_staleness(mut self, staleness: Duration) -> Self {
        self.heartbeat_staleness = staleness;
        self
    }

    /// Sets the rebuild limit.
    #[must_use]
    pub fn with_max_rebuilds(mut self, max: u32) -> Self {
        self.max_rebuilds = max;
        self
    }

    /// Sets the store name prefix.
    #[must_use]
    pub fn with_store_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.store_prefix = prefix.into();
        self
    }

    /// Name of the account's store.
    pub fn store_name(&self) -> String {
        format!("{}{}", self.store_prefix, self.account)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("")
    }
}
