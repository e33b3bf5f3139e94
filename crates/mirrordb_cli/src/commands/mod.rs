//! CLI command implementations.

pub mod inspect;
pub mod reset;
pub mod verify;

use mirrordb_core::{FileStoreConfig, FileStoreFactory, OpenRequest, StoreFactory};
use mirrordb_engine::{EngineConfig, PersistedMetadata};
use mirrordb_storage::FileMetadata;
use std::path::Path;
use std::sync::Arc;

/// Metadata file name under the cache root.
pub const METADATA_FILE: &str = "metadata.json";

/// Store directory under the cache root.
pub const STORES_DIR: &str = "stores";

/// One account's cache under a root directory.
pub struct Target {
    /// Engine configuration for the account (store naming, required version).
    pub config: EngineConfig,
    /// Stores directory, never creating stores.
    pub factory: FileStoreFactory,
    /// The account's metadata.
    pub metadata: PersistedMetadata,
}

impl Target {
    /// Opens the cache of `account` under `root`.
    pub fn open(root: &Path, account: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if !root.is_dir() {
            return Err(format!("No cache found at {:?}", root).into());
        }
        let backend = FileMetadata::open(&root.join(METADATA_FILE))?;
        let factory = FileStoreFactory::with_config(
            root.join(STORES_DIR),
            FileStoreConfig::new().create_if_missing(false),
        );
        Ok(Self {
            config: EngineConfig::new(account),
            factory,
            metadata: PersistedMetadata::new(Arc::new(backend), account),
        })
    }

    /// Name of the account's store.
    pub fn store_name(&self) -> String {
        self.config.store_name()
    }

    /// Opens the store at the version it was created with, so nothing is
    /// upgraded. Returns `None` if the store does not exist.
    pub async fn open_store(
        &self,
    ) -> Result<Option<mirrordb_core::FileConnection>, Box<dyn std::error::Error>> {
        let name = self.store_name();
        let Some(version) = self.factory.version(&name)? else {
            return Ok(None);
        };
        let opened = self.factory.open(OpenRequest::new(name, version)).await?;
        Ok(Some(opened.connection))
    }
}
