//! File-backed store.
//!
//! Every store is a directory holding a JSON manifest, a lock file and one
//! append-only log per collection (see [`dir`] and [`log`] for the layouts).
//! Connections hold a shared lock on the store's LOCK file for as long as
//! they are open; upgrading or deleting a store takes the exclusive lock and
//! therefore reports `Blocked` while any other connection, in this process
//! or another, is still open.
//!
//! Opening and deleting run on the blocking thread pool. Individual writes
//! are small appends and run inline.

mod config;
mod dir;
mod log;

pub use config::FileStoreConfig;

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::schema::Schema;
use crate::store::{
    CursorItem, OpenRequest, OpenedStore, RecordCursor, StoreConnection, StoreFactory,
    WriteTransaction,
};
use crate::types::{Collection, RecordKey};
use dir::{Manifest, StoreDir};
use fs2::FileExt;
use log::{CollectionLog, Slot};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opens and deletes stores under a root directory.
///
/// # Example
///
/// ```rust,no_run
/// use mirrordb_core::{FileStoreConfig, FileStoreFactory};
///
/// let factory = FileStoreFactory::with_config(
///     "/var/lib/mirrordb/stores",
///     FileStoreConfig::new().sync_on_commit(false),
/// );
/// assert!(!factory.exists("mirror_alice"));
/// ```
#[derive(Debug, Clone)]
pub struct FileStoreFactory {
    root: PathBuf,
    config: FileStoreConfig,
}

impl FileStoreFactory {
    /// Creates a factory with the default configuration.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, FileStoreConfig::default())
    }

    /// Creates a factory with a custom configuration.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: FileStoreConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory a store lives in.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid store name.
    pub fn store_path(&self, name: &str) -> StoreResult<PathBuf> {
        Ok(StoreDir::new(&self.root, name)?.path().to_path_buf())
    }

    /// Returns true if a store named `name` has been created.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        StoreDir::new(&self.root, name)
            .and_then(|dir| dir.load_manifest())
            .is_ok_and(|manifest| manifest.is_some())
    }

    /// Returns the version a store was created at, without opening it.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the manifest is unreadable.
    pub fn version(&self, name: &str) -> StoreResult<Option<u32>> {
        Ok(StoreDir::new(&self.root, name)?
            .load_manifest()?
            .map(|manifest| manifest.version))
    }

    /// Lists the stores under the root, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be read.
    pub fn store_names(&self) -> StoreResult<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if self.exists(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_blocking(&self, request: &OpenRequest) -> StoreResult<OpenedStore<FileConnection>> {
        let dir = StoreDir::new(&self.root, &request.name)?;
        if !dir.exists() {
            if !self.config.create_if_missing {
                return Err(StoreError::NotFound {
                    name: request.name.clone(),
                });
            }
            dir.create()?;
        }

        let lock = dir.open_lock()?;
        FileExt::try_lock_shared(&lock).map_err(|_| StoreError::blocked(&request.name))?;

        let manifest = dir.load_manifest()?;
        let existing = manifest.as_ref().map(|m| m.version);

        let (schema, upgraded_from) = match manifest {
            Some(m) if m.version == request.version => (m.schema, None),
            Some(m) if m.version > request.version => {
                return Err(StoreError::VersionTooLow {
                    requested: request.version,
                    existing: m.version,
                });
            }
            _ if !self.config.create_if_missing && existing.is_none() => {
                return Err(StoreError::NotFound {
                    name: request.name.clone(),
                });
            }
            _ => {
                FileExt::try_lock_exclusive(&lock)
                    .map_err(|_| StoreError::blocked(&request.name))?;
                let removed = dir.remove_logs()?;
                dir.save_manifest(&Manifest {
                    version: request.version,
                    schema: request.schema.clone(),
                })?;
                FileExt::lock_shared(&lock)?;
                tracing::info!(
                    store = %request.name,
                    from = existing.unwrap_or(0),
                    to = request.version,
                    dropped_logs = removed,
                    "upgraded store"
                );
                (request.schema.clone(), Some(existing.unwrap_or(0)))
            }
        };

        let mut logs = BTreeMap::new();
        for spec in schema.collections() {
            let log = CollectionLog::open(&dir.log_path(spec.collection), self.config.sync_on_commit)?;
            tracing::trace!(path = %log.path().display(), records = log.len(), "replayed log");
            logs.insert(spec.collection, log);
        }

        Ok(OpenedStore {
            connection: FileConnection {
                inner: Arc::new(FileInner {
                    name: request.name.clone(),
                    version: request.version,
                    schema,
                    logs: Mutex::new(logs),
                    lock: Mutex::new(Some(lock)),
                }),
            },
            upgraded_from,
        })
    }

    fn delete_blocking(&self, name: &str) -> StoreResult<()> {
        let dir = StoreDir::new(&self.root, name)?;
        if !dir.exists() {
            return Ok(());
        }

        let lock = dir.open_lock()?;
        FileExt::try_lock_exclusive(&lock).map_err(|_| StoreError::blocked(name))?;
        fs::remove_dir_all(dir.path())?;
        drop(lock);

        tracing::info!(store = %name, "deleted store");
        Ok(())
    }
}

impl StoreFactory for FileStoreFactory {
    type Connection = FileConnection;

    async fn open(&self, request: OpenRequest) -> StoreResult<OpenedStore<FileConnection>> {
        let factory = self.clone();
        tokio::task::spawn_blocking(move || factory.open_blocking(&request))
            .await
            .map_err(|e| StoreError::unavailable(format!("open task failed: {e}")))?
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let factory = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || factory.delete_blocking(&name))
            .await
            .map_err(|e| StoreError::unavailable(format!("delete task failed: {e}")))?
    }
}

struct FileInner {
    name: String,
    version: u32,
    schema: Schema,
    logs: Mutex<BTreeMap<Collection, CollectionLog>>,
    /// The LOCK file while the connection is open; dropping it releases the
    /// shared lock.
    lock: Mutex<Option<File>>,
}

/// A connection to a file-backed store.
#[derive(Clone)]
pub struct FileConnection {
    inner: Arc<FileInner>,
}

impl std::fmt::Debug for FileConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConnection")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl FileConnection {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn unknown(collection: Collection) -> StoreError {
        StoreError::UnknownCollection {
            name: collection.name().to_string(),
        }
    }
}

impl StoreConnection for FileConnection {
    type Transaction = FileTransaction;
    type Cursor = FileCursor;

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn version(&self) -> u32 {
        self.inner.version
    }

    fn begin_write(&self, collection: Collection) -> StoreResult<FileTransaction> {
        self.ensure_open()?;
        let key_field = self
            .inner
            .schema
            .key_field(collection)
            .ok_or_else(|| Self::unknown(collection))?
            .to_string();
        Ok(FileTransaction {
            connection: self.clone(),
            collection,
            key_field,
        })
    }

    async fn open_cursor(&self, collection: Collection) -> StoreResult<FileCursor> {
        self.ensure_open()?;
        let logs = self.inner.logs.lock();
        let log = logs.get(&collection).ok_or_else(|| Self::unknown(collection))?;
        Ok(FileCursor {
            connection: self.clone(),
            pending: log.snapshot().into(),
        })
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        self.ensure_open()?;
        let logs = self.inner.logs.lock();
        logs.get(&collection)
            .map(|log| log.len() as u64)
            .ok_or_else(|| Self::unknown(collection))
    }

    fn close(&self) {
        if self.inner.lock.lock().take().is_some() {
            tracing::debug!(store = %self.inner.name, "closed connection");
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.lock.lock().is_none()
    }
}

/// A write transaction on a file-backed store.
pub struct FileTransaction {
    connection: FileConnection,
    collection: Collection,
    key_field: String,
}

impl std::fmt::Debug for FileTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransaction")
            .field("store", &self.connection.inner.name)
            .field("collection", &self.collection)
            .finish()
    }
}

impl FileTransaction {
    fn with_log<T>(&self, f: impl FnOnce(&mut CollectionLog) -> StoreResult<T>) -> StoreResult<T> {
        self.connection.ensure_open()?;
        let mut logs = self.connection.inner.logs.lock();
        let log = logs
            .get_mut(&self.collection)
            .ok_or_else(|| FileConnection::unknown(self.collection))?;
        f(log)
    }
}

impl WriteTransaction for FileTransaction {
    fn collection(&self) -> Collection {
        self.collection
    }

    async fn put(&mut self, record: Record) -> StoreResult<()> {
        let key = record
            .key(&self.key_field)
            .ok_or_else(|| StoreError::MissingKey {
                collection: self.collection,
                key_field: self.key_field.clone(),
            })?;
        let bytes = record.encode()?;
        self.with_log(|log| log.put(&key, bytes))
    }

    async fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.with_log(|log| log.delete(key))
    }
}

/// A cursor over a snapshot of one collection of a file-backed store.
pub struct FileCursor {
    connection: FileConnection,
    pending: VecDeque<(RecordKey, Slot)>,
}

impl std::fmt::Debug for FileCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCursor")
            .field("store", &self.connection.inner.name)
            .field("remaining", &self.pending.len())
            .finish()
    }
}

impl RecordCursor for FileCursor {
    async fn advance(&mut self) -> StoreResult<Option<CursorItem>> {
        self.connection.ensure_open()?;
        let Some((key, slot)) = self.pending.pop_front() else {
            return Ok(None);
        };
        let item = match slot {
            Slot::Value(bytes) => match Record::decode(&bytes) {
                Ok(record) => CursorItem::Record(record),
                Err(e) => CursorItem::Unreadable {
                    key,
                    reason: e.to_string(),
                },
            },
            Slot::Damaged(reason) => CursorItem::Unreadable { key, reason },
        };
        Ok(Some(item))
    }
}
