//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::record::Record;
use crate::schema::Schema;
use crate::store::{
    CursorItem, OpenRequest, OpenedStore, RecordCursor, StoreConnection, StoreFactory,
    WriteTransaction,
};
use crate::types::{Collection, RecordKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

type CollectionMap = BTreeMap<RecordKey, Vec<u8>>;

struct MemoryDb {
    name: String,
    version: u32,
    schema: Schema,
    collections: RwLock<BTreeMap<Collection, CollectionMap>>,
    open_connections: AtomicUsize,
    deleted: AtomicBool,
}

impl MemoryDb {
    fn create(request: &OpenRequest) -> Self {
        let collections = request
            .schema
            .collections()
            .iter()
            .map(|spec| (spec.collection, CollectionMap::new()))
            .collect();
        Self {
            name: request.name.clone(),
            version: request.version,
            schema: request.schema.clone(),
            collections: RwLock::new(collections),
            open_connections: AtomicUsize::new(0),
            deleted: AtomicBool::new(false),
        }
    }
}

/// A store factory that keeps every store in memory.
///
/// Clones share the same set of stores, so a test can "restart" by building
/// a new engine on a clone of the factory and find the previous session's
/// data still there.
///
/// Upgrade and delete follow the same blocking rules as the file store: they
/// fail with `Blocked` while another connection to the store is open.
///
/// # Example
///
/// ```rust
/// use mirrordb_core::{Collection, MemoryStoreFactory, OpenRequest, Record, StoreConnection,
///     StoreFactory, WriteTransaction};
///
/// # tokio_test_block_on(async {
/// let factory = MemoryStoreFactory::new();
/// let opened = factory.open(OpenRequest::new("mirror_alice", 6)).await.unwrap();
/// assert_eq!(opened.upgraded_from, Some(0));
///
/// let mut txn = opened.connection.begin_write(Collection::Users).unwrap();
/// txn.put(Record::new().with("u", "bob")).await.unwrap();
/// assert_eq!(opened.connection.count(Collection::Users).await.unwrap(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryStoreFactory {
    stores: Arc<Mutex<HashMap<String, Arc<MemoryDb>>>>,
}

impl std::fmt::Debug for MemoryStoreFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.stores.lock().keys().cloned().collect();
        f.debug_struct("MemoryStoreFactory")
            .field("stores", &names)
            .finish()
    }
}

impl MemoryStoreFactory {
    /// Creates a factory with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn db(&self, name: &str) -> StoreResult<Arc<MemoryDb>> {
        self.stores
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    /// Returns true if a store with this name exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.stores.lock().contains_key(name)
    }

    /// Returns the version of the named store.
    #[must_use]
    pub fn version(&self, name: &str) -> Option<u32> {
        self.stores.lock().get(name).map(|db| db.version)
    }

    /// Returns how many connections to the named store are open.
    #[must_use]
    pub fn open_connections(&self, name: &str) -> usize {
        self.stores
            .lock()
            .get(name)
            .map_or(0, |db| db.open_connections.load(Ordering::SeqCst))
    }

    /// Writes raw bytes as the value of `key`, bypassing encoding.
    ///
    /// Useful for testing how readers cope with damaged values.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or collection does not exist.
    pub fn insert_raw(
        &self,
        name: &str,
        collection: Collection,
        key: impl Into<RecordKey>,
        bytes: Vec<u8>,
    ) -> StoreResult<()> {
        let db = self.db(name)?;
        let mut collections = db.collections.write();
        let map = collections
            .get_mut(&collection)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: collection.name().to_string(),
            })?;
        map.insert(key.into(), bytes);
        Ok(())
    }

    /// Returns every decodable record of a collection, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or collection does not exist.
    pub fn records(&self, name: &str, collection: Collection) -> StoreResult<Vec<Record>> {
        let db = self.db(name)?;
        let collections = db.collections.read();
        let map = collections
            .get(&collection)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: collection.name().to_string(),
            })?;
        Ok(map
            .values()
            .filter_map(|bytes| Record::decode(bytes).ok())
            .collect())
    }
}

impl StoreFactory for MemoryStoreFactory {
    type Connection = MemoryConnection;

    async fn open(&self, request: OpenRequest) -> StoreResult<OpenedStore<MemoryConnection>> {
        tokio::task::yield_now().await;

        let mut stores = self.stores.lock();
        let existing = stores.get(&request.name).cloned();
        let (db, upgraded_from) = match existing {
            Some(db) if db.version == request.version => (db, None),
            Some(db) if db.version > request.version => {
                return Err(StoreError::VersionTooLow {
                    requested: request.version,
                    existing: db.version,
                });
            }
            Some(db) => {
                if db.open_connections.load(Ordering::SeqCst) > 0 {
                    return Err(StoreError::blocked(request.name));
                }
                db.deleted.store(true, Ordering::SeqCst);
                let fresh = Arc::new(MemoryDb::create(&request));
                stores.insert(request.name.clone(), Arc::clone(&fresh));
                (fresh, Some(db.version))
            }
            None => {
                let fresh = Arc::new(MemoryDb::create(&request));
                stores.insert(request.name.clone(), Arc::clone(&fresh));
                (fresh, Some(0))
            }
        };

        db.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(OpenedStore {
            connection: MemoryConnection {
                db,
                closed: Arc::new(AtomicBool::new(false)),
            },
            upgraded_from,
        })
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;

        let mut stores = self.stores.lock();
        if let Some(db) = stores.get(name) {
            if db.open_connections.load(Ordering::SeqCst) > 0 {
                return Err(StoreError::blocked(name));
            }
            db.deleted.store(true, Ordering::SeqCst);
            stores.remove(name);
        }
        Ok(())
    }
}

/// A connection to an in-memory store.
#[derive(Clone)]
pub struct MemoryConnection {
    db: Arc<MemoryDb>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("name", &self.db.name)
            .field("version", &self.db.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryConnection {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn key_field(&self, collection: Collection) -> StoreResult<String> {
        self.db
            .schema
            .key_field(collection)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: collection.name().to_string(),
            })
    }
}

impl StoreConnection for MemoryConnection {
    type Transaction = MemoryTransaction;
    type Cursor = MemoryCursor;

    fn name(&self) -> &str {
        &self.db.name
    }

    fn version(&self) -> u32 {
        self.db.version
    }

    fn begin_write(&self, collection: Collection) -> StoreResult<MemoryTransaction> {
        self.ensure_open()?;
        let key_field = self.key_field(collection)?;
        Ok(MemoryTransaction {
            connection: self.clone(),
            collection,
            key_field,
        })
    }

    async fn open_cursor(&self, collection: Collection) -> StoreResult<MemoryCursor> {
        self.ensure_open()?;
        let collections = self.db.collections.read();
        let map = collections
            .get(&collection)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: collection.name().to_string(),
            })?;
        let pending = map
            .iter()
            .map(|(key, bytes)| (key.clone(), bytes.clone()))
            .collect();
        Ok(MemoryCursor {
            connection: self.clone(),
            pending,
        })
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        self.ensure_open()?;
        let collections = self.db.collections.read();
        collections
            .get(&collection)
            .map(|map| map.len() as u64)
            .ok_or_else(|| StoreError::UnknownCollection {
                name: collection.name().to_string(),
            })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.db.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.db.deleted.load(Ordering::SeqCst)
    }
}

/// A write transaction on an in-memory store.
#[derive(Debug)]
pub struct MemoryTransaction {
    connection: MemoryConnection,
    collection: Collection,
    key_field: String,
}

impl WriteTransaction for MemoryTransaction {
    fn collection(&self) -> Collection {
        self.collection
    }

    async fn put(&mut self, record: Record) -> StoreResult<()> {
        // Commits are a suspension point, as with a real store.
        tokio::task::yield_now().await;
        self.connection.ensure_open()?;

        let key = record
            .key(&self.key_field)
            .ok_or_else(|| StoreError::MissingKey {
                collection: self.collection,
                key_field: self.key_field.clone(),
            })?;
        let bytes = record.encode()?;

        let mut collections = self.connection.db.collections.write();
        if let Some(map) = collections.get_mut(&self.collection) {
            map.insert(key, bytes);
        }
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.connection.ensure_open()?;

        let mut collections = self.connection.db.collections.write();
        if let Some(map) = collections.get_mut(&self.collection) {
            map.remove(key);
        }
        Ok(())
    }
}

/// A cursor over a snapshot of an in-memory collection.
#[derive(Debug)]
pub struct MemoryCursor {
    connection: MemoryConnection,
    pending: VecDeque<(RecordKey, Vec<u8>)>,
}

impl RecordCursor for MemoryCursor {
    async fn advance(&mut self) -> StoreResult<Option<CursorItem>> {
        self.connection.ensure_open()?;
        Ok(self.pending.pop_front().map(|(key, bytes)| {
            match Record::decode(&bytes) {
                Ok(record) => CursorItem::Record(record),
                Err(e) => CursorItem::Unreadable {
                    key,
                    reason: e.to_string(),
                },
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(u: &str) -> Record {
        Record::new().with("u", u).with("c", 1)
    }

    async fn drain(cursor: &mut MemoryCursor) -> Vec<CursorItem> {
        let mut items = Vec::new();
        while let Some(item) = cursor.advance().await.unwrap() {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn open_creates_all_collections() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        assert_eq!(opened.upgraded_from, Some(0));
        for collection in Collection::ALL {
            assert_eq!(opened.connection.count(collection).await.unwrap(), 0);
        }
        assert_eq!(factory.version("s"), Some(6));
    }

    #[tokio::test]
    async fn reopen_same_version_keeps_data() {
        let factory = MemoryStoreFactory::new();
        let first = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let mut txn = first.connection.begin_write(Collection::Users).unwrap();
        txn.put(user("a")).await.unwrap();
        first.connection.close();

        let second = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        assert_eq!(second.upgraded_from, None);
        assert_eq!(second.connection.count(Collection::Users).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upgrade_drops_data() {
        let factory = MemoryStoreFactory::new();
        let first = factory.open(OpenRequest::new("s", 5)).await.unwrap();
        let mut txn = first.connection.begin_write(Collection::Users).unwrap();
        txn.put(user("a")).await.unwrap();
        first.connection.close();

        let second = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        assert_eq!(second.upgraded_from, Some(5));
        assert_eq!(second.connection.count(Collection::Users).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upgrade_blocked_by_open_connection() {
        let factory = MemoryStoreFactory::new();
        let _first = factory.open(OpenRequest::new("s", 5)).await.unwrap();
        let result = factory.open(OpenRequest::new("s", 6)).await;
        assert!(matches!(result, Err(StoreError::Blocked { .. })));
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let factory = MemoryStoreFactory::new();
        factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let result = factory.open(OpenRequest::new("s", 5)).await;
        assert!(matches!(
            result,
            Err(StoreError::VersionTooLow {
                requested: 5,
                existing: 6
            })
        ));
    }

    #[tokio::test]
    async fn put_requires_key_field() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let mut txn = opened.connection.begin_write(Collection::Shares).unwrap();
        let result = txn.put(Record::new().with("h", "n1")).await;
        assert!(matches!(result, Err(StoreError::MissingKey { .. })));
    }

    #[tokio::test]
    async fn put_replaces_and_delete_removes() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let mut txn = opened.connection.begin_write(Collection::Users).unwrap();
        txn.put(user("a")).await.unwrap();
        txn.put(Record::new().with("u", "a").with("c", 2)).await.unwrap();
        txn.put(user("b")).await.unwrap();
        txn.delete("b").await.unwrap();
        txn.delete("never-existed").await.unwrap();

        let records = factory.records("s", Collection::Users).unwrap();
        assert_eq!(records, vec![Record::new().with("u", "a").with("c", 2)]);
    }

    #[tokio::test]
    async fn cursor_reports_unreadable_values_and_continues() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let mut txn = opened.connection.begin_write(Collection::Users).unwrap();
        txn.put(user("a")).await.unwrap();
        txn.put(user("c")).await.unwrap();
        factory
            .insert_raw("s", Collection::Users, "b", vec![0xff, 0xfe])
            .unwrap();

        let mut cursor = opened.connection.open_cursor(Collection::Users).await.unwrap();
        let items = drain(&mut cursor).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], CursorItem::Record(user("a")));
        assert!(matches!(&items[1], CursorItem::Unreadable { key, .. } if key == "b"));
        assert_eq!(items[2], CursorItem::Record(user("c")));
    }

    #[tokio::test]
    async fn closed_connection_rejects_operations() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        let connection = opened.connection.clone();
        opened.connection.close();
        opened.connection.close();

        assert!(connection.is_closed());
        assert!(matches!(
            connection.begin_write(Collection::Nodes),
            Err(StoreError::Closed)
        ));
        assert_eq!(factory.open_connections("s"), 0);
    }

    #[tokio::test]
    async fn delete_blocked_until_closed() {
        let factory = MemoryStoreFactory::new();
        let opened = factory.open(OpenRequest::new("s", 6)).await.unwrap();
        assert!(matches!(
            factory.delete("s").await,
            Err(StoreError::Blocked { .. })
        ));

        opened.connection.close();
        factory.delete("s").await.unwrap();
        assert!(!factory.exists("s"));
        factory.delete("s").await.unwrap();
    }
}
