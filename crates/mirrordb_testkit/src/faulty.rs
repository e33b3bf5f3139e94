//! Fault injection around a real store factory.
//!
//! [`FaultyStoreFactory`] wraps any [`StoreFactory`] and lets a test make
//! opens hang or fail, deletes hang, and commits fail, without touching the
//! wrapped store's data.

use mirrordb_core::{
    Collection, OpenRequest, OpenedStore, Record, StoreConnection, StoreError, StoreFactory,
    StoreResult, WriteTransaction,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A fault to inject into `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFault {
    /// Never resolve.
    Hang,
    /// Fail with `Unavailable`.
    Unavailable,
    /// Fail with `Blocked`.
    Blocked,
    /// Fail with `Corrupted`.
    Corrupted,
}

impl OpenFault {
    fn into_error(self, name: &str) -> StoreError {
        match self {
            OpenFault::Hang | OpenFault::Unavailable => {
                StoreError::unavailable("injected open failure")
            }
            OpenFault::Blocked => StoreError::blocked(name),
            OpenFault::Corrupted => StoreError::corrupted("injected corruption"),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    next_opens: VecDeque<OpenFault>,
    every_open: Option<OpenFault>,
    hang_deletes: bool,
    failing_commits: u32,
    opens: usize,
    deletes: usize,
    commits: usize,
}

/// A store factory that injects faults into the one it wraps.
///
/// Clones share the fault script and counters.
#[derive(Debug, Clone)]
pub struct FaultyStoreFactory<F> {
    inner: F,
    faults: Arc<Mutex<Faults>>,
}

impl<F: StoreFactory> FaultyStoreFactory<F> {
    /// Wraps `inner` with no faults scripted.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// The wrapped factory.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    /// Queues a fault for the next open. Queued faults apply in order, one
    /// per open.
    pub fn fail_next_open(&self, fault: OpenFault) {
        self.faults.lock().next_opens.push_back(fault);
    }

    /// Applies `fault` to every open until cleared.
    pub fn fail_every_open(&self, fault: OpenFault) {
        self.faults.lock().every_open = Some(fault);
    }

    /// Makes deletes never resolve.
    pub fn hang_deletes(&self, hang: bool) {
        self.faults.lock().hang_deletes = hang;
    }

    /// Fails the next `count` commits.
    pub fn fail_next_commits(&self, count: u32) {
        self.faults.lock().failing_commits = count;
    }

    /// Removes every scripted fault.
    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.next_opens.clear();
        faults.every_open = None;
        faults.hang_deletes = false;
        faults.failing_commits = 0;
    }

    /// Number of open calls so far.
    pub fn opens(&self) -> usize {
        self.faults.lock().opens
    }

    /// Number of delete calls so far.
    pub fn deletes(&self) -> usize {
        self.faults.lock().deletes
    }

    /// Number of put/delete commits attempted so far.
    pub fn commits(&self) -> usize {
        self.faults.lock().commits
    }
}

impl<F: StoreFactory> StoreFactory for FaultyStoreFactory<F> {
    type Connection = FaultyConnection<F::Connection>;

    async fn open(&self, request: OpenRequest) -> StoreResult<OpenedStore<Self::Connection>> {
        let fault = {
            let mut faults = self.faults.lock();
            faults.opens += 1;
            faults.next_opens.pop_front().or(faults.every_open)
        };
        match fault {
            Some(OpenFault::Hang) => std::future::pending().await,
            Some(fault) => Err(fault.into_error(&request.name)),
            None => {
                let opened = self.inner.open(request).await?;
                Ok(OpenedStore {
                    connection: FaultyConnection {
                        inner: opened.connection,
                        faults: Arc::clone(&self.faults),
                    },
                    upgraded_from: opened.upgraded_from,
                })
            }
        }
    }

    async fn delete(&self, name: &str) -> StoreResult<()> {
        let hang = {
            let mut faults = self.faults.lock();
            faults.deletes += 1;
            faults.hang_deletes
        };
        if hang {
            return std::future::pending().await;
        }
        self.inner.delete(name).await
    }
}

/// Connection handed out by [`FaultyStoreFactory`].
#[derive(Debug, Clone)]
pub struct FaultyConnection<C> {
    inner: C,
    faults: Arc<Mutex<Faults>>,
}

impl<C: StoreConnection> StoreConnection for FaultyConnection<C> {
    type Transaction = FaultyTransaction<C::Transaction>;
    type Cursor = C::Cursor;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn begin_write(&self, collection: Collection) -> StoreResult<Self::Transaction> {
        Ok(FaultyTransaction {
            inner: self.inner.begin_write(collection)?,
            faults: Arc::clone(&self.faults),
        })
    }

    async fn open_cursor(&self, collection: Collection) -> StoreResult<Self::Cursor> {
        self.inner.open_cursor(collection).await
    }

    async fn count(&self, collection: Collection) -> StoreResult<u64> {
        self.inner.count(collection).await
    }

    fn close(&self) {
        self.inner.close();
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

/// Transaction handed out by [`FaultyConnection`].
#[derive(Debug)]
pub struct FaultyTransaction<T> {
    inner: T,
    faults: Arc<Mutex<Faults>>,
}

impl<T> FaultyTransaction<T> {
    fn check(&self) -> StoreResult<()> {
        let mut faults = self.faults.lock();
        faults.commits += 1;
        if faults.failing_commits > 0 {
            faults.failing_commits -= 1;
            return Err(StoreError::unavailable("injected commit failure"));
        }
        Ok(())
    }
}

impl<T: WriteTransaction> WriteTransaction for FaultyTransaction<T> {
    fn collection(&self) -> Collection {
        self.inner.collection()
    }

    async fn put(&mut self, record: Record) -> StoreResult<()> {
        self.check()?;
        self.inner.put(record).await
    }

    async fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }
}
