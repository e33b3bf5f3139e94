//! Ordered write-back of model mutations.
//!
//! Mutations are queued per collection and committed by a single flush task
//! that holds one active collection and one open transaction at a time. A
//! collection's queue is drained completely, including entries that arrive
//! while it is being drained, before the next non-empty collection is picked
//! in [`Collection`] order. Entries of different collections never share a
//! transaction, and there is no ordering between collections beyond that.
//!
//! Every queued entry is counted in the persisted pending counter until it
//! commits. An entry whose commit fails is logged and dropped without being
//! uncounted, so a failed write leaves the counter non-zero and the next
//! session rebuilds instead of trusting the store.

use crate::error::{CacheError, CacheResult};
use crate::metadata::PersistedMetadata;
use mirrordb_core::{Collection, Record, RecordKey, StoreConnection, WriteTransaction};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;

/// A queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueOp {
    /// Insert or replace a record.
    Put(Record),
    /// Delete the record with this key.
    Delete(RecordKey),
}

/// A mutation bound to its collection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Target collection.
    pub collection: Collection,
    /// The mutation.
    pub op: QueueOp,
}

enum Mode<S> {
    /// No connection yet; entries wait uncounted.
    Buffering,
    /// Entries are counted and flushed to this connection.
    Attached(S),
    /// The store is not used this session; entries are dropped.
    Disabled,
}

struct State<S> {
    mode: Mode<S>,
    queues: BTreeMap<Collection, VecDeque<QueueOp>>,
    active: Option<Collection>,
    flushing: bool,
    // Bumped whenever the connection changes; a flush task from an older
    // generation exits at its next step.
    generation: u64,
}

impl<S> State<S> {
    fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.len();
        self.queues.clear();
        self.active = None;
        dropped
    }
}

struct Inner<S> {
    metadata: PersistedMetadata,
    state: Mutex<State<S>>,
    idle: watch::Sender<bool>,
}

/// Handle to the engine's write queue.
///
/// Clones share the same queue.
pub struct WriteQueue<S: StoreConnection> {
    inner: Arc<Inner<S>>,
}

impl<S: StoreConnection> Clone for WriteQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StoreConnection> std::fmt::Debug for WriteQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        let mode = match state.mode {
            Mode::Buffering => "buffering",
            Mode::Attached(_) => "attached",
            Mode::Disabled => "disabled",
        };
        f.debug_struct("WriteQueue")
            .field("mode", &mode)
            .field("queued", &state.len())
            .field("active", &state.active)
            .finish()
    }
}

impl<S: StoreConnection> WriteQueue<S> {
    /// Creates a queue that buffers until a connection is attached.
    pub fn new(metadata: PersistedMetadata) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                metadata,
                state: Mutex::new(State {
                    mode: Mode::Buffering,
                    queues: BTreeMap::new(),
                    active: None,
                    flushing: false,
                    generation: 0,
                }),
                idle,
            }),
        }
    }

    /// Queues a put. Derived fields are stripped unless the collection
    /// retains them.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated; the entry
    /// is not queued in that case.
    pub fn enqueue_put(&self, collection: Collection, mut record: Record) -> CacheResult<()> {
        if !collection.retains_derived_fields() {
            record.strip_derived();
        }
        self.enqueue(QueueEntry {
            collection,
            op: QueueOp::Put(record),
        })
    }

    /// Queues a delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated.
    pub fn enqueue_delete(
        &self,
        collection: Collection,
        key: impl Into<RecordKey>,
    ) -> CacheResult<()> {
        self.enqueue(QueueEntry {
            collection,
            op: QueueOp::Delete(key.into()),
        })
    }

    /// Queues an entry as-is.
    ///
    /// While attached, this writes the pending counter synchronously under
    /// the queue lock, so the count and the queue never disagree. With a
    /// file backend that write blocks the calling thread until it is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated.
    pub fn enqueue(&self, entry: QueueEntry) -> CacheResult<()> {
        let mut state = self.inner.state.lock();
        match state.mode {
            Mode::Disabled => {
                tracing::trace!(collection = %entry.collection, "store disabled, dropping mutation");
                return Ok(());
            }
            Mode::Buffering => {}
            Mode::Attached(_) => {
                self.inner.metadata.increment_pending()?;
            }
        }
        state
            .queues
            .entry(entry.collection)
            .or_default()
            .push_back(entry.op);
        if matches!(state.mode, Mode::Attached(_)) {
            self.start_flush(&mut state);
        }
        Ok(())
    }

    /// Starts flushing to `connection`. Buffered entries are counted now.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending counter cannot be updated.
    pub fn attach(&self, connection: S) -> CacheResult<()> {
        let mut state = self.inner.state.lock();
        for _ in 0..state.len() {
            self.inner.metadata.increment_pending()?;
        }
        state.mode = Mode::Attached(connection);
        state.generation += 1;
        state.flushing = false;
        if state.len() > 0 {
            self.start_flush(&mut state);
        }
        Ok(())
    }

    /// Stops using the store for this session and drops everything queued.
    pub fn disable(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.clear();
        state.mode = Mode::Disabled;
        self.finish(&mut state);
        if dropped > 0 {
            tracing::debug!(dropped, "write queue disabled");
        }
    }

    /// Detaches the connection and drops everything queued; new entries
    /// buffer until the next [`Self::attach`].
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let dropped = state.clear();
        state.mode = Mode::Buffering;
        self.finish(&mut state);
        if dropped > 0 {
            tracing::debug!(dropped, "write queue reset");
        }
    }

    /// Returns to buffering after a disabled or attached session, dropping
    /// whatever is still queued. A buffering queue is left untouched.
    pub fn reopen(&self) {
        let mut state = self.inner.state.lock();
        if matches!(state.mode, Mode::Buffering) {
            return;
        }
        state.clear();
        state.mode = Mode::Buffering;
        self.finish(&mut state);
    }

    fn finish(&self, state: &mut State<S>) {
        state.generation += 1;
        state.flushing = false;
        self.inner.idle.send_replace(true);
    }

    /// Number of entries waiting to be committed (excluding one in flight).
    pub fn len(&self) -> usize {
        self.inner.state.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a connection is attached.
    pub fn is_attached(&self) -> bool {
        matches!(self.inner.state.lock().mode, Mode::Attached(_))
    }

    /// Returns true if the queue drops everything.
    pub fn is_disabled(&self) -> bool {
        matches!(self.inner.state.lock().mode, Mode::Disabled)
    }

    /// The collection currently being flushed.
    pub fn active_collection(&self) -> Option<Collection> {
        self.inner.state.lock().active
    }

    /// Returns true if no flush is running.
    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// Waits until no flush is running.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    fn start_flush(&self, state: &mut State<S>) {
        if state.flushing {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, queued mutations wait for the next attach");
            return;
        };
        state.flushing = true;
        self.inner.idle.send_replace(false);
        handle.spawn(flush(Arc::clone(&self.inner), state.generation));
    }
}

/// Picks the next non-empty collection, or marks the queue idle.
fn next_collection<S: StoreConnection>(
    inner: &Inner<S>,
    generation: u64,
) -> Option<(Collection, S)> {
    let mut state = inner.state.lock();
    if state.generation != generation {
        return None;
    }
    let next = match &state.mode {
        Mode::Attached(connection) => state
            .queues
            .iter()
            .find(|(_, queue)| !queue.is_empty())
            .map(|(collection, _)| (*collection, connection.clone())),
        Mode::Buffering | Mode::Disabled => None,
    };
    match &next {
        Some((collection, _)) => state.active = Some(*collection),
        None => {
            state.active = None;
            state.flushing = false;
            inner.idle.send_replace(true);
        }
    }
    next
}

fn pop<S>(inner: &Inner<S>, generation: u64, collection: Collection) -> Option<QueueOp> {
    let mut state = inner.state.lock();
    if state.generation != generation {
        return None;
    }
    state.queues.get_mut(&collection)?.pop_front()
}

async fn flush<S: StoreConnection>(inner: Arc<Inner<S>>, generation: u64) {
    while let Some((collection, connection)) = next_collection(&inner, generation) {
        let mut tx = match connection.begin_write(collection) {
            Ok(tx) => tx,
            Err(e) => {
                let mut dropped = 0;
                while pop(&inner, generation, collection).is_some() {
                    dropped += 1;
                }
                tracing::warn!(
                    collection = %collection,
                    dropped,
                    error = %e,
                    "cannot open transaction, dropping queued mutations"
                );
                continue;
            }
        };

        while let Some(op) = pop(&inner, generation, collection) {
            let result = match op {
                QueueOp::Put(record) => tx.put(record).await,
                QueueOp::Delete(key) => tx.delete(&key).await,
            };
            match result {
                Ok(()) => {
                    if let Err(e) = inner.metadata.decrement_pending() {
                        tracing::warn!(error = %e, "failed to decrement pending counter");
                    }
                }
                Err(e) => {
                    let error = CacheError::CommitFailure {
                        collection,
                        message: e.to_string(),
                    };
                    tracing::warn!(error = %error, "dropping queued mutation");
                }
            }
        }
    }
}
