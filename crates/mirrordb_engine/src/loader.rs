//! Streaming the store into the application model.

use crate::lifecycle::ReloadReason;
use crate::ports::ApplicationModel;
use mirrordb_core::{Collection, CursorItem, Record, RecordCursor, StoreConnection};
use std::collections::BTreeMap;
use std::fmt;

/// One cursor pass of a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadPass {
    /// Outgoing share keys.
    OutgoingKeys,
    /// Users and contacts.
    Users,
    /// Share keys embedded in nodes. Runs after users and outgoing keys are
    /// installed because decrypting them depends on those.
    ShareKeys,
    /// Nodes.
    Nodes,
    /// Shares.
    Shares,
}

impl LoadPass {
    /// Every pass in load order.
    pub const ORDER: [LoadPass; 5] = [
        LoadPass::OutgoingKeys,
        LoadPass::Users,
        LoadPass::ShareKeys,
        LoadPass::Nodes,
        LoadPass::Shares,
    ];

    /// The collection this pass reads.
    pub const fn collection(self) -> Collection {
        match self {
            LoadPass::OutgoingKeys => Collection::OutgoingKeys,
            LoadPass::Users => Collection::Users,
            LoadPass::ShareKeys | LoadPass::Nodes => Collection::Nodes,
            LoadPass::Shares => Collection::Shares,
        }
    }
}

impl fmt::Display for LoadPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadPass::ShareKeys => f.write_str("nodes (share keys)"),
            other => f.write_str(other.collection().name()),
        }
    }
}

/// Which passes have finished streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadState {
    loaded: BTreeMap<LoadPass, bool>,
}

impl LoadState {
    /// Creates a state with no pass loaded.
    pub fn new() -> Self {
        Self {
            loaded: LoadPass::ORDER.into_iter().map(|p| (p, false)).collect(),
        }
    }

    /// Marks `pass` as loaded.
    pub fn mark_loaded(&mut self, pass: LoadPass) {
        self.loaded.insert(pass, true);
    }

    /// Returns true if `pass` has loaded.
    pub fn is_loaded(&self, pass: LoadPass) -> bool {
        self.loaded.get(&pass).copied().unwrap_or(false)
    }

    /// The first pass, in load order, that has not loaded yet.
    pub fn next_pending(&self) -> Option<LoadPass> {
        LoadPass::ORDER.into_iter().find(|p| !self.is_loaded(*p))
    }

    /// Returns true once every pass has loaded.
    pub fn is_complete(&self) -> bool {
        self.next_pending().is_none()
    }
}

impl Default for LoadState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a clean bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hydrated {
    /// Records installed, one per stored record.
    pub records: u64,
    /// Share keys installed by the share-key pass.
    pub share_keys: u64,
}

/// Streams every collection of a connection into a model.
pub struct BulkLoader<'a, S, M> {
    connection: &'a S,
    model: &'a M,
    state: LoadState,
}

impl<'a, S: StoreConnection, M: ApplicationModel> BulkLoader<'a, S, M> {
    /// Creates a loader.
    pub fn new(connection: &'a S, model: &'a M) -> Self {
        Self {
            connection,
            model,
            state: LoadState::new(),
        }
    }

    /// Progress so far.
    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// Runs every pass in order.
    ///
    /// A pass that meets unreadable records still drains its cursor to the
    /// end, then the load stops and asks for a rebuild.
    ///
    /// # Errors
    ///
    /// Returns the rebuild reason if any record was unreadable or a cursor
    /// failed.
    pub async fn load(&mut self) -> Result<Hydrated, ReloadReason> {
        let mut hydrated = Hydrated::default();

        while let Some(pass) = self.state.next_pending() {
            let collection = pass.collection();
            let mut cursor = self
                .connection
                .open_cursor(collection)
                .await
                .map_err(|e| ReloadReason::LoadFailed(e.to_string()))?;

            let mut unreadable = 0u64;
            loop {
                let item = cursor
                    .advance()
                    .await
                    .map_err(|e| ReloadReason::LoadFailed(e.to_string()))?;
                match item {
                    None => break,
                    Some(CursorItem::Record(record)) => {
                        if unreadable == 0 {
                            self.install(pass, record, &mut hydrated);
                        }
                    }
                    Some(CursorItem::Unreadable { key, reason }) => {
                        tracing::warn!(
                            collection = %collection,
                            key = %key,
                            reason = %reason,
                            "unreadable record, forcing rebuild"
                        );
                        unreadable += 1;
                    }
                }
            }

            if unreadable > 0 {
                return Err(ReloadReason::CorruptRecords {
                    collection,
                    count: unreadable,
                });
            }
            tracing::debug!(pass = %pass, "loaded");
            self.state.mark_loaded(pass);
        }

        Ok(hydrated)
    }

    fn install(&self, pass: LoadPass, record: Record, hydrated: &mut Hydrated) {
        match pass {
            LoadPass::OutgoingKeys => self.model.install_outgoing_key(record),
            LoadPass::Users => self.model.install_user(record),
            LoadPass::Nodes => self.model.install_node(record),
            LoadPass::Shares => {
                let Some(node) = record.key("h") else {
                    tracing::debug!("share without node handle, skipping");
                    return;
                };
                self.model.install_share(&node, record);
            }
            LoadPass::ShareKeys => {
                if let (Some(node), Some(key)) = (record.key("h"), record.get_str("sk")) {
                    self.model.install_share_key(&node, key);
                    hydrated.share_keys += 1;
                }
                return;
            }
        }
        hydrated.records += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordb_core::{
        MemoryConnection, MemoryStoreFactory, OpenRequest, StoreFactory, WriteTransaction,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().push(call);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock())
        }
    }

    impl ApplicationModel for Calls {
        fn install_node(&self, record: Record) {
            self.push(format!("node:{}", record.key("h").unwrap()));
        }
        fn install_user(&self, record: Record) {
            self.push(format!("user:{}", record.key("u").unwrap()));
        }
        fn install_share(&self, key: &str, _record: Record) {
            self.push(format!("share:{key}"));
        }
        fn install_share_key(&self, node_id: &str, encrypted_key: &str) {
            self.push(format!("sharekey:{node_id}={encrypted_key}"));
        }
        fn install_outgoing_key(&self, record: Record) {
            self.push(format!("ok:{}", record.key("h").unwrap()));
        }
        fn is_empty(&self) -> bool {
            self.0.lock().is_empty()
        }
        fn discard(&self) {
            self.0.lock().clear();
        }
    }

    async fn store(factory: &MemoryStoreFactory) -> MemoryConnection {
        let connection = factory
            .open(OpenRequest::new("s", 6))
            .await
            .unwrap()
            .connection;
        let puts = [
            (Collection::Shares, Record::new().with("h_u", "n1_u2").with("h", "n1").with("u", "u2")),
            (Collection::Nodes, Record::new().with("h", "n1").with("sk", "enc1")),
            (Collection::Nodes, Record::new().with("h", "n2")),
            (Collection::Users, Record::new().with("u", "u2")),
            (Collection::OutgoingKeys, Record::new().with("h", "n1")),
        ];
        for (collection, record) in puts {
            let mut tx = connection.begin_write(collection).unwrap();
            tx.put(record).await.unwrap();
        }
        connection
    }

    #[test]
    fn load_state_walks_fixed_order() {
        let mut state = LoadState::new();
        let mut seen = Vec::new();
        while let Some(pass) = state.next_pending() {
            seen.push(pass);
            state.mark_loaded(pass);
        }
        assert_eq!(seen, LoadPass::ORDER.to_vec());
        assert!(state.is_complete());
    }

    #[tokio::test]
    async fn hydrates_in_pass_order() {
        let factory = MemoryStoreFactory::new();
        let connection = store(&factory).await;
        let model = Calls::default();

        let mut loader = BulkLoader::new(&connection, &model);
        let hydrated = loader.load().await.unwrap();
        assert!(loader.state().is_complete());

        assert_eq!(
            hydrated,
            Hydrated {
                records: 5,
                share_keys: 1
            }
        );
        assert_eq!(
            model.take(),
            vec![
                "ok:n1",
                "user:u2",
                "sharekey:n1=enc1",
                "node:n1",
                "node:n2",
                "share:n1",
            ]
        );
    }

    #[tokio::test]
    async fn unreadable_record_drains_pass_then_fails() {
        let factory = MemoryStoreFactory::new();
        let connection = store(&factory).await;
        factory
            .insert_raw("s", Collection::Users, "u0", vec![0xff, 0x00])
            .unwrap();
        factory
            .insert_raw("s", Collection::Users, "u1", vec![0x01])
            .unwrap();
        let model = Calls::default();

        let mut loader = BulkLoader::new(&connection, &model);
        let err = loader.load().await.unwrap_err();
        assert_eq!(
            err,
            ReloadReason::CorruptRecords {
                collection: Collection::Users,
                count: 2
            }
        );
        assert!(loader.state().is_loaded(LoadPass::OutgoingKeys));
        assert!(!loader.state().is_loaded(LoadPass::Users));
        // Nothing after the first unreadable record is installed.
        assert_eq!(model.take(), vec!["ok:n1"]);
    }
}
