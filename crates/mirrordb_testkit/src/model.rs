//! A recording application model.

use mirrordb_core::{Collection, Record, RecordKey};
use mirrordb_engine::ApplicationModel;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One call into the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hydration {
    /// `install_node`.
    Node(RecordKey),
    /// `install_user`.
    User(RecordKey),
    /// `install_share`, keyed by node.
    Share(RecordKey),
    /// `install_share_key`.
    ShareKey {
        /// Node handle.
        node: RecordKey,
        /// Encrypted key.
        key: String,
    },
    /// `install_outgoing_key`.
    OutgoingKey(RecordKey),
}

impl Hydration {
    /// Collection the hydrated record came from.
    pub fn collection(&self) -> Collection {
        match self {
            Hydration::Node(_) | Hydration::ShareKey { .. } => Collection::Nodes,
            Hydration::User(_) => Collection::Users,
            Hydration::Share(_) => Collection::Shares,
            Hydration::OutgoingKey(_) => Collection::OutgoingKeys,
        }
    }

    /// Returns true for calls made by the share-key pass.
    pub fn is_share_key(&self) -> bool {
        matches!(self, Hydration::ShareKey { .. })
    }
}

#[derive(Debug, Default)]
struct ModelState {
    calls: Vec<Hydration>,
    nodes: BTreeMap<RecordKey, Record>,
    discards: usize,
}

/// Records every hydration call and keeps the installed nodes.
///
/// Clones share state, so a test keeps a clone to inspect what the engine
/// installed.
#[derive(Debug, Clone, Default)]
pub struct RecordingModel {
    state: Arc<Mutex<ModelState>>,
}

impl RecordingModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call since creation or the last discard.
    pub fn calls(&self) -> Vec<Hydration> {
        self.state.lock().calls.clone()
    }

    /// Number of record hydrations, excluding the share-key pass.
    pub fn hydration_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| !c.is_share_key())
            .count()
    }

    /// Number of installed nodes.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Returns an installed node.
    pub fn node(&self, handle: &str) -> Option<Record> {
        self.state.lock().nodes.get(handle).cloned()
    }

    /// Number of `discard` calls.
    pub fn discards(&self) -> usize {
        self.state.lock().discards
    }

    /// Installs a node the way a remote fetch would.
    pub fn seed_node(&self, record: Record) {
        if let Some(handle) = record.key("h") {
            self.state.lock().nodes.insert(handle, record);
        }
    }
}

impl ApplicationModel for RecordingModel {
    fn install_node(&self, record: Record) {
        let mut state = self.state.lock();
        let handle = record.key("h").unwrap_or_default();
        state.calls.push(Hydration::Node(handle.clone()));
        state.nodes.insert(handle, record);
    }

    fn install_user(&self, record: Record) {
        let handle = record.key("u").unwrap_or_default();
        self.state.lock().calls.push(Hydration::User(handle));
    }

    fn install_share(&self, key: &str, _record: Record) {
        self.state.lock().calls.push(Hydration::Share(key.to_string()));
    }

    fn install_share_key(&self, node_id: &str, encrypted_key: &str) {
        self.state.lock().calls.push(Hydration::ShareKey {
            node: node_id.to_string(),
            key: encrypted_key.to_string(),
        });
    }

    fn install_outgoing_key(&self, record: Record) {
        let handle = record.key("h").unwrap_or_default();
        self.state.lock().calls.push(Hydration::OutgoingKey(handle));
    }

    fn is_empty(&self) -> bool {
        self.state.lock().nodes.is_empty()
    }

    fn discard(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.nodes.clear();
        state.discards += 1;
    }
}
