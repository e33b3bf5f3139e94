//! In-memory metadata backend for testing.

use crate::backend::MetadataBackend;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An in-memory metadata backend.
///
/// Cloning an `InMemoryMetadata` yields another handle onto the same map,
/// which is how tests model two sessions of one account sharing the same
/// browser-profile style storage.
///
/// # Example
///
/// ```rust
/// use mirrordb_storage::{InMemoryMetadata, MetadataBackend};
///
/// let first = InMemoryMetadata::new();
/// let second = first.clone();
/// first.set("k", "v").unwrap();
/// assert_eq!(second.get("k").unwrap().as_deref(), Some("v"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryMetadata {
    values: Arc<RwLock<BTreeMap<String, String>>>,
}

impl InMemoryMetadata {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `entries`.
    ///
    /// Useful for testing startup against leftover state.
    #[must_use]
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    /// Returns a copy of every entry.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.values.write().clear();
    }
}

impl MetadataBackend for InMemoryMetadata {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.values.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.values.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let meta = InMemoryMetadata::new();
        assert!(meta.keys().unwrap().is_empty());
        assert_eq!(meta.get("missing").unwrap(), None);
    }

    #[test]
    fn memory_set_replaces_value() {
        let meta = InMemoryMetadata::new();
        meta.set("count", "1").unwrap();
        meta.set("count", "2").unwrap();
        assert_eq!(meta.get("count").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn memory_remove_missing_is_ok() {
        let meta = InMemoryMetadata::new();
        meta.remove("never-set").unwrap();
        meta.set("k", "v").unwrap();
        meta.remove("k").unwrap();
        assert_eq!(meta.get("k").unwrap(), None);
    }

    #[test]
    fn memory_clones_share_state() {
        let a = InMemoryMetadata::new();
        let b = a.clone();
        a.set("heartbeat", "100").unwrap();
        assert_eq!(b.get("heartbeat").unwrap().as_deref(), Some("100"));
        b.clear();
        assert!(a.entries().is_empty());
    }

    #[test]
    fn memory_keys_are_sorted() {
        let meta = InMemoryMetadata::with_entries([("b", "2"), ("a", "1"), ("c", "3")]);
        assert_eq!(meta.keys().unwrap(), vec!["a", "b", "c"]);
    }
}
