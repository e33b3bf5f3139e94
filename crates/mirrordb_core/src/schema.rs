//! Store schema applied on creation and upgrade.

use crate::types::Collection;
use serde::{Deserialize, Serialize};

/// Declaration of one collection: its name and unique key field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    /// The collection.
    pub collection: Collection,
    /// Field holding the record's primary key.
    pub key_field: String,
}

impl CollectionSpec {
    /// Declares `collection` with its default key field.
    #[must_use]
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            key_field: collection.key_field().to_string(),
        }
    }
}

/// The set of collections a store is created with.
///
/// Upgrading a store drops whatever collections it had and recreates exactly
/// the ones declared here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    collections: Vec<CollectionSpec>,
}

impl Schema {
    /// The current schema: nodes, outgoing-key-cache, shares and users.
    #[must_use]
    pub fn current() -> Self {
        Self {
            collections: Collection::ALL.into_iter().map(CollectionSpec::new).collect(),
        }
    }

    /// Builds a schema from explicit declarations.
    #[must_use]
    pub fn from_specs(collections: Vec<CollectionSpec>) -> Self {
        Self { collections }
    }

    /// Returns every declared collection.
    #[must_use]
    pub fn collections(&self) -> &[CollectionSpec] {
        &self.collections
    }

    /// Returns the declaration for `collection`, if present.
    #[must_use]
    pub fn spec(&self, collection: Collection) -> Option<&CollectionSpec> {
        self.collections.iter().find(|s| s.collection == collection)
    }

    /// Returns the key field of `collection`, if declared.
    #[must_use]
    pub fn key_field(&self, collection: Collection) -> Option<&str> {
        self.spec(collection).map(|s| s.key_field.as_str())
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::current()
    }
}
