//! Core type definitions for mirrordb.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Primary key of a record within its collection.
pub type RecordKey = String;

/// One of the fixed named partitions of a store.
///
/// Collections are independent: there is no foreign-key enforcement between
/// them. The declaration order here is also the order collections are visited
/// when several have work queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// File and folder nodes, keyed by node handle.
    #[serde(rename = "nodes")]
    Nodes,
    /// Outgoing share keys, keyed by node handle.
    #[serde(rename = "outgoing-key-cache")]
    OutgoingKeys,
    /// Share records, keyed by the composite node/user handle.
    #[serde(rename = "shares")]
    Shares,
    /// Contacts and account users, keyed by user handle.
    #[serde(rename = "users")]
    Users,
}

impl Collection {
    /// Every collection, in declaration order.
    pub const ALL: [Collection; 4] = [
        Collection::Nodes,
        Collection::OutgoingKeys,
        Collection::Shares,
        Collection::Users,
    ];

    /// Returns the stable on-disk name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::OutgoingKeys => "outgoing-key-cache",
            Collection::Shares => "shares",
            Collection::Users => "users",
        }
    }

    /// Returns the declared unique key field.
    #[must_use]
    pub const fn key_field(self) -> &'static str {
        match self {
            Collection::Nodes | Collection::OutgoingKeys => "h",
            Collection::Shares => "h_u",
            Collection::Users => "u",
        }
    }

    /// Returns true if records must be persisted verbatim.
    ///
    /// Users carry per-account display metadata that cannot be cheaply
    /// recomputed, so their derived fields are kept.
    #[must_use]
    pub const fn retains_derived_fields(self) -> bool {
        matches!(self, Collection::Users)
    }

    /// Looks a collection up by its on-disk name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| StoreError::UnknownCollection {
            name: s.to_string(),
        })
    }
}

/// Position in the remote mutation log.
///
/// The engine persists the last applied position so the next session can
/// ask the remote for only the mutations that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

impl FromStr for SequenceNumber {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_and_keys() {
        assert_eq!(Collection::Nodes.name(), "nodes");
        assert_eq!(Collection::OutgoingKeys.name(), "outgoing-key-cache");
        assert_eq!(Collection::Shares.key_field(), "h_u");
        assert_eq!(Collection::Users.key_field(), "u");
    }

    #[test]
    fn collection_parse() {
        assert_eq!("shares".parse::<Collection>().unwrap(), Collection::Shares);
        assert_eq!(
            Collection::from_name("outgoing-key-cache"),
            Some(Collection::OutgoingKeys)
        );
        assert!("files".parse::<Collection>().is_err());
    }

    #[test]
    fn only_users_retain_derived_fields() {
        let retaining: Vec<_> = Collection::ALL
            .into_iter()
            .filter(|c| c.retains_derived_fields())
            .collect();
        assert_eq!(retaining, vec![Collection::Users]);
    }

    #[test]
    fn collection_serde_uses_store_names() {
        let json = serde_json::to_string(&Collection::OutgoingKeys).unwrap();
        assert_eq!(json, "\"outgoing-key-cache\"");
    }

    #[test]
    fn sequence_number_parse_and_display() {
        let seq: SequenceNumber = " 42 ".parse().unwrap();
        assert_eq!(seq.as_u64(), 42);
        assert_eq!(seq.to_string(), "seq:42");
        assert!("abc".parse::<SequenceNumber>().is_err());
    }
}
