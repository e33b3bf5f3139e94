//! Property-based test generators using proptest.

use mirrordb_core::{Collection, Record, RecordKey, SequenceNumber};
use mirrordb_engine::{QueueEntry, QueueOp};
use proptest::prelude::*;

/// Strategy for any collection.
pub fn collection_strategy() -> impl Strategy<Value = Collection> {
    prop_oneof![
        Just(Collection::Nodes),
        Just(Collection::Users),
        Just(Collection::Shares),
        Just(Collection::OutgoingKeys),
    ]
}

/// Strategy for record keys drawn from a small space, so puts and deletes
/// collide often.
pub fn record_key_strategy() -> impl Strategy<Value = RecordKey> {
    "[a-d][0-3]".prop_map(String::from)
}

/// Strategy for sequence numbers.
pub fn sequence_strategy() -> impl Strategy<Value = SequenceNumber> {
    any::<u64>().prop_map(SequenceNumber::new)
}

/// Strategy for a record in `collection` with the given key.
pub fn record_strategy(collection: Collection, key: RecordKey) -> impl Strategy<Value = Record> {
    (any::<u32>(), proptest::option::of("[a-z]{1,8}")).prop_map(move |(revision, name)| {
        let mut record = Record::new()
            .with(collection.key_field(), key.clone())
            .with("rev", revision);
        if let Some(name) = name {
            record.insert("name", name);
        }
        record
    })
}

/// Strategy for one write-queue entry.
pub fn queue_entry_strategy() -> impl Strategy<Value = QueueEntry> {
    (collection_strategy(), record_key_strategy(), any::<bool>()).prop_flat_map(
        |(collection, key, is_put)| {
            if is_put {
                record_strategy(collection, key)
                    .prop_map(move |record| QueueEntry {
                        collection,
                        op: QueueOp::Put(record),
                    })
                    .boxed()
            } else {
                Just(QueueEntry {
                    collection,
                    op: QueueOp::Delete(key),
                })
                .boxed()
            }
        },
    )
}

/// One step of an interleaved write script.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Enqueue an entry.
    Enqueue(QueueEntry),
    /// Yield to the runtime, letting a flush make progress.
    Yield,
}

/// Strategy for write scripts that interleave enqueues with flush progress.
pub fn script_strategy(max_len: usize) -> impl Strategy<Value = Vec<ScriptStep>> {
    prop::collection::vec(
        prop_oneof![
            4 => queue_entry_strategy().prop_map(ScriptStep::Enqueue),
            1 => Just(ScriptStep::Yield),
        ],
        0..max_len,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_puts_carry_their_key(entry in queue_entry_strategy()) {
            if let QueueOp::Put(record) = &entry.op {
                prop_assert!(record.key(entry.collection.key_field()).is_some());
            }
        }
    }
}
