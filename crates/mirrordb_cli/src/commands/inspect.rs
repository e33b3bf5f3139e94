//! Inspect command implementation.

use super::Target;
use mirrordb_core::{Collection, StoreConnection};
use mirrordb_engine::{
    check_schema, decide_load, Clock, LoadDecision, MetadataSnapshot, SchemaCheck, SystemClock,
};
use serde::Serialize;

/// Cache inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Account id.
    pub account: String,
    /// Store name.
    pub store: String,
    /// Store version on disk, if the store exists.
    pub store_version: Option<u32>,
    /// Store version this build requires.
    pub required_version: u32,
    /// Pending counter.
    pub pending: Option<u64>,
    /// Recorded schema version.
    pub schema_version: Option<u32>,
    /// Recorded sequence marker.
    pub sequence: Option<u64>,
    /// Last heartbeat, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatInfo>,
    /// Record counts per collection.
    pub collections: Vec<CollectionStats>,
    /// What the next session start would do.
    pub next_session: String,
}

/// Last heartbeat written for the account.
#[derive(Debug, Serialize)]
pub struct HeartbeatInfo {
    /// Session token.
    pub token: String,
    /// Age in milliseconds.
    pub age_ms: u64,
}

/// Record count of a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: &'static str,
    /// Number of records.
    pub records: u64,
}

/// Runs the inspect command.
pub async fn run(target: &Target, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = target.metadata.snapshot()?;
    let store_version = target.factory.version(&target.store_name())?;

    let mut collections = Vec::new();
    if let Some(connection) = target.open_store().await? {
        for collection in Collection::ALL {
            collections.push(CollectionStats {
                name: collection.name(),
                records: connection.count(collection).await?,
            });
        }
        connection.close();
    }

    let nodes = collections
        .iter()
        .find(|c| c.name == Collection::Nodes.name())
        .map_or(0, |c| c.records);
    let now = SystemClock.now_millis();

    let result = InspectResult {
        account: target.config.account.clone(),
        store: target.store_name(),
        store_version,
        required_version: target.config.schema_version,
        pending: snapshot.pending,
        schema_version: snapshot.schema_version,
        sequence: snapshot.sequence.map(|s| s.as_u64()),
        heartbeat: snapshot.heartbeat.as_ref().map(|h| HeartbeatInfo {
            token: h.token.to_string(),
            age_ms: h.age_millis(now),
        }),
        next_session: next_session(&snapshot, store_version, target.config.schema_version, nodes),
        collections,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Predicts the load path of the next session start from the cache state.
///
/// A store missing or at another version is recreated empty on open.
fn next_session(
    snapshot: &MetadataSnapshot,
    store_version: Option<u32>,
    required: u32,
    nodes: u64,
) -> String {
    let created = store_version != Some(required);
    if let SchemaCheck::Reload(reason) =
        check_schema(required, snapshot.schema_version, snapshot.pending, created)
    {
        return format!("rebuild ({reason})");
    }
    let nodes = if created { 0 } else { nodes };
    match decide_load(snapshot.pending, snapshot.sequence, nodes) {
        LoadDecision::DirectFetch { .. } => "catch up from sequence marker".to_string(),
        LoadDecision::BulkLoad { .. } => "hydrate from store, then catch up".to_string(),
        LoadDecision::LiveFetch => "fetch live".to_string(),
        LoadDecision::Reload(reason) => format!("rebuild ({reason})"),
    }
}

fn print_text_output(result: &InspectResult) {
    fn show<T: std::fmt::Display>(value: Option<T>) -> String {
        value.map_or_else(|| "-".to_string(), |v| v.to_string())
    }

    println!("mirrordb cache");
    println!("==============");
    println!("Account:          {}", result.account);
    println!("Store:            {}", result.store);
    println!("Store version:    {}", show(result.store_version));
    println!("Required version: {}", result.required_version);
    println!();
    println!("Metadata");
    println!("--------");
    println!("Pending:          {}", show(result.pending));
    println!("Schema version:   {}", show(result.schema_version));
    println!("Sequence marker:  {}", show(result.sequence));
    match &result.heartbeat {
        Some(h) => println!("Heartbeat:        {} ({} ms ago)", h.token, h.age_ms),
        None => println!("Heartbeat:        -"),
    }

    if !result.collections.is_empty() {
        println!();
        println!("Collections");
        println!("-----------");
        for stats in &result.collections {
            println!("{:<16}  {:>8} records", stats.name, stats.records);
        }
    }

    println!();
    println!("Next session:     {}", result.next_session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrordb_core::SequenceNumber;

    fn snapshot(pending: Option<u64>, version: Option<u32>, sequence: Option<u64>) -> MetadataSnapshot {
        MetadataSnapshot {
            pending,
            schema_version: version,
            sequence: sequence.map(SequenceNumber::new),
            heartbeat: None,
        }
    }

    #[test]
    fn predicts_each_load_path() {
        assert_eq!(next_session(&snapshot(None, None, None), None, 6, 0), "fetch live");
        assert_eq!(
            next_session(&snapshot(Some(0), Some(6), Some(9)), Some(6), 6, 0),
            "catch up from sequence marker"
        );
        assert_eq!(
            next_session(&snapshot(Some(0), Some(6), Some(9)), Some(6), 6, 3),
            "hydrate from store, then catch up"
        );
        assert_eq!(
            next_session(&snapshot(Some(1), Some(6), Some(9)), Some(6), 6, 3),
            "rebuild (populated store with pending=Some(1) and marker present=true)"
        );
        assert_eq!(
            next_session(&snapshot(Some(0), Some(5), Some(9)), Some(5), 6, 3),
            "rebuild (schema version 5 does not match required 6)"
        );
        assert_eq!(
            next_session(&snapshot(Some(0), None, None), Some(6), 6, 0),
            "rebuild (schema version missing, required 6)"
        );
    }

    #[test]
    fn missing_store_with_recorded_metadata_rebuilds() {
        assert_eq!(
            next_session(&snapshot(Some(0), Some(6), Some(9)), None, 6, 0),
            "rebuild (metadata describes a store that no longer exists)"
        );
    }
}
