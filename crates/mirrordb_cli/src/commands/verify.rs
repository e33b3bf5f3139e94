//! Verify command implementation.

use super::Target;
use mirrordb_core::{Collection, CursorItem, RecordCursor, RecordKey, StoreConnection};

/// Verification result for one collection.
#[derive(Debug)]
pub struct VerifyResult {
    /// Collection checked.
    pub collection: Collection,
    /// Number of readable records.
    pub valid_records: usize,
    /// Unreadable records and why.
    pub unreadable: Vec<(RecordKey, String)>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// Runs the verify command.
pub async fn run(target: &Target) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store {}", target.store_name());
    println!();

    let Some(connection) = target.open_store().await? else {
        println!("Store not found (the next session creates it)");
        return Ok(());
    };

    let mut results = Vec::new();
    for collection in Collection::ALL {
        let mut cursor = connection.open_cursor(collection).await?;
        let mut result = VerifyResult {
            collection,
            valid_records: 0,
            unreadable: Vec::new(),
        };
        while let Some(item) = cursor.advance().await? {
            match item {
                CursorItem::Record(_) => result.valid_records += 1,
                CursorItem::Unreadable { key, reason } => result.unreadable.push((key, reason)),
            }
        }
        print_result(&result);
        results.push(result);
    }
    connection.close();

    println!();
    if results.iter().all(VerifyResult::is_ok) {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed (the next session rebuilds the store)");
        Err("Verification failed".into())
    }
}

fn print_result(result: &VerifyResult) {
    println!(
        "  {}: {} valid, {} unreadable",
        result.collection,
        result.valid_records,
        result.unreadable.len()
    );
    for (key, reason) in result.unreadable.iter().take(10) {
        println!("    - {key}: {reason}");
    }
    if result.unreadable.len() > 10 {
        println!("    ... and {} more", result.unreadable.len() - 10);
    }
}
