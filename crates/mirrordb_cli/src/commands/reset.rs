//! Reset command implementation.

use super::Target;
use mirrordb_core::StoreFactory;

/// Runs the reset command.
///
/// Metadata is cleared before the store is deleted, so a reset interrupted
/// halfway still leaves the store untrusted.
pub async fn run(target: &Target, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let name = target.store_name();
    let path = target.factory.store_path(&name)?;
    let exists = target.factory.exists(&name);

    if dry_run {
        println!("Dry run - no changes will be made");
        println!("Would clear metadata for account {}", target.config.account);
        if exists {
            println!("Would delete store {} at {:?}", name, path);
        }
        return Ok(());
    }

    target.metadata.clear_all()?;
    println!("Cleared metadata for account {}", target.config.account);

    if exists {
        target
            .factory
            .delete(&name)
            .await
            .map_err(|e| format!("Cannot delete store {name}: {e} (is a session running?)"))?;
        println!("Deleted store {} at {:?}", name, path);
    } else {
        println!("No store to delete");
    }

    Ok(())
}
