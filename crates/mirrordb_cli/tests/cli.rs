//! End-to-end tests for the `mirrordb` binary.

use mirrordb_core::{
    Collection, FileStoreFactory, OpenRequest, Record, SequenceNumber, StoreConnection,
    StoreFactory, WriteTransaction,
};
use mirrordb_engine::{EngineConfig, PersistedMetadata, DEFAULT_SCHEMA_VERSION};
use mirrordb_storage::FileMetadata;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;

const ACCOUNT: &str = "alice";

fn mirrordb(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mirrordb"))
        .arg("--root")
        .arg(root)
        .arg("--account")
        .arg(ACCOUNT)
        .args(args)
        .output()
        .unwrap()
}

fn seed(root: &Path) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime.block_on(async {
        let factory = FileStoreFactory::new(root.join("stores"));
        let name = EngineConfig::new(ACCOUNT).store_name();
        let connection = factory
            .open(OpenRequest::new(name, DEFAULT_SCHEMA_VERSION))
            .await
            .unwrap()
            .connection;
        let mut tx = connection.begin_write(Collection::Nodes).unwrap();
        tx.put(Record::new().with("h", "n1")).await.unwrap();
        tx.put(Record::new().with("h", "n2")).await.unwrap();
        connection.close();
    });

    let backend = FileMetadata::open(&root.join("metadata.json")).unwrap();
    let metadata = PersistedMetadata::new(Arc::new(backend), ACCOUNT);
    metadata.clear_pending().unwrap();
    metadata.set_schema_version(DEFAULT_SCHEMA_VERSION).unwrap();
    metadata.set_sequence_marker(SequenceNumber::new(42)).unwrap();
}

#[test]
fn inspect_reports_metadata_and_counts() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());

    let output = mirrordb(dir.path(), &["inspect", "--format", "json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(report["store"], "mirror_alice");
    assert_eq!(report["pending"], 0);
    assert_eq!(report["sequence"], 42);
    assert_eq!(report["store_version"], DEFAULT_SCHEMA_VERSION);
    assert_eq!(report["next_session"], "hydrate from store, then catch up");
    let nodes = report["collections"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["name"] == "nodes")
        .unwrap();
    assert_eq!(nodes["records"], 2);
}

#[test]
fn verify_passes_on_clean_store() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());

    let output = mirrordb(dir.path(), &["verify"]);
    assert!(output.status.success());
}

#[test]
fn reset_removes_store_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path());

    let output = mirrordb(dir.path(), &["reset", "--dry-run"]);
    assert!(output.status.success());
    assert!(FileStoreFactory::new(dir.path().join("stores")).exists("mirror_alice"));

    let output = mirrordb(dir.path(), &["reset"]);
    assert!(output.status.success());
    assert!(!FileStoreFactory::new(dir.path().join("stores")).exists("mirror_alice"));

    let output = mirrordb(dir.path(), &["inspect", "--format", "json"]);
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(report["pending"].is_null());
    assert!(report["store_version"].is_null());
    assert_eq!(report["next_session"], "fetch live");
}

#[test]
fn missing_root_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = mirrordb(&dir.path().join("absent"), &["inspect"]);
    assert!(!output.status.success());
}
