//! Store directory management.
//!
//! Each store lives in its own directory under the factory root:
//!
//! ```text
//! <root>/<store name>/
//! ├─ MANIFEST                # JSON: store version + collection declarations
//! ├─ LOCK                    # shared lock per connection, exclusive for upgrade/delete
//! ├─ nodes.log               # one append-only log per collection
//! ├─ outgoing-key-cache.log
//! ├─ shares.log
//! └─ users.log
//! ```

use crate::error::{StoreError, StoreResult};
use crate::schema::Schema;
use crate::types::Collection;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const LOG_EXTENSION: &str = "log";

/// Persisted description of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    /// Store version.
    pub version: u32,
    /// Collections the store was created with.
    pub schema: Schema,
}

/// Paths and metadata operations for one store directory.
#[derive(Debug, Clone)]
pub(crate) struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    /// Resolves the directory of store `name` under `root`.
    ///
    /// Names must be a single path component.
    pub fn new(root: &Path, name: &str) -> StoreResult<Self> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\'])
            && !name.contains('\0');
        if !valid {
            return Err(StoreError::unavailable(format!(
                "invalid store name: {name:?}"
            )));
        }
        Ok(Self {
            path: root.join(name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn create(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    /// Opens the LOCK file without locking it.
    pub fn open_lock(&self) -> StoreResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.join(LOCK_FILE))?)
    }

    pub fn log_path(&self, collection: Collection) -> PathBuf {
        self.path
            .join(format!("{}.{LOG_EXTENSION}", collection.name()))
    }

    /// Loads the manifest. `None` means the store was never created.
    pub fn load_manifest(&self) -> StoreResult<Option<Manifest>> {
        let path = self.path.join(MANIFEST_FILE);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| StoreError::corrupted(format!("{}: {e}", path.display())))
    }

    /// Saves the manifest with write-then-rename.
    pub fn save_manifest(&self, manifest: &Manifest) -> StoreResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| StoreError::Codec(e.to_string()))?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.path.join(MANIFEST_FILE))?;
        self.sync_directory()
    }

    /// Removes every collection log.
    pub fn remove_logs(&self) -> StoreResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == LOG_EXTENSION) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_path_like_names() {
        let root = tempdir().unwrap();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(StoreDir::new(root.path(), name).is_err(), "{name:?}");
        }
        assert!(StoreDir::new(root.path(), "mirror_alice").is_ok());
    }

    #[test]
    fn manifest_round_trip() {
        let root = tempdir().unwrap();
        let dir = StoreDir::new(root.path(), "s").unwrap();
        dir.create().unwrap();

        assert!(dir.load_manifest().unwrap().is_none());

        let manifest = Manifest {
            version: 6,
            schema: Schema::current(),
        };
        dir.save_manifest(&manifest).unwrap();
        assert_eq!(dir.load_manifest().unwrap(), Some(manifest));
    }

    #[test]
    fn unreadable_manifest_is_corruption() {
        let root = tempdir().unwrap();
        let dir = StoreDir::new(root.path(), "s").unwrap();
        dir.create().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"\x00\x01garbage").unwrap();

        let err = dir.load_manifest().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn remove_logs_keeps_other_files() {
        let root = tempdir().unwrap();
        let dir = StoreDir::new(root.path(), "s").unwrap();
        dir.create().unwrap();
        fs::write(dir.log_path(Collection::Nodes), b"x").unwrap();
        fs::write(dir.log_path(Collection::Users), b"y").unwrap();
        dir.open_lock().unwrap();

        assert_eq!(dir.remove_logs().unwrap(), 2);
        assert!(dir.path().join(LOCK_FILE).exists());
        assert!(!dir.log_path(Collection::Nodes).exists());
    }
}
