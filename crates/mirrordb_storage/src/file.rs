//! File-based metadata backend for persistent storage.

use crate::backend::MetadataBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A metadata backend stored as one JSON document on disk.
///
/// Several processes may open the same document. Reads take a shared lock on
/// a sidecar `.lock` file and writes take an exclusive one, so a
/// read-modify-write never interleaves with another process.
///
/// # Durability
///
/// Every write goes to a temporary file which is fsynced and then renamed
/// over the document, so a crash leaves either the old or the new document.
///
/// # Example
///
/// ```no_run
/// use mirrordb_storage::{FileMetadata, MetadataBackend};
/// use std::path::Path;
///
/// let meta = FileMetadata::open(Path::new("metadata.json")).unwrap();
/// meta.set("alice_mirror_version", "6").unwrap();
/// ```
#[derive(Debug)]
pub struct FileMetadata {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes writers inside this process.
    write_guard: Mutex<()>,
}

impl FileMetadata {
    /// Opens (or prepares to create) the metadata document at `path`.
    ///
    /// Parent directories are created if needed. The document itself is
    /// created lazily on the first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or an
    /// existing document cannot be parsed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        let backend = Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
            write_guard: Mutex::new(()),
        };

        // Fail early on a document we could never read.
        backend.with_shared_lock(|| backend.read_document())?;
        Ok(backend)
    }

    /// Returns the path of the JSON document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> StorageResult<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?)
    }

    fn with_shared_lock<T>(&self, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
        let lock = self.lock_file()?;
        FileExt::lock_shared(&lock)?;
        let result = f();
        FileExt::unlock(&lock)?;
        result
    }

    fn with_exclusive_lock<T>(&self, f: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
        let _guard = self.write_guard.lock();
        let lock = self.lock_file()?;
        FileExt::lock_exclusive(&lock)?;
        let result = f();
        FileExt::unlock(&lock)?;
        result
    }

    fn read_document(&self) -> StorageResult<Map<String, Value>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        let mut data = String::new();
        file.read_to_string(&mut data)?;
        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::corrupted(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StorageError::corrupted(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> StorageResult<()> {
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let data = serde_json::to_vec_pretty(document)?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut Map<String, Value>)) -> StorageResult<()> {
        self.with_exclusive_lock(|| {
            let mut document = self.read_document()?;
            f(&mut document);
            self.write_document(&document)
        })
    }
}

impl MetadataBackend for FileMetadata {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let document = self.with_shared_lock(|| self.read_document())?;
        Ok(document.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.update(|document| {
            document.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.update(|document| {
            document.remove(key);
        })
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let document = self.with_shared_lock(|| self.read_document())?;
        let mut keys: Vec<String> = document.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn file_missing_document_reads_empty() {
        let dir = tempdir().unwrap();
        let meta = FileMetadata::open(&dir.path().join("meta.json")).unwrap();
        assert_eq!(meta.get("anything").unwrap(), None);
        assert!(meta.keys().unwrap().is_empty());
    }

    #[test]
    fn file_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");

        {
            let meta = FileMetadata::open(&path).unwrap();
            meta.set("alice_mirror_pending", "4").unwrap();
            meta.set("alice_mirror_version", "6").unwrap();
            meta.remove("alice_mirror_version").unwrap();
        }

        let meta = FileMetadata::open(&path).unwrap();
        assert_eq!(meta.get("alice_mirror_pending").unwrap().as_deref(), Some("4"));
        assert_eq!(meta.get("alice_mirror_version").unwrap(), None);
    }

    #[test]
    fn file_two_handles_see_each_other() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let a = FileMetadata::open(&path).unwrap();
        let b = FileMetadata::open(&path).unwrap();
        a.set("heartbeat", "1").unwrap();
        assert_eq!(b.get("heartbeat").unwrap().as_deref(), Some("1"));
        b.set("heartbeat", "2").unwrap();
        assert_eq!(a.get("heartbeat").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("meta.json");
        let meta = FileMetadata::open(&path).unwrap();
        meta.set("k", "v").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn file_corrupt_document_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, b"{ not json").unwrap();

        let result = FileMetadata::open(&path);
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn file_non_string_values_are_stringified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, br#"{"count": 7}"#).unwrap();

        let meta = FileMetadata::open(&path).unwrap();
        assert_eq!(meta.get("count").unwrap().as_deref(), Some("7"));
    }

    proptest! {
        #[test]
        fn file_last_write_wins(values in prop::collection::vec("[a-z0-9]{0,12}", 1..8)) {
            let dir = tempdir().unwrap();
            let meta = FileMetadata::open(&dir.path().join("meta.json")).unwrap();
            for value in &values {
                meta.set("key", value).unwrap();
            }
            prop_assert_eq!(meta.get("key").unwrap(), values.last().cloned());
        }
    }
}
