//! Append-only collection logs.
//!
//! Frame format (little-endian):
//!
//! ```text
//! | op (1) | key_len (4) | key | value_len (4) | value | crc32 (4) |
//! ```
//!
//! The checksum covers everything from `op` through `value`. Replay keeps
//! the latest frame per key. A frame whose lengths run past the end of the
//! file is a torn write and is truncated away; a frame whose lengths fit
//! but whose checksum does not match leaves its key marked damaged.

use crate::error::StoreResult;
use crate::types::RecordKey;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Latest state of a key after replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Encoded record bytes.
    Value(Vec<u8>),
    /// The key's last frame failed verification.
    Damaged(String),
}

/// One collection's log file and its in-memory index.
#[derive(Debug)]
pub(crate) struct CollectionLog {
    path: PathBuf,
    file: File,
    index: BTreeMap<RecordKey, Slot>,
    sync_on_commit: bool,
}

impl CollectionLog {
    /// Opens (creating if needed) and replays the log at `path`.
    pub fn open(path: &Path, sync_on_commit: bool) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let (index, valid_len) = replay(&data);
        if valid_len < data.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = data.len() - valid_len,
                "truncating torn tail of collection log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            sync_on_commit,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a put frame and updates the index.
    pub fn put(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.append(&encode_frame(OP_PUT, key, &value))?;
        self.index.insert(key.to_string(), Slot::Value(value));
        Ok(())
    }

    /// Appends a delete frame and updates the index.
    pub fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.append(&encode_frame(OP_DELETE, key, &[]))?;
        self.index.remove(key);
        Ok(())
    }

    fn append(&mut self, frame: &[u8]) -> StoreResult<()> {
        self.file.write_all(frame)?;
        if self.sync_on_commit {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Copies the current index in key order.
    pub fn snapshot(&self) -> Vec<(RecordKey, Slot)> {
        self.index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

fn encode_frame(op: u8, key: &str, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + LEN_SIZE * 2 + key.len() + value.len() + CRC_SIZE);
    buf.push(op);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn read_u32(data: &[u8], at: usize) -> Option<usize> {
    let bytes: [u8; 4] = data.get(at..at + LEN_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes) as usize)
}

/// Rebuilds the index from raw log bytes.
///
/// Returns the index and the length of the well-formed prefix.
fn replay(data: &[u8]) -> (BTreeMap<RecordKey, Slot>, usize) {
    let mut index = BTreeMap::new();
    let mut offset = 0;

    while offset < data.len() {
        let Some(key_len) = read_u32(data, offset + 1) else {
            break;
        };
        let key_start = offset + 1 + LEN_SIZE;
        let Some(key_end) = key_start.checked_add(key_len) else {
            break;
        };
        let Some(value_len) = read_u32(data, key_end) else {
            break;
        };
        let value_start = key_end + LEN_SIZE;
        let Some(value_end) = value_start.checked_add(value_len) else {
            break;
        };
        let Some(stored_crc) = read_u32(data, value_end) else {
            break;
        };

        let key = String::from_utf8_lossy(&data[key_start..key_end]).into_owned();
        let op = data[offset];

        if compute_crc32(&data[offset..value_end]) as usize != stored_crc {
            index.insert(key, Slot::Damaged("checksum mismatch".to_string()));
        } else {
            match op {
                OP_PUT => {
                    index.insert(key, Slot::Value(data[value_start..value_end].to_vec()));
                }
                OP_DELETE => {
                    index.remove(&key);
                }
                other => {
                    index.insert(key, Slot::Damaged(format!("unknown frame op {other}")));
                }
            }
        }

        offset = value_end + CRC_SIZE;
    }

    (index, offset)
}

const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// CRC32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ CRC32_TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn replay_keeps_latest_frame_per_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.log");

        {
            let mut log = CollectionLog::open(&path, false).unwrap();
            log.put("a", vec![1]).unwrap();
            log.put("b", vec![2]).unwrap();
            log.put("a", vec![3]).unwrap();
            log.delete("b").unwrap();
        }

        let log = CollectionLog::open(&path, false).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.snapshot(),
            vec![("a".to_string(), Slot::Value(vec![3]))]
        );
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.log");

        {
            let mut log = CollectionLog::open(&path, false).unwrap();
            log.put("u1", vec![9; 16]).unwrap();
        }
        let intact = fs::metadata(&path).unwrap().len();

        let mut partial = encode_frame(OP_PUT, "u2", &[7; 32]);
        partial.truncate(partial.len() - 10);
        let mut data = fs::read(&path).unwrap();
        data.extend_from_slice(&partial);
        fs::write(&path, &data).unwrap();

        let log = CollectionLog::open(&path, false).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
    }

    #[test]
    fn checksum_mismatch_marks_key_damaged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shares.log");

        {
            let mut log = CollectionLog::open(&path, false).unwrap();
            log.put("s1", vec![1, 2, 3, 4]).unwrap();
            log.put("s2", vec![5, 6, 7, 8]).unwrap();
        }

        // Flip a value byte inside the first frame: 1 + 4 + 2 ("s1") + 4.
        let mut data = fs::read(&path).unwrap();
        data[11] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let log = CollectionLog::open(&path, false).unwrap();
        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(matches!(snapshot[0].1, Slot::Damaged(_)));
        assert_eq!(snapshot[1].1, Slot::Value(vec![5, 6, 7, 8]));
    }

    #[test]
    fn appends_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.log");

        CollectionLog::open(&path, true).unwrap().put("a", vec![1]).unwrap();
        CollectionLog::open(&path, true).unwrap().put("b", vec![2]).unwrap();

        let log = CollectionLog::open(&path, false).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.path(), path.as_path());
    }

    mod props {
        use super::super::*;
        use proptest::prelude::*;

        fn ops() -> impl Strategy<Value = Vec<(String, Option<Vec<u8>>)>> {
            prop::collection::vec(
                (
                    "[a-c]",
                    proptest::option::of(prop::collection::vec(any::<u8>(), 0..8)),
                ),
                0..24,
            )
        }

        fn encode(ops: &[(String, Option<Vec<u8>>)]) -> Vec<u8> {
            ops.iter()
                .flat_map(|(key, value)| match value {
                    Some(value) => encode_frame(OP_PUT, key, value),
                    None => encode_frame(OP_DELETE, key, &[]),
                })
                .collect()
        }

        proptest! {
            #[test]
            fn replay_matches_last_write(ops in ops()) {
                let mut expected = BTreeMap::new();
                for (key, value) in &ops {
                    match value {
                        Some(value) => {
                            expected.insert(key.clone(), Slot::Value(value.clone()));
                        }
                        None => {
                            expected.remove(key);
                        }
                    }
                }

                let data = encode(&ops);
                let (index, valid) = replay(&data);
                prop_assert_eq!(valid, data.len());
                prop_assert_eq!(index, expected);
            }

            #[test]
            fn truncated_log_replays_a_frame_prefix(ops in ops(), cut in any::<prop::sample::Index>()) {
                let data = encode(&ops);
                let cut = if data.is_empty() { 0 } else { cut.index(data.len() + 1) };
                let (_, valid) = replay(&data[..cut]);
                prop_assert!(valid <= cut);

                // The valid prefix ends exactly on a frame boundary.
                let mut boundary = 0;
                for (key, value) in &ops {
                    let len = match value {
                        Some(value) => encode_frame(OP_PUT, key, value).len(),
                        None => encode_frame(OP_DELETE, key, &[]).len(),
                    };
                    if boundary + len > cut {
                        break;
                    }
                    boundary += len;
                }
                prop_assert_eq!(valid, boundary);
            }
        }
    }
}
