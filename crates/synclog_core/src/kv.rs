//! Key/value side-store for sequence bookkeeping and the intent marker.
//!
//! The engine persists exactly three things here: the current pool
//! index, the next free in-pool index, and (transiently) the
//! write-ahead intent marker. The store must provide atomic single-key
//! read-modify-write; no cross-key transaction is required.

use crate::error::CoreResult;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A tiny named-scalar store.
pub trait KvStore: Send + Sync {
    /// Reads the raw bytes stored under `key`.
    fn get_raw(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Stores raw bytes under `key`, replacing any previous value.
    fn set_raw(&self, key: &str, value: Vec<u8>) -> CoreResult<()>;

    /// Stores several keys in one durable step where the backend can.
    fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> CoreResult<()> {
        for (key, value) in entries {
            self.set_raw(&key, value)?;
        }
        Ok(())
    }

    /// Removes `key`. Removing an absent key is not an error.
    fn del(&self, key: &str) -> CoreResult<()>;
}

/// Reads and decodes a JSON value stored under `key`.
pub fn get_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> CoreResult<Option<T>> {
    match kv.get_raw(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encodes and stores a JSON value under `key`.
pub fn set_json<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> CoreResult<()> {
    kv.set_raw(key, serde_json::to_vec(value)?)
}

/// An in-memory kv store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get_raw(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set_raw(&self, key: &str, value: Vec<u8>) -> CoreResult<()> {
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> CoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in entries {
            map.insert(key, value);
        }
        Ok(())
    }

    fn del(&self, key: &str) -> CoreResult<()> {
        self.map.write().remove(key);
        Ok(())
    }
}

/// A file-backed kv store.
///
/// The whole map is kept in memory and rewritten to disk on every
/// mutation via a temp file plus rename, which gives the single-key
/// atomicity the append protocol relies on. Values are stored as JSON
/// so the file stays inspectable.
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    map: RwLock<HashMap<String, serde_json::Value>>,
}

impl FileKv {
    /// Opens or creates the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let map = if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            map: RwLock::new(map),
        })
    }

    fn persist(&self, map: &HashMap<String, serde_json::Value>) -> CoreResult<()> {
        let bytes = serde_json::to_vec_pretty(map)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KvStore for FileKv {
    fn get_raw(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        match self.map.read().get(key) {
            Some(value) => Ok(Some(serde_json::to_vec(value)?)),
            None => Ok(None),
        }
    }

    fn set_raw(&self, key: &str, value: Vec<u8>) -> CoreResult<()> {
        let value: serde_json::Value = serde_json::from_slice(&value)?;

        let mut map = self.map.write();
        map.insert(key.to_string(), value);
        self.persist(&map)
    }

    fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> CoreResult<()> {
        let mut map = self.map.write();
        for (key, value) in entries {
            map.insert(key, serde_json::from_slice(&value)?);
        }
        self.persist(&map)
    }

    fn del(&self, key: &str) -> CoreResult<()> {
        let mut map = self.map.write();
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_kv_roundtrip() {
        let kv = MemoryKv::new();
        assert!(get_json::<u64>(&kv, "counter").unwrap().is_none());

        set_json(&kv, "counter", &42u64).unwrap();
        assert_eq!(get_json::<u64>(&kv, "counter").unwrap(), Some(42));

        kv.del("counter").unwrap();
        assert!(get_json::<u64>(&kv, "counter").unwrap().is_none());
        // Deleting again is a no-op.
        kv.del("counter").unwrap();
    }

    #[test]
    fn file_kv_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.json");

        {
            let kv = FileKv::open(&path).unwrap();
            set_json(&kv, "cur_log_pool", &3u64).unwrap();
            set_json(&kv, "next_log_id_on_current_pool", &1u64).unwrap();
        }

        let kv = FileKv::open(&path).unwrap();
        assert_eq!(get_json::<u64>(&kv, "cur_log_pool").unwrap(), Some(3));
        assert_eq!(
            get_json::<u64>(&kv, "next_log_id_on_current_pool").unwrap(),
            Some(1)
        );
    }

    #[test]
    fn file_kv_set_many_is_one_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kv.json");

        let kv = FileKv::open(&path).unwrap();
        kv.set_many(vec![
            ("a".to_string(), serde_json::to_vec(&1u64).unwrap()),
            ("b".to_string(), serde_json::to_vec(&2u64).unwrap()),
        ])
        .unwrap();

        let kv = FileKv::open(&path).unwrap();
        assert_eq!(get_json::<u64>(&kv, "a").unwrap(), Some(1));
        assert_eq!(get_json::<u64>(&kv, "b").unwrap(), Some(2));
    }

    #[test]
    fn file_kv_stores_structured_values() {
        let dir = tempdir().unwrap();
        let kv = FileKv::open(&dir.path().join("kv.json")).unwrap();

        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Marker {
            pool: u64,
            index: u64,
        }

        set_json(&kv, ":recover-log", &Marker { pool: 1, index: 2 }).unwrap();
        assert_eq!(
            get_json::<Marker>(&kv, ":recover-log").unwrap(),
            Some(Marker { pool: 1, index: 2 })
        );
    }
}
