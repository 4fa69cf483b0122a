//! Durable key/value storage.
//!
//! One JSON file per key under the store root. This is the tier behind the
//! version records and the purgeable application keys; it is best-effort
//! cache infrastructure, never a source of truth, so every operation
//! swallows its own failures and reports them as a miss.

use std::path::PathBuf;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::host::HostCapabilities;

pub struct KeyStore {
    root: PathBuf,
    available: bool,
}

impl KeyStore {
    /// Open the store under `root`. Unavailable hosts get a store whose
    /// every read is a miss and every write a no-op.
    pub fn new(root: PathBuf, caps: &HostCapabilities) -> Self {
        let available = caps.has_durable_storage && std::fs::create_dir_all(&root).is_ok();
        if !available {
            debug!(?root, "key store unavailable, operating degraded");
        }
        Self { root, available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(key)))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.available {
            return None;
        }
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "failed to read key entry");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "failed to parse key entry");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        if !self.available {
            return false;
        }
        let contents = match serde_json::to_string_pretty(value) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize key entry");
                return false;
            }
        };
        match std::fs::write(self.entry_path(key), contents) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "failed to write key entry");
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        if !self.available {
            return false;
        }
        let path = self.entry_path(key);
        if !path.exists() {
            return false;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "failed to remove key entry");
                false
            }
        }
    }

    /// All keys currently present.
    pub fn keys(&self) -> Vec<String> {
        if !self.available {
            return Vec::new();
        }
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to list key store");
                return Vec::new();
            }
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect()
    }
}

/// Keys become file names; keep them to a safe character set.
pub(crate) fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, KeyStore) {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("kv"), &HostCapabilities::full());
        (dir, store)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, store) = store();
        assert!(store.set("rate_table", &vec![1.0, 2.5]));
        assert_eq!(store.get::<Vec<f64>>("rate_table"), Some(vec![1.0, 2.5]));
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_dir, store) = store();
        assert_eq!(store.get::<String>("nope"), None);
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = store();
        store.set("k", &"v");
        assert!(store.remove("k"));
        assert_eq!(store.get::<String>("k"), None);
        assert!(!store.remove("k"));
    }

    #[test]
    fn test_keys_lists_entries() {
        let (_dir, store) = store();
        store.set("a", &1);
        store.set("b", &2);
        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_degraded_host_misses_everything() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("kv"), &HostCapabilities::degraded());
        assert!(!store.is_available());
        assert!(!store.set("k", &"v"));
        assert_eq!(store.get::<String>("k"), None);
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let (dir, store) = store();
        store.set("k", &"v");
        std::fs::write(dir.path().join("kv").join("k.json"), "not json").unwrap();
        assert_eq!(store.get::<String>("k"), None);
    }
}
