//! Ephemeral session-scoped storage.
//!
//! Lives exactly as long as the owning manager instance, the way
//! tab-lifetime storage lives as long as the tab. Holds the refresh
//! cooldown record and other temporary state. The availability flag exists
//! because restricted hosts can deny even this tier; consumers must treat
//! unavailability as a soft condition.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

pub struct SessionStore {
    available: bool,
    entries: Mutex<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.available {
            return None;
        }
        let entries = self.entries.lock().ok()?;
        let raw = entries.get(key)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "session store: failed to parse entry");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        if !self.available {
            return false;
        }
        let raw = match serde_json::to_string(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(key, error = %e, "session store: failed to serialize entry");
                return false;
            }
        };
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_string(), raw);
                true
            }
            Err(_) => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        if !self.available {
            return false;
        }
        self.entries
            .lock()
            .map(|mut e| e.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let store = SessionStore::new(true);
        assert!(store.set("k", &42));
        assert_eq!(store.get::<i32>("k"), Some(42));
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = SessionStore::new(true);
        store.set("a", &1);
        store.set("b", &2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get::<i32>("a"), None);
    }

    #[test]
    fn test_unavailable_store_noops() {
        let store = SessionStore::new(false);
        assert!(!store.set("k", &1));
        assert_eq!(store.get::<i32>("k"), None);
        assert!(!store.remove("k"));
    }
}
