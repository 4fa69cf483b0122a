//! Agent-managed response caches.
//!
//! The agent keeps named caches of fetched responses. The manager touches
//! them in exactly three ways: enumerating and deleting whole caches during
//! a purge, and re-inserting critical resources into the primary cache on
//! launch. One directory per cache, one file per cached URL.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::host::HostCapabilities;
use crate::store::kv::sanitize;

/// Name prefix of the primary (pre-populated) cache.
const PRECACHE_PREFIX: &str = "precache";

/// Cache created when no primary cache survives on disk.
const FALLBACK_CACHE: &str = "critical-cache";

pub struct ResponseCacheSet {
    root: PathBuf,
    available: bool,
}

impl ResponseCacheSet {
    pub fn new(root: PathBuf, caps: &HostCapabilities) -> Self {
        let available = caps.has_durable_storage && std::fs::create_dir_all(&root).is_ok();
        if !available {
            debug!(?root, "response caches unavailable, operating degraded");
        }
        Self { root, available }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Names of every cache currently present.
    pub fn cache_names(&self) -> Vec<String> {
        if !self.available {
            return Vec::new();
        }
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to enumerate response caches");
                return Vec::new();
            }
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Open (creating if needed) the cache with the given name.
    pub fn open(&self, name: &str) -> ResponseCache {
        let dir = self.root.join(sanitize(name));
        let available = self.available && std::fs::create_dir_all(&dir).is_ok();
        ResponseCache { dir, available }
    }

    /// The cache the launch re-priming targets: the surviving primary
    /// cache, or a fresh fallback when the host evicted everything.
    pub fn primary(&self) -> ResponseCache {
        let name = self
            .cache_names()
            .into_iter()
            .find(|n| n.starts_with(PRECACHE_PREFIX))
            .unwrap_or_else(|| FALLBACK_CACHE.to_string());
        self.open(&name)
    }

    /// Delete one cache wholesale.
    pub fn delete(&self, name: &str) -> bool {
        if !self.available {
            return false;
        }
        let dir = self.root.join(sanitize(name));
        if !dir.exists() {
            return false;
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(name, "deleted response cache");
                true
            }
            Err(e) => {
                warn!(name, error = %e, "failed to delete response cache");
                false
            }
        }
    }

    /// Delete every cache. Returns how many were removed; individual
    /// failures are logged and skipped.
    pub fn delete_all(&self) -> usize {
        let names = self.cache_names();
        names.iter().filter(|name| self.delete(name)).count()
    }
}

/// One named response cache.
pub struct ResponseCache {
    dir: PathBuf,
    available: bool,
}

impl ResponseCache {
    fn entry_path(&self, url: &str) -> PathBuf {
        self.dir.join(sanitize(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.available && self.entry_path(url).exists()
    }

    pub fn put(&self, url: &str, body: &[u8]) -> bool {
        if !self.available {
            return false;
        }
        match std::fs::write(self.entry_path(url), body) {
            Ok(()) => true,
            Err(e) => {
                warn!(url, error = %e, "failed to cache response");
                false
            }
        }
    }

    pub fn match_url(&self, url: &str) -> Option<Vec<u8>> {
        if !self.available {
            return None;
        }
        let path = self.entry_path(url);
        if !path.exists() {
            return None;
        }
        match std::fs::read(&path) {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(url, error = %e, "failed to read cached response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn caches() -> (TempDir, ResponseCacheSet) {
        let dir = TempDir::new().unwrap();
        let set = ResponseCacheSet::new(dir.path().join("caches"), &HostCapabilities::full());
        (dir, set)
    }

    #[test]
    fn test_put_and_match() {
        let (_dir, set) = caches();
        let cache = set.open("precache-v1");
        let url = "https://app.example.com/offline.html";
        assert!(!cache.contains(url));
        assert!(cache.put(url, b"<html>offline</html>"));
        assert!(cache.contains(url));
        assert_eq!(cache.match_url(url), Some(b"<html>offline</html>".to_vec()));
    }

    #[test]
    fn test_enumerate_and_delete_all() {
        let (_dir, set) = caches();
        set.open("precache-v1").put("https://a/", b"a");
        set.open("runtime").put("https://b/", b"b");

        let mut names = set.cache_names();
        names.sort();
        assert_eq!(names, vec!["precache-v1", "runtime"]);

        assert_eq!(set.delete_all(), 2);
        assert!(set.cache_names().is_empty());
    }

    #[test]
    fn test_primary_prefers_surviving_precache() {
        let (_dir, set) = caches();
        set.open("precache-v2").put("https://a/", b"a");
        set.open("runtime").put("https://b/", b"b");

        let primary = set.primary();
        assert!(primary.contains("https://a/"));
    }

    #[test]
    fn test_primary_falls_back_when_evicted() {
        let (_dir, set) = caches();
        // Host wiped everything while the app was dormant.
        let primary = set.primary();
        assert!(primary.put("https://a/", b"a"));
        assert!(set.cache_names().contains(&"critical-cache".to_string()));
    }

    #[test]
    fn test_degraded_host() {
        let dir = TempDir::new().unwrap();
        let set = ResponseCacheSet::new(dir.path().join("caches"), &HostCapabilities::degraded());
        assert!(!set.is_available());
        assert!(set.cache_names().is_empty());
        assert!(!set.open("x").put("https://a/", b"a"));
        assert_eq!(set.delete_all(), 0);
    }
}
