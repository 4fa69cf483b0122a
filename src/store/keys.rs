//! Persisted key namespace.
//!
//! Every persisted key belongs to exactly one of two partitions: the cache
//! partition (derived data, purged on version change) and everything else
//! (user data, preserved across every version transition). New persisted
//! keys introduced by the application must respect this partition.

/// Previous-version record written by the version oracle. User-data
/// partition: survives purges.
pub const APP_VERSION: &str = "app_version";

/// Bounded version-transition history. User-data partition.
pub const VERSION_HISTORY: &str = "version_history";

/// Session-scoped key holding the last forced-reload timestamp (epoch ms).
pub const REFRESH_TIMESTAMP: &str = "refresh_timestamp";

/// Sentinel key for the offline store availability probe.
pub const STORE_PROBE: &str = "__store_probe__";

/// Reference cache partition: fetched rate tables and derived indexes that
/// are safe to rebuild from the network.
pub const DEFAULT_CACHE_KEYS: &[&str] = &["rate_table", "rate_table_history", "resource_manifest"];

/// The cache partition of the persisted key namespace.
///
/// An automated purge removes these keys and nothing else.
#[derive(Debug, Clone)]
pub struct CacheKeySet {
    keys: Vec<String>,
}

impl CacheKeySet {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The reference partition.
    pub fn reference() -> Self {
        Self::new(DEFAULT_CACHE_KEYS.iter().copied())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl Default for CacheKeySet {
    fn default() -> Self {
        Self::reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_keys_are_outside_cache_partition() {
        let set = CacheKeySet::reference();
        assert!(!set.contains(APP_VERSION));
        assert!(!set.contains(VERSION_HISTORY));
    }

    #[test]
    fn test_reference_partition_membership() {
        let set = CacheKeySet::reference();
        assert!(set.contains("rate_table"));
        assert!(!set.contains("user_preferences"));
    }
}
