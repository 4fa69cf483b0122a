//! Durable offline store with soft expiry.
//!
//! The second tier behind the short-lived hot cache. The hot tier is evicted
//! aggressively by the host under storage pressure; this one is not, so it
//! serves as the last-resort fallback when both the live fetch and the fresh
//! cache have failed.
//!
//! Each logical key is stored as two entries: the value and its write
//! timestamp. Expiry is soft: an expired entry reads as `None` through
//! [`OfflineStore::get`] but is never deleted, and [`OfflineStore::get_any_age`]
//! still returns it.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::host::HostCapabilities;
use crate::store::keys::STORE_PROBE;
use crate::store::kv::sanitize;

/// Default retention window: 7 days, versus minutes for the hot tier.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Suffix of the timestamp entry paired with every value entry.
const TIMESTAMP_SUFFIX: &str = ".timestamp";

pub struct OfflineStore {
    root: PathBuf,
    available: bool,
}

impl OfflineStore {
    pub fn new(root: PathBuf, caps: &HostCapabilities) -> Self {
        let available = caps.has_durable_storage && std::fs::create_dir_all(&root).is_ok();
        if !available {
            debug!(?root, "offline store unavailable, operating degraded");
        }
        Self { root, available }
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(key)))
    }

    fn timestamp_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{}.json", sanitize(key), TIMESTAMP_SUFFIX))
    }

    /// Write value then timestamp. A crash between the two leaves a value
    /// without a timestamp, which later reads treat as absent; acceptable
    /// for a best-effort cache.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        if !self.available {
            return false;
        }
        let contents = match serde_json::to_string(value) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "offline store: failed to serialize value");
                return false;
            }
        };
        if let Err(e) = std::fs::write(self.value_path(key), contents) {
            warn!(key, error = %e, "offline store: failed to write value");
            return false;
        }
        let now_ms = Utc::now().timestamp_millis();
        if let Err(e) = std::fs::write(self.timestamp_path(key), now_ms.to_string()) {
            warn!(key, error = %e, "offline store: failed to write timestamp");
            return false;
        }
        debug!(key, "offline store: data saved");
        true
    }

    /// Read a value no older than `max_age`. Expired entries are left in
    /// place and read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, max_age: Duration) -> Option<T> {
        let written_at = self.written_at(key)?;
        let age = Utc::now().signed_duration_since(written_at);
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        if age > max_age {
            debug!(
                key,
                age_minutes = age.num_minutes(),
                max_age_minutes = max_age.num_minutes(),
                "offline store: data expired"
            );
            return None;
        }
        self.read_value(key)
    }

    /// Read a value ignoring expiry. Last-resort fallback only.
    pub fn get_any_age<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read_value(key)
    }

    /// Read a value ignoring expiry, together with its staleness grade so
    /// the caller can decide whether to trust it.
    pub fn get_with_staleness<T: DeserializeOwned>(&self, key: &str) -> (Option<T>, StalenessInfo) {
        let staleness = calculate_staleness(self.written_at(key));
        (self.read_value(key), staleness)
    }

    /// Remove both the value and its timestamp entry.
    pub fn delete(&self, key: &str) -> bool {
        if !self.available {
            return false;
        }
        let removed_value = std::fs::remove_file(self.value_path(key)).is_ok();
        let removed_ts = std::fs::remove_file(self.timestamp_path(key)).is_ok();
        if removed_value || removed_ts {
            debug!(key, "offline store: data deleted");
        }
        removed_value || removed_ts
    }

    /// Capability probe: sentinel write/read/delete round trip.
    pub fn is_available(&self) -> bool {
        if !self.available {
            return false;
        }
        let probe = Utc::now().timestamp_millis();
        if !self.set(STORE_PROBE, &probe) {
            return false;
        }
        let read = self.get_any_age::<i64>(STORE_PROBE);
        self.delete(STORE_PROBE);
        read == Some(probe)
    }

    fn written_at(&self, key: &str) -> Option<DateTime<Utc>> {
        if !self.available {
            return None;
        }
        let path = self.timestamp_path(key);
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(key, error = %e, "offline store: failed to read timestamp");
                return None;
            }
        };
        let ms: i64 = match raw.trim().parse() {
            Ok(ms) => ms,
            Err(e) => {
                warn!(key, error = %e, "offline store: failed to parse timestamp");
                return None;
            }
        };
        Utc.timestamp_millis_opt(ms).single()
    }

    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.available {
            return None;
        }
        let path = self.value_path(key);
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(key, error = %e, "offline store: failed to read value");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "offline store: failed to parse value");
                None
            }
        }
    }

    #[cfg(test)]
    fn backdate(&self, key: &str, age: Duration) {
        let ms = (Utc::now() - chrono::Duration::from_std(age).unwrap()).timestamp_millis();
        std::fs::write(self.timestamp_path(key), ms.to_string()).unwrap();
    }
}

// ============================================================================
// Staleness grading
// ============================================================================

/// Fresh (< 5 min), recent (< 30 min), stale (< 24 h), very stale (< 7 d),
/// expired (older, or age unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Recent,
    Stale,
    VeryStale,
    Expired,
}

const FRESH_LIMIT: Duration = Duration::from_secs(5 * 60);
const RECENT_LIMIT: Duration = Duration::from_secs(30 * 60);
const STALE_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);
const VERY_STALE_LIMIT: Duration = DEFAULT_RETENTION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessInfo {
    pub level: Staleness,
    /// `None` when no timestamp entry exists.
    pub age: Option<chrono::Duration>,
    pub is_expired: bool,
    pub should_warn: bool,
}

impl StalenessInfo {
    /// Human-readable age for status displays.
    pub fn message(&self) -> String {
        let Some(age) = self.age else {
            return "data age unknown".to_string();
        };
        match self.level {
            Staleness::Fresh => "up to date".to_string(),
            Staleness::Recent => format!("updated {}m ago", age.num_minutes()),
            Staleness::Stale => {
                if age.num_hours() > 0 {
                    format!("updated {}h ago", age.num_hours())
                } else {
                    format!("updated {}m ago", age.num_minutes())
                }
            }
            Staleness::VeryStale => {
                if age.num_days() > 0 {
                    format!("updated {}d ago", age.num_days())
                } else {
                    format!("updated {}h ago", age.num_hours())
                }
            }
            Staleness::Expired => format!("data expired ({}d old)", age.num_days()),
        }
    }
}

/// Grade the age of a record written at `written_at`.
pub fn calculate_staleness(written_at: Option<DateTime<Utc>>) -> StalenessInfo {
    let Some(written_at) = written_at else {
        return StalenessInfo {
            level: Staleness::Expired,
            age: None,
            is_expired: true,
            should_warn: true,
        };
    };

    let age = Utc::now().signed_duration_since(written_at);
    let age_std = age.to_std().unwrap_or_default();

    let level = if age_std < FRESH_LIMIT {
        Staleness::Fresh
    } else if age_std < RECENT_LIMIT {
        Staleness::Recent
    } else if age_std < STALE_LIMIT {
        Staleness::Stale
    } else if age_std < VERY_STALE_LIMIT {
        Staleness::VeryStale
    } else {
        Staleness::Expired
    };

    StalenessInfo {
        level,
        age: Some(age),
        is_expired: level == Staleness::Expired,
        should_warn: !matches!(level, Staleness::Fresh | Staleness::Recent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct RateTable {
        base: String,
        rates: Vec<(String, f64)>,
    }

    fn sample() -> RateTable {
        RateTable {
            base: "USD".to_string(),
            rates: vec![("EUR".to_string(), 0.92), ("JPY".to_string(), 151.3)],
        }
    }

    fn store() -> (TempDir, OfflineStore) {
        let dir = TempDir::new().unwrap();
        let store = OfflineStore::new(dir.path().join("offline-db"), &HostCapabilities::full());
        (dir, store)
    }

    #[test]
    fn test_round_trip_within_max_age() {
        let (_dir, store) = store();
        assert!(store.set("rate_table", &sample()));
        let read = store.get::<RateTable>("rate_table", Duration::from_secs(60));
        assert_eq!(read, Some(sample()));
    }

    #[test]
    fn test_expired_read_is_none_but_any_age_survives() {
        let (_dir, store) = store();
        store.set("rate_table", &sample());
        store.backdate("rate_table", Duration::from_secs(3600));

        assert_eq!(
            store.get::<RateTable>("rate_table", Duration::from_secs(60)),
            None
        );
        // Expiry must not delete: the any-age fallback still works.
        assert_eq!(store.get_any_age::<RateTable>("rate_table"), Some(sample()));
    }

    #[test]
    fn test_missing_timestamp_reads_as_absent() {
        let (dir, store) = store();
        store.set("k", &1);
        std::fs::remove_file(dir.path().join("offline-db").join("k.timestamp.json")).unwrap();
        assert_eq!(store.get::<i32>("k", Duration::from_secs(60)), None);
    }

    #[test]
    fn test_delete_removes_both_entries() {
        let (dir, store) = store();
        store.set("k", &1);
        assert!(store.delete("k"));
        assert_eq!(store.get_any_age::<i32>("k"), None);
        assert!(!dir.path().join("offline-db").join("k.json").exists());
        assert!(!dir.path().join("offline-db").join("k.timestamp.json").exists());
    }

    #[test]
    fn test_availability_probe() {
        let (_dir, store) = store();
        assert!(store.is_available());

        let dir = TempDir::new().unwrap();
        let degraded = OfflineStore::new(dir.path().join("db"), &HostCapabilities::degraded());
        assert!(!degraded.is_available());
        assert!(!degraded.set("k", &1));
        assert_eq!(degraded.get::<i32>("k", Duration::from_secs(60)), None);
    }

    #[test]
    fn test_staleness_levels() {
        let at = |age: Duration| Some(Utc::now() - chrono::Duration::from_std(age).unwrap());

        assert_eq!(calculate_staleness(at(Duration::from_secs(10))).level, Staleness::Fresh);
        assert_eq!(
            calculate_staleness(at(Duration::from_secs(10 * 60))).level,
            Staleness::Recent
        );
        assert_eq!(
            calculate_staleness(at(Duration::from_secs(2 * 60 * 60))).level,
            Staleness::Stale
        );
        assert_eq!(
            calculate_staleness(at(Duration::from_secs(3 * 24 * 60 * 60))).level,
            Staleness::VeryStale
        );
        assert_eq!(
            calculate_staleness(at(Duration::from_secs(8 * 24 * 60 * 60))).level,
            Staleness::Expired
        );
    }

    #[test]
    fn test_staleness_unknown_age_is_expired() {
        let info = calculate_staleness(None);
        assert_eq!(info.level, Staleness::Expired);
        assert!(info.is_expired);
        assert!(info.should_warn);
        assert_eq!(info.age, None);
    }

    #[test]
    fn test_get_with_staleness_returns_expired_value() {
        let (_dir, store) = store();
        store.set("rate_table", &sample());
        store.backdate("rate_table", Duration::from_secs(8 * 24 * 60 * 60));

        let (value, staleness) = store.get_with_staleness::<RateTable>("rate_table");
        assert_eq!(value, Some(sample()));
        assert!(staleness.is_expired);
    }
}
