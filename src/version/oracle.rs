//! Persisted version records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BuildInfo;
use crate::store::{keys, KeyStore};

/// History is bounded; the oldest entries are evicted first.
const MAX_HISTORY_ENTRIES: usize = 10;

/// One recorded version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

pub struct VersionOracle {
    build: BuildInfo,
    store: Arc<KeyStore>,
}

impl VersionOracle {
    pub fn new(build: BuildInfo, store: Arc<KeyStore>) -> Self {
        Self { build, store }
    }

    /// The running build's version, from compiled-in configuration.
    pub fn current_version(&self) -> &str {
        &self.build.version
    }

    pub fn build(&self) -> &BuildInfo {
        &self.build
    }

    /// The version recorded by the previous run, if any.
    pub fn previous_version(&self) -> Option<String> {
        self.store.get::<String>(keys::APP_VERSION)
    }

    /// Overwrite the persisted previous-version record with the current one.
    pub fn save_current_version(&self) {
        if self.store.set(keys::APP_VERSION, &self.build.version) {
            info!(version = %self.build.version, "version saved");
        }
    }

    /// False on first run (nothing recorded yet) or when the recorded
    /// version equals the running one.
    pub fn has_version_changed(&self) -> bool {
        match self.previous_version() {
            None => false,
            Some(previous) => previous != self.build.version,
        }
    }

    /// Append the running version to the transition history. No-op when
    /// there was no transition.
    pub fn record_version_update(&self) {
        let Some(previous) = self.previous_version() else {
            return;
        };
        if previous == self.build.version {
            return;
        }

        let mut history = self.version_history();
        history.push(VersionHistoryEntry {
            version: self.build.version.clone(),
            timestamp: Utc::now(),
        });
        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }

        if !self.store.set(keys::VERSION_HISTORY, &history) {
            warn!("failed to record version update");
            return;
        }
        info!(from = %previous, to = %self.build.version, "version update recorded");
    }

    /// The recorded transition history, oldest first.
    pub fn version_history(&self) -> Vec<VersionHistoryEntry> {
        self.store
            .get::<Vec<VersionHistoryEntry>>(keys::VERSION_HISTORY)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostCapabilities;
    use tempfile::TempDir;

    fn oracle(version: &str) -> (TempDir, VersionOracle) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(KeyStore::new(
            dir.path().join("kv"),
            &HostCapabilities::full(),
        ));
        let build = BuildInfo::new(version, Utc::now());
        (dir, VersionOracle::new(build, store))
    }

    fn oracle_on(dir: &TempDir, version: &str) -> VersionOracle {
        let store = Arc::new(KeyStore::new(
            dir.path().join("kv"),
            &HostCapabilities::full(),
        ));
        VersionOracle::new(BuildInfo::new(version, Utc::now()), store)
    }

    #[test]
    fn test_first_run_is_not_a_change() {
        let (_dir, oracle) = oracle("1.0.0");
        assert_eq!(oracle.previous_version(), None);
        assert!(!oracle.has_version_changed());
    }

    #[test]
    fn test_save_then_no_change() {
        let (_dir, oracle) = oracle("1.0.0");
        oracle.save_current_version();
        assert_eq!(oracle.previous_version(), Some("1.0.0".to_string()));
        assert!(!oracle.has_version_changed());
    }

    #[test]
    fn test_new_build_is_a_change() {
        let (dir, oracle) = oracle("1.0.0");
        oracle.save_current_version();

        let upgraded = oracle_on(&dir, "1.1.0");
        assert!(upgraded.has_version_changed());
        upgraded.save_current_version();
        assert_eq!(upgraded.previous_version(), Some("1.1.0".to_string()));
        assert!(!upgraded.has_version_changed());
    }

    #[test]
    fn test_record_noops_without_transition() {
        let (_dir, oracle) = oracle("1.0.0");
        // First run: no previous version recorded.
        oracle.record_version_update();
        assert!(oracle.version_history().is_empty());

        // Same version recorded: still no transition.
        oracle.save_current_version();
        oracle.record_version_update();
        assert!(oracle.version_history().is_empty());
    }

    #[test]
    fn test_record_appends_transition() {
        let (dir, oracle) = oracle("1.0.0");
        oracle.save_current_version();

        let upgraded = oracle_on(&dir, "1.1.0");
        upgraded.record_version_update();

        let history = upgraded.version_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "1.1.0");
    }

    #[test]
    fn test_history_is_bounded_to_ten() {
        let (dir, oracle) = oracle("0.0.0");
        oracle.save_current_version();

        for i in 1..=12 {
            let version = format!("0.0.{}", i);
            let next = oracle_on(&dir, &version);
            next.record_version_update();
            next.save_current_version();
        }

        let history = oracle_on(&dir, "0.0.12").version_history();
        assert_eq!(history.len(), 10);
        // Oldest entries were evicted first.
        assert_eq!(history[0].version, "0.0.3");
        assert_eq!(history[9].version, "0.0.12");
    }
}
