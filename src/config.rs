//! Manager configuration and build identity.
//!
//! All timing windows and resource lists ship with the reference defaults
//! but are plain fields, so an embedder (or a test) can override any of them
//! at construction time.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::CacheKeySet;

/// Directory name under the platform cache dir for all persisted tiers
const APP_DIR: &str = "evergreen";

/// Minimum gap between forced reloads.
/// 30s is long enough to break a reload storm while short enough that a
/// second legitimate recovery is not blocked for long.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// How often to probe the origin for a newer served build.
pub const DEFAULT_VERSION_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How often to ask the agent to revalidate its script.
/// The host only revalidates on navigation, which a long-lived session
/// may never trigger.
pub const DEFAULT_AGENT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Countdown shown by the update prompt before an automatic refresh.
pub const DEFAULT_UPDATE_COUNTDOWN: Duration = Duration::from_secs(10);

/// Retries after the initial attempt for a supervised module load.
pub const DEFAULT_LOAD_RETRIES: u32 = 3;

/// Base delay between load retries; grows linearly with the attempt number.
pub const DEFAULT_LOAD_RETRY_DELAY: Duration = Duration::from_secs(1);

/// HTTP request timeout.
/// 30s allows for slow origins while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifies a deployed build: semantic version plus build timestamp.
/// Produced at build time; compared, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub build_time: DateTime<Utc>,
}

impl BuildInfo {
    pub fn new(version: impl Into<String>, build_time: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            build_time,
        }
    }
}

/// Execution environment of the embedding application.
///
/// Development builds carry placeholder build markers, so the version check
/// interval is disabled there to avoid a permanent false "update available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn is_development(self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Configuration for an [`UpdateManager`](crate::manager::UpdateManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// The running build.
    pub build: BuildInfo,
    pub environment: Environment,

    /// Origin serving the application, e.g. `https://app.example.com`.
    pub origin: String,
    /// Base path under the origin, e.g. `/` or `/ratewise/`.
    pub base_path: String,
    /// Path of the background agent script under the origin.
    pub agent_script_path: String,

    /// Assets that must be cache-resident after every launch.
    pub critical_resources: Vec<String>,

    /// The purgeable partition of the persisted key namespace.
    pub cache_keys: CacheKeySet,

    /// Root directory for the durable storage tiers.
    pub storage_root: PathBuf,

    pub cooldown: Duration,
    pub version_check_interval: Duration,
    pub agent_poll_interval: Duration,
    pub update_countdown: Duration,
    pub load_retries: u32,
    pub load_retry_delay: Duration,
    pub request_timeout: Duration,
}

impl ManagerConfig {
    /// Reference configuration for the given build and origin.
    pub fn new(build: BuildInfo, origin: impl Into<String>) -> Self {
        Self {
            build,
            environment: Environment::Production,
            origin: origin.into(),
            base_path: "/".to_string(),
            agent_script_path: "/agent.js".to_string(),
            critical_resources: default_critical_resources(),
            cache_keys: CacheKeySet::reference(),
            storage_root: default_storage_root(),
            cooldown: DEFAULT_COOLDOWN,
            version_check_interval: DEFAULT_VERSION_CHECK_INTERVAL,
            agent_poll_interval: DEFAULT_AGENT_POLL_INTERVAL,
            update_countdown: DEFAULT_UPDATE_COUNTDOWN,
            load_retries: DEFAULT_LOAD_RETRIES,
            load_retry_delay: DEFAULT_LOAD_RETRY_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Absolute URL for a base-relative path.
    pub fn resource_url(&self, path: &str) -> String {
        let origin = self.origin.trim_end_matches('/');
        let base = self.base_path.trim_matches('/');
        let path = path.trim_start_matches('/');
        if base.is_empty() {
            format!("{}/{}", origin, path)
        } else if path.is_empty() {
            format!("{}/{}/", origin, base)
        } else {
            format!("{}/{}/{}", origin, base, path)
        }
    }

    /// URL of the served entry document (no cache-busting applied).
    pub fn entry_document_url(&self) -> String {
        self.resource_url("")
    }

    /// URL of the background agent script.
    pub fn agent_script_url(&self) -> String {
        self.resource_url(&self.agent_script_path)
    }
}

/// The assets a launch must guarantee are cache-resident: entry document,
/// offline fallback, manifest, icons.
fn default_critical_resources() -> Vec<String> {
    vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/manifest.webmanifest".to_string(),
        "/icons/icon-192x192.png".to_string(),
        "/icons/icon-512x512.png".to_string(),
    ]
}

fn default_storage_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}
