//! Storage persistence and quota monitoring.
//!
//! Some hosts silently evict the whole response cache while an installed
//! application is dormant, and some under-report their effective quota.
//! The monitor requests durable-storage privilege, measures usage against a
//! conservative fixed ceiling, and re-primes the critical assets into the
//! primary response cache on every cold start instead of assuming the
//! cache survived.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::{header, Client};
use tracing::{debug, info, warn};

use crate::agent::ResponseCacheSet;
use crate::config::ManagerConfig;
use crate::host::HostCapabilities;

/// Tightest known host quota. Usage is judged against this ceiling even
/// when the host reports a larger one, because some hosts under-report
/// their effective limit.
const CONSERVATIVE_QUOTA: u64 = 50 * 1024 * 1024;

/// Fraction of the conservative ceiling that counts as "near limit".
const NEAR_LIMIT_FRACTION: f64 = 0.8;

/// Marker file recording a granted persistence request.
const PERSIST_MARKER: &str = ".persistent";

/// Concurrent re-priming fetches. Five keeps launch fast without hammering
/// the origin.
const MAX_CONCURRENT_RECACHE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoragePersistenceStatus {
    pub is_supported: bool,
    pub is_persistent: bool,
    pub quota: u64,
    pub usage: u64,
    /// Usage over the effective quota, 0.0..=1.0.
    pub usage_percentage: f64,
    pub is_near_limit: bool,
}

impl StoragePersistenceStatus {
    fn unsupported() -> Self {
        Self {
            is_supported: false,
            is_persistent: false,
            quota: 0,
            usage: 0,
            usage_percentage: 0.0,
            is_near_limit: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CriticalResourceStatus {
    pub path: String,
    pub is_cached: bool,
}

/// Read-only diagnostic snapshot.
#[derive(Debug, Clone)]
pub struct CacheHealth {
    pub is_supported: bool,
    pub cache_count: usize,
    pub cache_names: Vec<String>,
    pub critical_resources: Vec<CriticalResourceStatus>,
    pub storage: StoragePersistenceStatus,
}

pub struct StorageMonitor {
    config: ManagerConfig,
    caps: HostCapabilities,
    caches: Arc<ResponseCacheSet>,
    client: Client,
}

impl StorageMonitor {
    pub fn new(
        config: ManagerConfig,
        caps: HostCapabilities,
        caches: Arc<ResponseCacheSet>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build storage monitor client")?;
        Ok(Self {
            config,
            caps,
            caches,
            client,
        })
    }

    /// Request upgraded storage durability from the host. Idempotent:
    /// already-granted requests return true without side effects.
    pub fn request_persistent_storage(&self) -> bool {
        if !self.caps.has_durable_storage {
            warn!("durable storage not supported");
            return false;
        }

        let marker = self.config.storage_root.join(PERSIST_MARKER);
        if marker.exists() {
            info!("storage already persistent");
            return true;
        }

        if std::fs::create_dir_all(&self.config.storage_root).is_err() {
            warn!("persistent storage denied");
            return false;
        }
        match std::fs::write(&marker, b"") {
            Ok(()) => {
                info!("persistent storage granted");
                true
            }
            Err(e) => {
                warn!(error = %e, "persistent storage denied, cache may be cleared by host");
                false
            }
        }
    }

    pub fn storage_persistence_status(&self) -> StoragePersistenceStatus {
        if !self.caps.has_durable_storage {
            return StoragePersistenceStatus::unsupported();
        }

        let usage = dir_size(&self.config.storage_root);
        let quota = self.caps.reported_quota.unwrap_or(CONSERVATIVE_QUOTA);
        let usage_percentage = if quota > 0 {
            usage as f64 / quota as f64
        } else {
            0.0
        };

        StoragePersistenceStatus {
            is_supported: true,
            is_persistent: self.config.storage_root.join(PERSIST_MARKER).exists(),
            quota,
            usage,
            usage_percentage,
            is_near_limit: is_near_limit(usage),
        }
    }

    /// Verify every critical resource is present in the primary response
    /// cache, re-fetching the missing ones. Resources already cached are
    /// left untouched. Returns how many are confirmed present afterwards.
    pub async fn recache_critical_resources_on_launch(&self) -> usize {
        if !self.caches.is_available() {
            warn!("response caches unavailable, skipping launch re-priming");
            return 0;
        }

        info!("re-priming critical resources on launch");
        let cache = self.caches.primary();

        let confirmed = stream::iter(self.config.critical_resources.clone())
            .map(|path| {
                let url = self.config.resource_url(&path);
                let cache = &cache;
                async move {
                    if cache.contains(&url) {
                        debug!(url, "resource already cached");
                        return true;
                    }
                    if !self.caps.has_network {
                        warn!(url, "resource missing and no network to re-fetch");
                        return false;
                    }
                    match self.refetch(&url).await {
                        Ok(body) => {
                            let ok = cache.put(&url, &body);
                            if ok {
                                debug!(url, "resource re-cached");
                            }
                            ok
                        }
                        Err(e) => {
                            warn!(url, error = %e, "failed to re-cache resource");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(MAX_CONCURRENT_RECACHE)
            .filter(|present| futures::future::ready(*present))
            .count()
            .await;

        info!(
            total = self.config.critical_resources.len(),
            confirmed, "critical resource re-priming completed"
        );
        confirmed
    }

    async fn refetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            // Force revalidation rather than accepting an intermediary's copy.
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetch of {} returned {}", url, status);
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;
        Ok(body.to_vec())
    }

    /// Diagnostic snapshot: cache census, per-critical-resource presence,
    /// storage status.
    pub fn check_cache_health(&self) -> CacheHealth {
        let storage = self.storage_persistence_status();
        if !self.caches.is_available() {
            return CacheHealth {
                is_supported: false,
                cache_count: 0,
                cache_names: Vec::new(),
                critical_resources: Vec::new(),
                storage,
            };
        }

        let cache_names = self.caches.cache_names();
        let critical_resources = self
            .config
            .critical_resources
            .iter()
            .map(|path| {
                let url = self.config.resource_url(path);
                let is_cached = cache_names
                    .iter()
                    .any(|name| self.caches.open(name).contains(&url));
                CriticalResourceStatus {
                    path: path.clone(),
                    is_cached,
                }
            })
            .collect();

        CacheHealth {
            is_supported: true,
            cache_count: cache_names.len(),
            cache_names,
            critical_resources,
            storage,
        }
    }

    /// Launch sequence: request persistence, re-prime critical resources,
    /// log the resulting health. Never fails the caller.
    pub async fn init(&self) {
        info!("initializing storage monitor");

        let is_persistent = self.request_persistent_storage();
        let recached = self.recache_critical_resources_on_launch().await;
        let health = self.check_cache_health();

        info!(
            is_persistent,
            recached,
            cache_count = health.cache_count,
            usage_pct = %format!("{:.1}%", health.storage.usage_percentage * 100.0),
            "storage monitor initialized"
        );

        if health.storage.is_near_limit {
            warn!(
                usage = health.storage.usage,
                quota = health.storage.quota,
                "cache usage near the conservative quota ceiling"
            );
        }

        let missing: Vec<&str> = health
            .critical_resources
            .iter()
            .filter(|r| !r.is_cached)
            .map(|r| r.path.as_str())
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "critical resources not cached");
        }
    }
}

/// Usage above 80% of the conservative ceiling, regardless of what the
/// host reports.
fn is_near_limit(usage: u64) -> bool {
    usage as f64 > CONSERVATIVE_QUOTA as f64 * NEAR_LIMIT_FRACTION
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                dir_size(&path)
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildInfo;
    use chrono::Utc;
    use tempfile::TempDir;

    fn monitor(caps: HostCapabilities) -> (TempDir, StorageMonitor) {
        let dir = TempDir::new().unwrap();
        let mut config = ManagerConfig::new(
            BuildInfo::new("1.0.0", Utc::now()),
            "https://app.example.com",
        );
        config.storage_root = dir.path().to_path_buf();
        let caches = Arc::new(ResponseCacheSet::new(dir.path().join("caches"), &caps));
        let monitor = StorageMonitor::new(config, caps, caches).unwrap();
        (dir, monitor)
    }

    #[test]
    fn test_persistence_request_is_idempotent() {
        let (_dir, monitor) = monitor(HostCapabilities::full());
        assert!(monitor.request_persistent_storage());
        assert!(monitor.request_persistent_storage());
        assert!(monitor.storage_persistence_status().is_persistent);
    }

    #[test]
    fn test_degraded_host_yields_unsupported() {
        let (_dir, monitor) = monitor(HostCapabilities::degraded());
        assert!(!monitor.request_persistent_storage());
        let status = monitor.storage_persistence_status();
        assert!(!status.is_supported);
        assert_eq!(status.quota, 0);
    }

    #[test]
    fn test_status_uses_conservative_quota_by_default() {
        let (_dir, monitor) = monitor(HostCapabilities::full());
        let status = monitor.storage_persistence_status();
        assert_eq!(status.quota, CONSERVATIVE_QUOTA);
        assert!(!status.is_near_limit);
    }

    #[test]
    fn test_near_limit_ignores_reported_quota() {
        // A host reporting a huge quota does not move the ceiling.
        assert!(!is_near_limit(30 * 1024 * 1024));
        assert!(is_near_limit(45 * 1024 * 1024));
    }

    #[tokio::test]
    async fn test_recache_counts_present_resources_without_network() {
        let mut caps = HostCapabilities::full();
        caps.has_network = false;
        let (_dir, monitor) = monitor(caps);

        // Seed two of the critical resources into the primary cache.
        let cache = monitor.caches.open("precache-v1");
        cache.put(&monitor.config.resource_url("/"), b"<html></html>");
        cache.put(&monitor.config.resource_url("/offline.html"), b"<html></html>");

        let confirmed = monitor.recache_critical_resources_on_launch().await;
        assert_eq!(confirmed, 2);
    }

    #[tokio::test]
    async fn test_cache_health_reports_missing_resources() {
        let mut caps = HostCapabilities::full();
        caps.has_network = false;
        let (_dir, monitor) = monitor(caps);

        let cache = monitor.caches.open("precache-v1");
        cache.put(&monitor.config.resource_url("/"), b"<html></html>");

        let health = monitor.check_cache_health();
        assert!(health.is_supported);
        assert_eq!(health.cache_count, 1);

        let entry = health
            .critical_resources
            .iter()
            .find(|r| r.path == "/")
            .unwrap();
        assert!(entry.is_cached);
        let missing = health
            .critical_resources
            .iter()
            .find(|r| r.path == "/offline.html")
            .unwrap();
        assert!(!missing.is_cached);
    }
}
