//! Origin version probing.
//!
//! The served entry document embeds `app-version` and `build-time` markers.
//! The probe fetches it with cache-busting so an intermediary cache cannot
//! hand back the build the session already runs, then compares the embedded
//! version against the running one.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{header, Client};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BuildInfo, Environment, ManagerConfig};

/// Compare two canonical versions after stripping `+build` metadata.
///
/// Deployments are monotonic by build, not by semantic bump, so any textual
/// difference counts as newer; no semver ordering is attempted.
pub fn is_newer_version(current: &str, latest: &str) -> bool {
    let clean_current = current.split('+').next().unwrap_or(current);
    let clean_latest = latest.split('+').next().unwrap_or(latest);
    clean_current != clean_latest
}

/// Extract the build markers from a served entry document.
///
/// A plain text scan, deliberately not a document parse: the markers are a
/// stable pattern and the probe must work on raw fetched text.
pub fn extract_build_markers(html: &str) -> Option<BuildInfo> {
    let version_re =
        Regex::new(r#"(?i)<meta\s+name=["']app-version["']\s+content=["']([^"']+)["']"#)
            .expect("static pattern");
    let build_time_re =
        Regex::new(r#"(?i)<meta\s+name=["']build-time["']\s+content=["']([^"']+)["']"#)
            .expect("static pattern");

    let version = version_re.captures(html)?.get(1)?.as_str().to_string();
    let build_time = build_time_re
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| DateTime::parse_from_rfc3339(m.as_str()).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(BuildInfo::new(version, build_time))
}

pub struct VersionProbe {
    client: Client,
    entry_url: String,
    environment: Environment,
    current: BuildInfo,
    has_network: bool,
}

impl VersionProbe {
    pub fn new(config: &ManagerConfig, has_network: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build version probe client")?;

        Ok(Self {
            client,
            entry_url: config.entry_document_url(),
            environment: config.environment,
            current: config.build.clone(),
            has_network,
        })
    }

    /// Fetch the origin's currently served build identifier.
    ///
    /// Returns `None` on any network, parse, or missing-marker failure; the
    /// next poll retries. Never propagates an error to the caller.
    pub async fn fetch_latest_version(&self) -> Option<BuildInfo> {
        if !self.has_network {
            return None;
        }

        let url = format!("{}?v={}", self.entry_url, Utc::now().timestamp_millis());
        let response = match self
            .client
            .get(&url)
            .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(header::PRAGMA, "no-cache")
            .header(header::EXPIRES, "0")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "failed to fetch entry document");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "entry document fetch failed");
            return None;
        }

        let html = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "failed to read entry document body");
                return None;
            }
        };

        let markers = extract_build_markers(&html);
        if markers.is_none() {
            warn!("version markers not found in entry document");
        }
        markers
    }

    /// True when the origin serves a different build than the running one.
    ///
    /// Disabled in development: placeholder markers would report a
    /// permanent false update.
    pub async fn check_for_new_version(&self) -> bool {
        if self.environment.is_development() {
            debug!("version check disabled in development");
            return false;
        }

        let Some(latest) = self.fetch_latest_version().await else {
            warn!("unable to check for new version");
            return false;
        };

        let has_update = is_newer_version(&self.current.version, &latest.version);
        if has_update {
            info!(current = %self.current.version, latest = %latest.version, "new version detected");
        } else {
            debug!(version = %self.current.version, "running latest version");
        }
        has_update
    }

    /// Check immediately, then keep polling on a fixed interval, invoking
    /// `on_update` whenever the origin serves a newer build. Development
    /// hosts get an inert handle.
    pub fn start_version_check_interval(
        self: Arc<Self>,
        interval: Duration,
        on_update: Arc<dyn Fn() + Send + Sync>,
    ) -> VersionCheckHandle {
        if self.environment.is_development() {
            debug!("version check interval disabled in development");
            return VersionCheckHandle { task: None };
        }

        info!(interval_secs = interval.as_secs(), "starting version check interval");
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                // First tick fires immediately: check once on startup.
                ticker.tick().await;
                if self.check_for_new_version().await {
                    on_update();
                }
            }
        });

        VersionCheckHandle { task: Some(task) }
    }
}

/// Cancellation handle for the polling task. An in-flight check is allowed
/// to finish and have its result discarded.
pub struct VersionCheckHandle {
    task: Option<JoinHandle<()>>,
}

impl VersionCheckHandle {
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping version check interval");
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for VersionCheckHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
