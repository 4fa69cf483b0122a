//! The update manager.
//!
//! One explicitly constructed instance owns the storage tiers, the agent
//! link, and every periodic task, and exposes the small signal surface the
//! presentation layer renders. Nothing here is a process-wide singleton;
//! `shutdown` tears the whole thing down.
//!
//! Three independent triggers can decide a reload is warranted: the agent
//! reporting a freshly installed version, the version probe seeing a newer
//! served build, and the retry loader running out of retries. All of them
//! funnel through [`UpdateManager::perform_full_refresh`], and the
//! automatic ones are gated by the cooldown guard immediately before the
//! reload.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentController, AgentEvent, AgentLink, AgentPollHandle, ResponseCacheSet,
};
use crate::config::ManagerConfig;
use crate::host::HostCapabilities;
use crate::loader;
use crate::monitor::{CacheHealth, StorageMonitor};
use crate::purge;
use crate::refresh::RefreshGuard;
use crate::store::{KeyStore, OfflineStore, SessionStore};
use crate::version::{VersionCheckHandle, VersionOracle, VersionProbe};

/// Host hook performing the actual relaunch. The presentation layer is
/// free to re-mount once it fires.
pub type ReloadHook = Arc<dyn Fn() + Send + Sync>;

/// The signal surface consumed by the presentation layer. It renders this
/// and forwards user intent; it never decides refresh timing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdatePrompt {
    pub show: bool,
    pub seconds_remaining: Option<u64>,
}

impl UpdatePrompt {
    fn hidden() -> Self {
        Self {
            show: false,
            seconds_remaining: None,
        }
    }
}

#[derive(Default)]
struct TaskHandles {
    version_check: Option<VersionCheckHandle>,
    agent_poll: Option<AgentPollHandle>,
    event_pump: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

pub struct UpdateManager {
    config: ManagerConfig,
    key_store: Arc<KeyStore>,
    offline_store: Arc<OfflineStore>,
    session_store: Arc<SessionStore>,
    guard: RefreshGuard,
    oracle: VersionOracle,
    probe: Arc<VersionProbe>,
    controller: AgentController,
    caches: Arc<ResponseCacheSet>,
    monitor: StorageMonitor,
    prompt_tx: watch::Sender<UpdatePrompt>,
    reload: ReloadHook,
    tasks: Mutex<TaskHandles>,
}

impl UpdateManager {
    pub fn new(
        config: ManagerConfig,
        caps: HostCapabilities,
        link: AgentLink,
        reload: ReloadHook,
    ) -> Result<Arc<Self>> {
        let key_store = Arc::new(KeyStore::new(config.storage_root.join("kv"), &caps));
        let offline_store = Arc::new(OfflineStore::new(
            config.storage_root.join("offline-db"),
            &caps,
        ));
        let session_store = Arc::new(SessionStore::new(caps.has_durable_storage));
        let caches = Arc::new(ResponseCacheSet::new(
            config.storage_root.join("response-caches"),
            &caps,
        ));

        let guard = RefreshGuard::new(session_store.clone(), config.cooldown);
        let oracle = VersionOracle::new(config.build.clone(), key_store.clone());
        let probe = Arc::new(VersionProbe::new(&config, caps.has_network)?);
        let controller = AgentController::new(&config, &caps, link)?;
        let monitor = StorageMonitor::new(config.clone(), caps, caches.clone())?;

        let (prompt_tx, _) = watch::channel(UpdatePrompt::hidden());

        Ok(Arc::new(Self {
            config,
            key_store,
            offline_store,
            session_store,
            guard,
            oracle,
            probe,
            controller,
            caches,
            monitor,
            prompt_tx,
            reload,
            tasks: Mutex::new(TaskHandles::default()),
        }))
    }

    /// Startup sequence: version migration, storage repair, agent
    /// registration, then the periodic tasks. Takes a clone of the owning
    /// `Arc`; the spawned tasks hold only weak references back.
    pub async fn start(self: Arc<Self>) {
        self.handle_version_update().await;
        self.monitor.init().await;

        match self.controller.register().await {
            Ok(true) => debug!("agent registration requested"),
            Ok(false) => debug!("running without a background agent"),
            Err(e) => warn!(error = %e, "agent registration failed"),
        }

        let version_check = {
            let weak = Arc::downgrade(&self);
            self.probe.clone().start_version_check_interval(
                self.config.version_check_interval,
                Arc::new(move || {
                    if let Some(manager) = weak.upgrade() {
                        tokio::spawn(async move {
                            manager.automatic_refresh("origin serves a newer build").await;
                        });
                    }
                }),
            )
        };

        let event_pump = {
            let weak = Arc::downgrade(&self);
            let mut sub = self.controller.subscribe();
            tokio::spawn(async move {
                while let Some(event) = sub.recv().await {
                    let Some(manager) = weak.upgrade() else { break };
                    match event {
                        AgentEvent::Installed | AgentEvent::UpdateWaiting => {
                            info!(?event, "agent update pending");
                            manager.clone().show_update_prompt();
                        }
                        AgentEvent::OfflineReady => {
                            info!("application ready to work offline");
                        }
                        AgentEvent::Activated => debug!("agent activated"),
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        tasks.version_check = Some(version_check);
        tasks.agent_poll = Some(
            self.controller
                .start_update_polling(self.config.agent_poll_interval),
        );
        tasks.event_pump = Some(event_pump);
    }

    /// Startup version migration.
    ///
    /// No transition: just record the running version. Transition: purge
    /// the cache partition, ask the agent to revalidate, record the
    /// history entry, then persist the new version.
    pub async fn handle_version_update(&self) {
        if !self.oracle.has_version_changed() {
            self.oracle.save_current_version();
            return;
        }

        info!(
            from = ?self.oracle.previous_version(),
            to = %self.oracle.current_version(),
            "version update detected"
        );

        purge::clear_app_cache(
            &self.key_store,
            &self.config.cache_keys,
            &self.caches,
            &self.session_store,
        );
        self.controller.request_update_check();
        self.oracle.record_version_update();
        self.oracle.save_current_version();

        info!(version = %self.oracle.current_version(), "version update completed");
    }

    /// Raise the update prompt and start the auto-advance countdown.
    fn show_update_prompt(self: Arc<Self>) {
        let total = self.config.update_countdown.as_secs();
        let weak = Arc::downgrade(&self);

        let countdown = tokio::spawn(async move {
            let mut remaining = total;
            loop {
                let Some(manager) = weak.upgrade() else { return };
                manager.prompt_tx.send_replace(UpdatePrompt {
                    show: true,
                    seconds_remaining: Some(remaining),
                });
                drop(manager);

                if remaining == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                remaining -= 1;
            }

            if let Some(manager) = weak.upgrade() {
                manager.automatic_refresh("update countdown elapsed").await;
            }
        });

        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if let Some(old) = tasks.countdown.replace(countdown) {
            old.abort();
        }
    }

    /// User confirmed the update. Runs ungated, but still records the
    /// timestamp so an automatic trigger cannot double-reload right after.
    pub async fn update_now(&self) {
        self.cancel_countdown();
        self.guard.mark_refreshed();
        self.perform_full_refresh().await;
    }

    /// User dismissed the prompt; the update stays parked until the next
    /// trigger.
    pub fn dismiss(&self) {
        self.cancel_countdown();
        self.prompt_tx.send_replace(UpdatePrompt::hidden());
        debug!("update prompt dismissed");
    }

    /// A non-interactive trigger decided a reload is warranted. The guard
    /// is consulted here, immediately before the reload, so concurrent
    /// triggers cannot race past an earlier check.
    async fn automatic_refresh(&self, reason: &str) {
        if !self.guard.can_refresh() {
            warn!(reason, "forced refresh vetoed by cooldown");
            return;
        }
        info!(reason, "forcing refresh");
        self.guard.mark_refreshed();
        self.perform_full_refresh().await;
    }

    /// The full refresh sequence: purge, activate the waiting agent,
    /// reload.
    pub async fn perform_full_refresh(&self) {
        self.cancel_countdown();
        self.prompt_tx.send_replace(UpdatePrompt::hidden());

        purge::clear_app_cache(
            &self.key_store,
            &self.config.cache_keys,
            &self.caches,
            &self.session_store,
        );
        self.controller.skip_waiting();
        (self.reload)();
    }

    /// Supervise a deferred load with retries and, on exhaustion, the
    /// guard-gated refresh path.
    pub async fn load_with_retry<T, F, Fut>(&self, loader: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loader::load_with_retry(
            loader,
            self.config.load_retries,
            self.config.load_retry_delay,
            &self.guard,
            || async {
                self.perform_full_refresh().await;
            },
        )
        .await
    }

    /// Current prompt state; the receiver observes every change.
    pub fn subscribe_prompt(&self) -> watch::Receiver<UpdatePrompt> {
        self.prompt_tx.subscribe()
    }

    /// The durable offline tier, for application data fallback reads.
    pub fn offline_store(&self) -> &Arc<OfflineStore> {
        &self.offline_store
    }

    /// The durable key/value tier.
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn oracle(&self) -> &VersionOracle {
        &self.oracle
    }

    /// True while a new agent version is installing or waiting.
    pub fn has_update_pending(&self) -> bool {
        self.controller.has_update_pending()
    }

    pub fn cache_health(&self) -> CacheHealth {
        self.monitor.check_cache_health()
    }

    fn cancel_countdown(&self) {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if let Some(task) = tasks.countdown.take() {
            task.abort();
        }
    }

    /// Tear down every periodic task. In-flight fetches finish on their
    /// own and have their results discarded.
    pub fn shutdown(&self) {
        info!("update manager shutting down");
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        if let Some(mut handle) = tasks.version_check.take() {
            handle.cancel();
        }
        if let Some(mut handle) = tasks.agent_poll.take() {
            handle.cancel();
        }
        if let Some(task) = tasks.event_pump.take() {
            task.abort();
        }
        if let Some(task) = tasks.countdown.take() {
            task.abort();
        }
        self.prompt_tx.send_replace(UpdatePrompt::hidden());
    }
}

impl Drop for UpdateManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentCommand, AgentEndpoint};
    use crate::config::{BuildInfo, Environment};
    use crate::error::AssetError;
    use crate::store::keys;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        manager: Arc<UpdateManager>,
        endpoint: AgentEndpoint,
        reloads: Arc<AtomicU32>,
    }

    /// Offline fixture: network off so nothing actually fetches, agent and
    /// storage fully available.
    fn fixture(version: &str) -> Fixture {
        fixture_with_countdown(version, Duration::from_secs(10))
    }

    fn fixture_with_countdown(version: &str, countdown: Duration) -> Fixture {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let mut config = ManagerConfig::new(
            BuildInfo::new(version, Utc::now()),
            "https://app.example.com",
        );
        config.environment = Environment::Development;
        config.storage_root = dir.path().to_path_buf();
        config.load_retry_delay = Duration::ZERO;
        config.update_countdown = countdown;

        let mut caps = HostCapabilities::full();
        caps.has_network = false;

        let (link, endpoint) = AgentLink::channel();
        let reloads = Arc::new(AtomicU32::new(0));
        let reloads_in = reloads.clone();
        let reload: ReloadHook = Arc::new(move || {
            reloads_in.fetch_add(1, Ordering::SeqCst);
        });

        let manager = UpdateManager::new(config, caps, link, reload).unwrap();
        Fixture {
            _dir: dir,
            manager,
            endpoint,
            reloads,
        }
    }

    /// Opt into test logs with RUST_LOG=debug.
    fn init_tracing() {
        use tracing_subscriber::EnvFilter;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_first_run_saves_version_without_purging() {
        let fx = fixture("1.0.0");
        fx.manager.key_store().set("rate_table", &vec![1.0]);

        fx.manager.handle_version_update().await;

        assert_eq!(
            fx.manager.oracle().previous_version(),
            Some("1.0.0".to_string()),
        );
        // First run is not a transition: nothing purged, no history.
        assert_eq!(
            fx.manager.key_store().get::<Vec<f64>>("rate_table"),
            Some(vec![1.0])
        );
        assert!(fx.manager.oracle().version_history().is_empty());
    }

    #[tokio::test]
    async fn test_version_transition_purges_and_records() {
        let mut fx = fixture("1.1.0");
        // The previous run was 1.0.0 and left both partitions populated.
        fx.manager.key_store().set(keys::APP_VERSION, &"1.0.0");
        fx.manager.key_store().set("rate_table", &vec![1.0]);
        fx.manager.key_store().set("user_preferences", &"compact");

        fx.manager.handle_version_update().await;

        // Cache partition purged, user data kept.
        assert_eq!(fx.manager.key_store().get::<Vec<f64>>("rate_table"), None);
        assert_eq!(
            fx.manager.key_store().get::<String>("user_preferences"),
            Some("compact".to_string())
        );

        // Transition recorded and the new version persisted.
        let history = fx.manager.oracle().version_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "1.1.0");
        assert_eq!(
            fx.manager.oracle().previous_version(),
            Some("1.1.0".to_string())
        );

        // The agent was asked to revalidate.
        assert_eq!(
            fx.endpoint.commands.try_recv().ok(),
            Some(AgentCommand::CheckForUpdate)
        );
        // Migration alone never reloads.
        assert_eq!(fx.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_now_refreshes_and_activates() {
        let mut fx = fixture("1.0.0");
        fx.manager.key_store().set("rate_table", &vec![1.0]);

        fx.manager.update_now().await;

        assert_eq!(fx.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(fx.manager.key_store().get::<Vec<f64>>("rate_table"), None);
        assert_eq!(
            fx.endpoint.commands.try_recv().ok(),
            Some(AgentCommand::SkipWaiting)
        );
        assert_eq!(*fx.manager.subscribe_prompt().borrow(), UpdatePrompt::hidden());
    }

    #[tokio::test]
    async fn test_agent_update_event_raises_prompt_and_countdown_refreshes() {
        // Instant countdown so the test observes the refresh, not the timer.
        let mut fx = fixture_with_countdown("1.0.0", Duration::ZERO);
        fx.manager.clone().start().await;

        fx.endpoint.events.send(AgentEvent::UpdateWaiting).unwrap();

        let reloads = fx.reloads.clone();
        wait_for(move || reloads.load(Ordering::SeqCst) >= 1).await;
        // Skip-waiting went out as part of the refresh sequence.
        let mut saw_skip = false;
        while let Ok(cmd) = fx.endpoint.commands.try_recv() {
            if cmd == AgentCommand::SkipWaiting {
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn test_dismiss_hides_prompt_without_reloading() {
        let fx = fixture("1.0.0");
        fx.manager.clone().show_update_prompt();

        let prompt = fx.manager.subscribe_prompt();
        wait_for({
            let prompt = prompt.clone();
            move || prompt.borrow().show
        })
        .await;

        fx.manager.dismiss();
        wait_for({
            let prompt = prompt.clone();
            move || !prompt.borrow().show
        })
        .await;
        assert_eq!(fx.reloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_loader_exhaustion_refreshes_once_then_vetoes() {
        let fx = fixture("1.0.0");
        let attempts = AtomicU32::new(0);

        let result: Result<()> = fx
            .manager
            .load_with_retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(AssetError::ModuleNotFound("pages/convert".into()).into())
            })
            .await;

        assert!(result.is_err());
        // Initial attempt plus three retries, then one refresh.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(fx.reloads.load(Ordering::SeqCst), 1);

        // A second exhaustion inside the cooldown window is vetoed: the
        // error surfaces and no second reload happens.
        let result: Result<()> = fx
            .manager
            .load_with_retry(|| async {
                Err(AssetError::ModuleNotFound("pages/convert".into()).into())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(fx.reloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_periodic_tasks() {
        let fx = fixture("1.0.0");
        fx.manager.clone().start().await;
        fx.manager.shutdown();

        let tasks = fx.manager.tasks.lock().unwrap();
        assert!(tasks.version_check.is_none());
        assert!(tasks.agent_poll.is_none());
        assert!(tasks.event_pump.is_none());
        assert!(tasks.countdown.is_none());
    }
}
