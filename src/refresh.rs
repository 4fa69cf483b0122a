//! Refresh cooldown guard.
//!
//! Multiple independent triggers (version polling, the agent's installed
//! event, loader retry exhaustion) can each decide a reload is warranted.
//! The guard is the single serialization point: at most one forced reload
//! per cooldown window, checked immediately before the irreversible reload
//! action.
//!
//! When session storage is unavailable the guard fails open: its job is to
//! prevent storms, not to block a legitimate single refresh, and failing
//! closed would strand users on a broken session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::store::{keys, SessionStore};

pub struct RefreshGuard {
    store: Arc<SessionStore>,
    cooldown: Duration,
}

impl RefreshGuard {
    pub fn new(store: Arc<SessionStore>, cooldown: Duration) -> Self {
        Self { store, cooldown }
    }

    /// True when no refresh has been recorded yet, the cooldown has
    /// elapsed, or the session store is unavailable.
    pub fn can_refresh(&self) -> bool {
        let Some(last_ms) = self.store.get::<i64>(keys::REFRESH_TIMESTAMP) else {
            return true;
        };
        let elapsed_ms = Utc::now().timestamp_millis() - last_ms;
        let allowed = elapsed_ms > self.cooldown.as_millis() as i64;
        if !allowed {
            debug!(elapsed_ms, "refresh vetoed by cooldown");
        }
        allowed
    }

    /// Record the refresh timestamp. Silently a no-op when the session
    /// store is unavailable.
    pub fn mark_refreshed(&self) {
        self.store
            .set(keys::REFRESH_TIMESTAMP, &Utc::now().timestamp_millis());
    }
}
