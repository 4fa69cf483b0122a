//! Cache eviction on version change.
//!
//! Best-effort purge, not all-or-nothing: three ordered phases, each
//! isolated so one failing never stops the next. Only the cache partition
//! of the key namespace is touched; user preferences survive every version
//! transition, and the durable offline tier is deliberately left alone as
//! the last-resort fallback.

use tracing::{debug, info};

use crate::agent::ResponseCacheSet;
use crate::store::{CacheKeySet, KeyStore, SessionStore};

/// Purge the application's caches.
///
/// Phase 1 removes the cache-partition keys from durable key storage,
/// phase 2 deletes every agent-managed response cache, phase 3 clears the
/// ephemeral session store.
pub fn clear_app_cache(
    key_store: &KeyStore,
    cache_keys: &CacheKeySet,
    response_caches: &ResponseCacheSet,
    session: &SessionStore,
) {
    info!(reason = "version_update", "starting cache clearance");

    // Phase 1: cache-partition keys only. Individual removal failures are
    // swallowed by the store and logged there.
    for key in cache_keys.iter() {
        if key_store.remove(key) {
            debug!(key, "cleared cache key");
        }
    }

    // Phase 2: every agent response cache, by name.
    let deleted = response_caches.delete_all();
    info!(count = deleted, "agent response caches cleared");

    // Phase 3: ephemeral session state.
    session.clear();
    debug!("session store cleared");

    info!("cache clearance completed");
}
