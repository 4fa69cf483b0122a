//! Retry-wrapped deferred loads.
//!
//! Wraps a deferred module or manifest load. Stale-asset failures are
//! retried with a linearly growing delay; anything else propagates
//! immediately. When retries run out, the cooldown guard is consulted once:
//! if a refresh is allowed the full refresh sequence runs, and either way
//! the original error is returned so the caller can render a terminal
//! failure state instead of spinning.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::error::is_stale_asset_error;
use crate::refresh::RefreshGuard;

/// Load with bounded retries, then recover by forced refresh.
///
/// `retries` counts retries after the initial attempt, so `retries = 3`
/// makes exactly 4 attempts. `refresh` is the full refresh sequence
/// (purge, skip-waiting, reload); it is invoked at most once and only when
/// the guard permits.
pub async fn load_with_retry<T, F, Fut, R, RFut>(
    mut loader: F,
    retries: u32,
    base_delay: Duration,
    guard: &RefreshGuard,
    refresh: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = ()>,
{
    let mut last_error = None;

    for attempt in 0..=retries {
        match loader().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                // Ordinary failures are not recoverable by reloading.
                if !is_stale_asset_error(&error) {
                    return Err(error);
                }

                warn!(
                    attempt = attempt + 1,
                    total = retries + 1,
                    error = %error,
                    "stale-asset load failed"
                );
                last_error = Some(error);

                if attempt < retries {
                    tokio::time::sleep(base_delay * (attempt + 1)).await;
                }
            }
        }
    }

    let error = last_error.expect("at least one attempt ran");

    // Consulted exactly once, immediately before the irreversible action.
    if guard.can_refresh() {
        warn!("load retries exhausted, forcing refresh");
        guard.mark_refreshed();
        refresh().await;
    } else {
        warn!("load retries exhausted and refresh vetoed by cooldown");
    }

    // The refresh (if any) tears the session down out-of-band; the caller
    // still sees the original failure.
    Err(error)
}
