//! Host capability flags.
//!
//! The manager never probes its environment implicitly. Whoever embeds it
//! describes the host once, and every component consults these flags and
//! degrades when a capability is missing.

/// Capabilities of the embedding host, injected at construction.
#[derive(Debug, Clone, Copy)]
pub struct HostCapabilities {
    /// Durable key/value and offline tiers may be used.
    pub has_durable_storage: bool,
    /// A background update agent exists and accepts commands.
    pub has_background_agent: bool,
    /// Network fetches are expected to work.
    pub has_network: bool,
    /// Quota figure reported by the host, if it reports one.
    pub reported_quota: Option<u64>,
}

impl HostCapabilities {
    /// A fully capable host.
    pub fn full() -> Self {
        Self {
            has_durable_storage: true,
            has_background_agent: true,
            has_network: true,
            reported_quota: None,
        }
    }

    /// A host with nothing: no storage, no agent, no network.
    /// Every operation should degrade to `false`/`None`/no-op on this.
    pub fn degraded() -> Self {
        Self {
            has_durable_storage: false,
            has_background_agent: false,
            has_network: false,
            reported_quota: None,
        }
    }

    pub fn with_quota(mut self, quota: u64) -> Self {
        self.reported_quota = Some(quota);
        self
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::full()
    }
}
