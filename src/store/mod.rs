//! Persisted storage tiers.
//!
//! Three tiers with different durability and expiry guarantees:
//! - `KeyStore`: durable key/value storage for application keys and the
//!   version records (purged selectively on version change).
//! - `OfflineStore`: the larger, longer-retention tier used as a last-resort
//!   offline fallback (7-day soft expiry, never purged automatically).
//! - `SessionStore`: ephemeral, session-lifetime storage (refresh cooldown
//!   record, temporary state).
//!
//! Every operation degrades to `false`/`None` instead of throwing when the
//! host lacks the capability or an individual read/write fails.

pub mod keys;
pub mod kv;
pub mod offline;
pub mod session;

pub use keys::CacheKeySet;
pub use kv::KeyStore;
pub use offline::{OfflineStore, Staleness, StalenessInfo};
pub use session::SessionStore;
