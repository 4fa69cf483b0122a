//! Background update agent supervision.
//!
//! The agent is a host-managed execution context that intercepts requests,
//! maintains named response caches, and holds a freshly installed
//! application version in a waiting state until told to activate. The
//! manager never sees inside it: all coordination is message passing
//! (commands out, lifecycle events in) plus the registration slots the host
//! lets us read.

pub mod controller;
pub mod registration;
pub mod response_cache;

pub use controller::{AgentController, AgentPollHandle};
pub use registration::{
    AgentCommand, AgentEndpoint, AgentEvent, AgentLink, AgentRegistration, AgentState,
    Subscription,
};
pub use response_cache::{ResponseCache, ResponseCacheSet};
