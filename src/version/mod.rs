//! Build version tracking and origin probing.
//!
//! The oracle owns the persisted version records: which build ran last,
//! whether the running build is a transition, and the bounded history of
//! transitions. The probe asks the origin which build it is currently
//! serving, so a long-lived session can notice a deployment without a
//! navigation.

pub mod oracle;
pub mod probe;

pub use oracle::{VersionHistoryEntry, VersionOracle};
pub use probe::{is_newer_version, VersionCheckHandle, VersionProbe};
