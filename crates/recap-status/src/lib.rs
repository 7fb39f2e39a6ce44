//! Server reachability and credential-validity monitoring.
//!
//! The monitor owns the in-memory [`ServerStatus`] and merges two
//! orthogonal facts into it: whether the task server is reachable, and
//! whether it accepts the current credential. Both come from a single
//! bounded-timeout health check. Status changes are broadcast with a
//! suppression rule (frequent polls mostly reconfirm the existing state),
//! and a durable snapshot covers contexts that start after the broadcasts
//! have already fired.

mod monitor;
mod status;

pub use monitor::{ServerStatusMonitor, CHECK_TIMEOUT, REBROADCAST_DELAY};
pub use status::{AuthValidity, ServerStatus, StatusPatch};
