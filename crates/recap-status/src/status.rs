//! Server status data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Credential validity as last observed from the server.
///
/// Tri-state: the server confirmed the credential, rejected it, or the
/// observation was undetermined (unreachable server or an unexpected
/// response).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthValidity {
    Valid,
    Invalid,
    Unknown,
}

impl AuthValidity {
    /// Whether this is a definitive observation (not `Unknown`).
    pub fn is_resolved(&self) -> bool {
        !matches!(self, AuthValidity::Unknown)
    }
}

/// Latest observation of server reachability and credential validity.
///
/// Invariant: when `reachable` is false, `auth_valid` is `Unknown` and
/// `http_status` is `None`; nothing can be known about the credential
/// through an unreachable server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Whether the last check reached the server at all.
    pub reachable: bool,
    /// Credential validity as of the last check.
    pub auth_valid: AuthValidity,
    /// HTTP status code of the last response, if one was received.
    pub http_status: Option<u16>,
    /// When the status was last updated.
    pub last_checked_at: DateTime<Utc>,
    /// Whether the last check was aborted by the client-side timeout.
    pub timed_out: bool,
    /// Whether the last check failed in an unexpected way (transport
    /// failure other than timeout, or an unexpected HTTP code).
    pub errored: bool,
}

impl ServerStatus {
    /// Status before any check has run.
    pub fn initial() -> Self {
        Self {
            reachable: false,
            auth_valid: AuthValidity::Unknown,
            http_status: None,
            last_checked_at: Utc::now(),
            timed_out: false,
            errored: false,
        }
    }
}

/// Partial status update merged by `ServerStatusMonitor::set_status`.
///
/// `http_status` is doubly optional: `None` leaves the field untouched,
/// `Some(None)` explicitly clears it.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub reachable: Option<bool>,
    pub auth_valid: Option<AuthValidity>,
    pub http_status: Option<Option<u16>>,
    pub timed_out: Option<bool>,
    pub errored: Option<bool>,
}

impl StatusPatch {
    /// Merge this patch into a status, without stamping the timestamp or
    /// enforcing invariants (the monitor does both).
    pub(crate) fn apply(&self, status: &mut ServerStatus) {
        if let Some(reachable) = self.reachable {
            status.reachable = reachable;
        }
        if let Some(auth_valid) = self.auth_valid {
            status.auth_valid = auth_valid;
        }
        if let Some(http_status) = self.http_status {
            status.http_status = http_status;
        }
        if let Some(timed_out) = self.timed_out {
            status.timed_out = timed_out;
        }
        if let Some(errored) = self.errored {
            status.errored = errored;
        }
    }
}

/// Whether a status transition warrants a broadcast.
///
/// Health checks run on a frequent poll and mostly reconfirm the current
/// state; broadcasting every poll would flood UI listeners. A transition
/// matters when reachability flips, when `auth_valid` changes between two
/// definitive observations (transitions through `Unknown` do not count),
/// or when the HTTP code / error / timeout flags change.
pub(crate) fn is_meaningful_change(previous: &ServerStatus, next: &ServerStatus) -> bool {
    previous.reachable != next.reachable
        || (previous.auth_valid.is_resolved()
            && next.auth_valid.is_resolved()
            && previous.auth_valid != next.auth_valid)
        || previous.http_status != next.http_status
        || previous.errored != next.errored
        || previous.timed_out != next.timed_out
}
