//! Dual-backend credential persistence with read-repair.

use crate::{KeyValueStore, StorageKeys};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Delay between a credential write and the follow-up consistency check,
/// long enough for both backends to settle.
pub const CONSISTENCY_CHECK_DELAY: Duration = Duration::from_millis(150);

/// Outcome of a dual-backend consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Whether both backends already held the same non-empty credential.
    pub is_consistent: bool,
    /// The credential both backends hold after the check (repair included),
    /// or `None` when no backend holds one.
    pub resolved_token: Option<String>,
}

/// Persists the credential across the fast and durable backends.
///
/// Every operation is failure-tolerant: a backend error is logged and
/// downgraded to `false`/`None`, never raised to the caller. The
/// authentication path must keep working through storage quota errors and
/// transient backend unavailability.
///
/// Consistency between the backends is maintained by read-repair rather
/// than locking: [`CredentialStore::save`] schedules a deferred
/// [`CredentialStore::check_consistency`] instead of sequencing the two
/// writes.
#[derive(Clone)]
pub struct CredentialStore {
    fast: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    /// Create a store over the two backends.
    pub fn new(fast: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { fast, durable }
    }

    /// Write a credential to both backends.
    ///
    /// The value is trim-normalized first. Returns `true` only when both
    /// writes succeed; an individual backend failure is logged, not raised.
    /// Also schedules an asynchronous consistency check shortly after, so a
    /// partial write is repaired once the backends settle.
    pub async fn save(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            warn!("Refusing to save empty credential");
            return false;
        }

        let fast_ok = match self.fast.set(StorageKeys::CREDENTIAL_FAST_BACKUP, token) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Fast-backend credential write failed");
                false
            }
        };

        let durable_ok = match self.durable.set(StorageKeys::CREDENTIAL, token) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Durable-backend credential write failed");
                false
            }
        };

        self.schedule_consistency_check();

        fast_ok && durable_ok
    }

    /// Load the credential from the durable backend.
    ///
    /// On a hit, the value is opportunistically mirrored into the fast
    /// backend (fire-and-forget). The fast backend is never the primary
    /// source here; durable storage is authoritative across restarts.
    pub fn load(&self) -> Option<String> {
        match self.durable.get(StorageKeys::CREDENTIAL) {
            Ok(Some(token)) => {
                if let Err(e) = self.fast.set(StorageKeys::CREDENTIAL_FAST_BACKUP, &token) {
                    debug!(error = %e, "Fast-backend mirror write failed");
                }
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Durable-backend credential read failed");
                None
            }
        }
    }

    /// Write the credential to the fast backend only (best-effort).
    ///
    /// Used on the login path to make the credential visible to
    /// latency-sensitive readers before the durable write lands.
    pub fn save_fast(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            warn!("Refusing to save empty credential");
            return false;
        }
        match self.fast.set(StorageKeys::CREDENTIAL_FAST_BACKUP, token) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Fast-backend credential write failed");
                false
            }
        }
    }

    /// Remove the credential from the fast backend only.
    ///
    /// Used to drop a stale fallback before a fresh login attempt.
    pub fn clear_fast(&self) -> bool {
        match self.fast.delete(StorageKeys::CREDENTIAL_FAST_BACKUP) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Fast-backend credential removal failed");
                false
            }
        }
    }

    /// Load the credential from the fast backend only.
    ///
    /// Used for emergency reads on cold paths that cannot afford a durable
    /// round trip (e.g. header generation).
    pub fn load_fast(&self) -> Option<String> {
        match self.fast.get(StorageKeys::CREDENTIAL_FAST_BACKUP) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Fast-backend credential read failed");
                None
            }
        }
    }

    /// Remove the credential from both backends.
    ///
    /// Returns `true` only when both removals succeed; a partial failure is
    /// logged as a warning, not escalated.
    pub fn clear(&self) -> bool {
        let fast_ok = match self.fast.delete(StorageKeys::CREDENTIAL_FAST_BACKUP) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Fast-backend credential removal failed");
                false
            }
        };

        let durable_ok = match self.durable.delete(StorageKeys::CREDENTIAL) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Durable-backend credential removal failed");
                false
            }
        };

        fast_ok && durable_ok
    }

    /// Compare the two backends and repair any divergence.
    ///
    /// - Both empty: alarm condition, the credential is gone from all
    ///   storage. Reported as inconsistent with no token.
    /// - Divergent: the fast-backend value wins when present (most recent
    ///   write is visible there first); the winner is written back to both
    ///   backends and the divergence reported.
    /// - Equal and non-empty: consistent.
    pub fn check_consistency(&self) -> ConsistencyReport {
        let fast_value = self.fast.get(StorageKeys::CREDENTIAL_FAST_BACKUP).unwrap_or_else(|e| {
            warn!(error = %e, "Fast-backend read failed during consistency check");
            None
        });
        let durable_value = self.durable.get(StorageKeys::CREDENTIAL).unwrap_or_else(|e| {
            warn!(error = %e, "Durable-backend read failed during consistency check");
            None
        });

        let resolved = match fast_value.clone().or_else(|| durable_value.clone()) {
            Some(value) => value,
            None => {
                error!("Credential missing from both storage backends");
                return ConsistencyReport {
                    is_consistent: false,
                    resolved_token: None,
                };
            }
        };

        if fast_value == durable_value {
            return ConsistencyReport {
                is_consistent: true,
                resolved_token: Some(resolved),
            };
        }

        warn!("Credential backends diverged, repairing from most recent value");

        if let Err(e) = self.fast.set(StorageKeys::CREDENTIAL_FAST_BACKUP, &resolved) {
            warn!(error = %e, "Fast-backend repair write failed");
        }
        if let Err(e) = self.durable.set(StorageKeys::CREDENTIAL, &resolved) {
            warn!(error = %e, "Durable-backend repair write failed");
        }

        ConsistencyReport {
            is_consistent: false,
            resolved_token: Some(resolved),
        }
    }

    /// Read or write an auxiliary durable value (e.g. the server status
    /// snapshot). Failure-tolerant like every other operation here.
    pub fn put_durable(&self, key: &'static str, value: &str) -> bool {
        match self.durable.set(key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "Durable-backend write failed");
                false
            }
        }
    }

    /// Counterpart to [`CredentialStore::put_durable`].
    pub fn get_durable(&self, key: &'static str) -> Option<String> {
        match self.durable.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Durable-backend read failed");
                None
            }
        }
    }

    fn schedule_consistency_check(&self) {
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CONSISTENCY_CHECK_DELAY).await;
            let report = store.check_consistency();
            if !report.is_consistent {
                debug!(
                    repaired = report.resolved_token.is_some(),
                    "Post-save consistency check found divergence"
                );
            }
        });
    }
}
