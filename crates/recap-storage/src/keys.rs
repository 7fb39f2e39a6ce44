//! Storage key constants.

/// Storage keys used by the client
pub struct StorageKeys;

impl StorageKeys {
    /// Credential (durable backend)
    pub const CREDENTIAL: &'static str = "credential";

    /// Credential fallback copy (fast backend)
    pub const CREDENTIAL_FAST_BACKUP: &'static str = "credential_fast_backup";

    /// Last known server status snapshot (durable backend, JSON)
    pub const SERVER_STATUS_SNAPSHOT: &'static str = "server_status_snapshot";
}
