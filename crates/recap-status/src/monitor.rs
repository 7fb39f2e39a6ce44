//! Health checking and status ownership.

use crate::status::is_meaningful_change;
use crate::{AuthValidity, ServerStatus, StatusPatch};
use chrono::Utc;
use recap_auth::AuthSessionManager;
use recap_bus::{Notification, NotificationBus};
use recap_storage::{CredentialStore, StorageKeys};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hard timeout for a single health check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before the second broadcast of a forced check. Covers UI contexts
/// that were still attaching when the first broadcast fired.
pub const REBROADCAST_DELAY: Duration = Duration::from_millis(500);

/// Owns the in-memory [`ServerStatus`] and performs health checks.
#[derive(Clone)]
pub struct ServerStatusMonitor {
    status: Arc<Mutex<ServerStatus>>,
    auth: AuthSessionManager,
    store: CredentialStore,
    bus: NotificationBus,
    http_client: reqwest::Client,
    server_url: String,
    check_timeout: Duration,
    check_in_flight: Arc<AtomicBool>,
}

impl ServerStatusMonitor {
    /// Create a new monitor.
    pub fn new(
        auth: AuthSessionManager,
        store: CredentialStore,
        bus: NotificationBus,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            status: Arc::new(Mutex::new(ServerStatus::initial())),
            auth,
            store,
            bus,
            http_client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            check_timeout: CHECK_TIMEOUT,
            check_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the health-check timeout (tests use a short one).
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Probe the server and fold the observation into the status.
    ///
    /// Reachability and credential validity are orthogonal facts and both
    /// are recorded: a 401/403 means the server is up *and* the credential
    /// is rejected. Returns `true` iff the server was reachable.
    ///
    /// Checks are serialized: a call landing while another check is in
    /// flight does not issue a second probe, it reports the current
    /// reachability instead (the poll timer and a slow check would
    /// otherwise race each other's status writes).
    pub async fn check_server_online(&self) -> bool {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Health check already in flight, skipping");
            return self.get_status().reachable;
        }

        let reachable = self.probe().await;
        self.check_in_flight.store(false, Ordering::SeqCst);
        reachable
    }

    async fn probe(&self) -> bool {
        let mut request = self
            .http_client
            .get(self.endpoint("/status"))
            .timeout(self.check_timeout);
        for (name, value) in &self.auth.get_auth_headers() {
            request = request.header(name.as_str(), value.as_str());
        }

        match request.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                if response.status().is_success() {
                    debug!(code, "Server online, credential accepted");
                    self.set_status(StatusPatch {
                        reachable: Some(true),
                        auth_valid: Some(AuthValidity::Valid),
                        http_status: Some(Some(code)),
                        timed_out: Some(false),
                        errored: Some(false),
                    });
                } else if code == 401 || code == 403 {
                    info!(code, "Server online, credential rejected");
                    self.set_status(StatusPatch {
                        reachable: Some(true),
                        auth_valid: Some(AuthValidity::Invalid),
                        http_status: Some(Some(code)),
                        timed_out: Some(false),
                        errored: Some(false),
                    });
                } else {
                    warn!(code, "Server online, unexpected status response");
                    self.set_status(StatusPatch {
                        reachable: Some(true),
                        auth_valid: Some(AuthValidity::Unknown),
                        http_status: Some(Some(code)),
                        timed_out: Some(false),
                        errored: Some(true),
                    });
                }
                true
            }
            Err(e) if e.is_timeout() => {
                warn!(timeout_ms = self.check_timeout.as_millis() as u64, "Health check timed out");
                self.set_status(StatusPatch {
                    reachable: Some(false),
                    auth_valid: Some(AuthValidity::Unknown),
                    http_status: Some(None),
                    timed_out: Some(true),
                    errored: Some(false),
                });
                false
            }
            Err(e) => {
                warn!(error = %e, "Health check transport failure");
                self.set_status(StatusPatch {
                    reachable: Some(false),
                    auth_valid: Some(AuthValidity::Unknown),
                    http_status: Some(None),
                    timed_out: Some(false),
                    errored: Some(true),
                });
                false
            }
        }
    }

    /// Check the server and push the result out regardless of change.
    ///
    /// The status is broadcast twice (immediately and again after
    /// [`REBROADCAST_DELAY`]) to defeat delivery races with UI contexts
    /// that were not yet listening at the first broadcast, and a durable
    /// snapshot is persisted for contexts that start after both broadcasts
    /// have fired.
    pub async fn force_server_check(&self) -> bool {
        let reachable = self.check_server_online().await;

        self.broadcast_status();
        let monitor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REBROADCAST_DELAY).await;
            monitor.broadcast_status();
        });

        self.persist_snapshot();
        reachable
    }

    /// Merge a partial update into the status, stamp the check time, and
    /// broadcast only on a meaningful change.
    pub fn set_status(&self, patch: StatusPatch) {
        let changed = {
            let mut status = self.status.lock().unwrap();
            let previous = status.clone();

            patch.apply(&mut status);
            status.last_checked_at = Utc::now();

            // Nothing is knowable through an unreachable server
            if !status.reachable {
                status.auth_valid = AuthValidity::Unknown;
                status.http_status = None;
            }

            is_meaningful_change(&previous, &status)
        };

        if changed {
            self.broadcast_status();
        }
    }

    /// Defensive copy of the current status. Never performs I/O.
    pub fn get_status(&self) -> ServerStatus {
        self.status.lock().unwrap().clone()
    }

    /// Restore the last persisted status snapshot, for contexts that
    /// initialize after the broadcasts fired. Returns the restored status,
    /// or `None` when no usable snapshot exists.
    pub fn load_snapshot(&self) -> Option<ServerStatus> {
        let raw = self.store.get_durable(StorageKeys::SERVER_STATUS_SNAPSHOT)?;
        match serde_json::from_str::<ServerStatus>(&raw) {
            Ok(snapshot) => {
                *self.status.lock().unwrap() = snapshot.clone();
                debug!("Restored server status snapshot");
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable status snapshot");
                None
            }
        }
    }

    fn persist_snapshot(&self) {
        let status = self.get_status();
        match serde_json::to_string(&status) {
            Ok(encoded) => {
                self.store
                    .put_durable(StorageKeys::SERVER_STATUS_SNAPSHOT, &encoded);
            }
            Err(e) => warn!(error = %e, "Failed to encode status snapshot"),
        }
    }

    fn broadcast_status(&self) {
        let status = self.get_status();
        match serde_json::to_value(&status) {
            Ok(payload) => self.bus.publish(Notification::server_status_changed(payload)),
            Err(e) => warn!(error = %e, "Failed to encode status payload"),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_storage::SessionStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::broadcast::error::TryRecvError;

    /// Local TCP listener answering every connection with a canned HTTP
    /// response.
    async fn spawn_canned_server(response: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    /// Local TCP listener that accepts connections and never responds,
    /// to exercise the client-side timeout.
    async fn spawn_silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    fn build_monitor(server_url: &str) -> (ServerStatusMonitor, NotificationBus) {
        let fast = Arc::new(SessionStore::new());
        let durable = Arc::new(SessionStore::new());
        let store = CredentialStore::new(fast, durable);
        let bus = NotificationBus::new();
        let auth = AuthSessionManager::new(store.clone(), bus.clone(), server_url);
        let monitor = ServerStatusMonitor::new(auth, store, bus.clone(), server_url);
        (monitor, bus)
    }

    const UNREACHABLE: &str = "http://127.0.0.1:9";

    #[tokio::test]
    async fn test_ok_response_marks_reachable_and_valid() {
        let server =
            spawn_canned_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let (monitor, _) = build_monitor(&server);

        assert!(monitor.check_server_online().await);
        let status = monitor.get_status();
        assert!(status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Valid);
        assert_eq!(status.http_status, Some(200));
        assert!(!status.timed_out);
        assert!(!status.errored);
    }

    #[tokio::test]
    async fn test_forbidden_response_is_reachable_but_invalid() {
        let server = spawn_canned_server(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (monitor, _) = build_monitor(&server);

        // Reachability and credential validity are orthogonal: the check
        // "succeeds" as a reachability probe even though auth failed.
        assert!(monitor.check_server_online().await);
        let status = monitor.get_status();
        assert!(status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Invalid);
        assert_eq!(status.http_status, Some(403));
    }

    #[tokio::test]
    async fn test_unexpected_code_is_errored_with_unknown_auth() {
        let server = spawn_canned_server(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let (monitor, _) = build_monitor(&server);

        assert!(monitor.check_server_online().await);
        let status = monitor.get_status();
        assert!(status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Unknown);
        assert_eq!(status.http_status, Some(500));
        assert!(status.errored);
    }

    #[tokio::test]
    async fn test_unreachable_host_marks_unreachable() {
        let (monitor, _) = build_monitor(UNREACHABLE);

        assert!(!monitor.check_server_online().await);
        let status = monitor.get_status();
        assert!(!status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Unknown);
        assert_eq!(status.http_status, None);
        assert!(!status.timed_out);
        assert!(status.errored);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_timed_out() {
        let server = spawn_silent_server().await;
        let (monitor, _) = build_monitor(&server);
        let monitor = monitor.with_check_timeout(Duration::from_millis(200));

        assert!(!monitor.check_server_online().await);
        let status = monitor.get_status();
        assert!(!status.reachable);
        assert!(status.timed_out);
        assert!(!status.errored);
        assert_eq!(status.auth_valid, AuthValidity::Unknown);
    }

    #[tokio::test]
    async fn test_set_status_suppresses_repeat_broadcasts() {
        let (monitor, bus) = build_monitor(UNREACHABLE);
        let mut rx = bus.subscribe();

        let patch = StatusPatch {
            reachable: Some(true),
            auth_valid: Some(AuthValidity::Valid),
            http_status: Some(Some(200)),
            ..Default::default()
        };
        monitor.set_status(patch.clone());
        monitor.set_status(patch);

        // Exactly one broadcast: the second call changed nothing
        assert!(rx.try_recv().is_ok());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_set_status_enforces_unreachable_invariant() {
        let (monitor, _) = build_monitor(UNREACHABLE);

        monitor.set_status(StatusPatch {
            reachable: Some(false),
            auth_valid: Some(AuthValidity::Valid),
            http_status: Some(Some(200)),
            ..Default::default()
        });

        let status = monitor.get_status();
        assert!(!status.reachable);
        assert_eq!(status.auth_valid, AuthValidity::Unknown);
        assert_eq!(status.http_status, None);
    }

    #[tokio::test]
    async fn test_force_check_broadcasts_twice_and_persists() {
        let (monitor, bus) = build_monitor(UNREACHABLE);
        let mut rx = bus.subscribe();

        monitor.force_server_check().await;
        tokio::time::sleep(REBROADCAST_DELAY + Duration::from_millis(100)).await;

        let mut status_broadcasts = 0;
        while let Ok(notification) = rx.try_recv() {
            if notification.kind == recap_bus::NotificationKind::ServerStatusChanged {
                status_broadcasts += 1;
            }
        }
        // One from the unreachable transition inside set_status, plus the
        // two unconditional broadcasts of the forced check
        assert!(status_broadcasts >= 2);

        // Snapshot persisted for late-starting contexts
        let (fresh, _) = build_monitor(UNREACHABLE);
        assert!(fresh.load_snapshot().is_none());
        assert!(monitor.load_snapshot().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let server =
            spawn_canned_server("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        let fast = Arc::new(SessionStore::new());
        let durable = Arc::new(SessionStore::new());
        let store = CredentialStore::new(fast, durable);
        let bus = NotificationBus::new();
        let auth = AuthSessionManager::new(store.clone(), bus.clone(), server.as_str());
        let monitor = ServerStatusMonitor::new(auth.clone(), store.clone(), bus.clone(), server.as_str());

        monitor.force_server_check().await;

        // A second monitor over the same durable store picks the snapshot up
        let later = ServerStatusMonitor::new(auth, store, bus, server.as_str());
        let restored = later.load_snapshot().unwrap();
        assert!(restored.reachable);
        assert_eq!(restored.auth_valid, AuthValidity::Valid);
        assert_eq!(later.get_status(), restored);
    }

    #[tokio::test]
    async fn test_get_status_returns_defensive_copy() {
        let (monitor, _) = build_monitor(UNREACHABLE);

        let mut copy = monitor.get_status();
        copy.reachable = true;
        assert!(!monitor.get_status().reachable);
    }
}
