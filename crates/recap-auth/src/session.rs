//! Session management against the task server.
//!
//! The session manager owns the in-memory credential and authentication
//! flag. It is the single writer of that state: login, logout, startup
//! restore, server reconciliation and eviction all run through it, and
//! every externally visible change is broadcast over the notification bus.
//!
//! Consistency rules:
//! - `is_authenticated` without a credential is a violation, repaired from
//!   the fast backend or resolved by eviction, never reported as valid.
//! - Transient server trouble preserves the current state (fail-open for
//!   read-only checks); only an explicit unauthorized response evicts.

use crate::state::redact_credential;
use crate::{AuthError, AuthResult, AuthState};
use recap_bus::{Notification, NotificationBus};
use recap_storage::CredentialStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay before a restored session is validated with the server, so other
/// components can finish initializing first.
pub const STARTUP_VALIDATION_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    authenticated: bool,
}

/// Outcome of querying `/auth/check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    /// Server answered with a definitive verdict.
    Definitive(bool),
    /// Server rejected the credential outright (HTTP 401).
    Unauthorized,
    /// Server signalled no change since the last check (HTTP 304).
    NoChange,
    /// Transport failure or unexpected response; current state stands.
    Inconclusive,
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<String>,
    is_authenticated: bool,
}

/// Owns the in-memory authentication state and drives the credential
/// lifecycle against the task server.
#[derive(Clone)]
pub struct AuthSessionManager {
    state: Arc<Mutex<SessionState>>,
    store: CredentialStore,
    bus: NotificationBus,
    http_client: reqwest::Client,
    server_url: String,
}

impl AuthSessionManager {
    /// Create a new session manager.
    pub fn new(
        store: CredentialStore,
        bus: NotificationBus,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            store,
            bus,
            http_client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Current authentication state (pull API for contexts that missed a
    /// broadcast). Never performs I/O.
    pub fn get_auth_state(&self) -> AuthState {
        let state = self.state.lock().unwrap();
        AuthState {
            is_authenticated: state.is_authenticated,
            has_credential: state.credential.is_some(),
            credential_preview: state.credential.as_deref().map(redact_credential),
        }
    }

    /// Login with the shared password.
    ///
    /// On success the credential is made visible fast-path first: the
    /// session backend and in-memory state are updated before the durable
    /// write, so a durable-storage failure cannot void a login the server
    /// already accepted. On failure the server's error message is returned
    /// verbatim and the state stays logged out.
    pub async fn login(&self, password: &str) -> AuthResult<String> {
        // Defensive reset so a half-authenticated state cannot leak into a
        // fresh attempt.
        {
            let mut state = self.state.lock().unwrap();
            state.credential = None;
            state.is_authenticated = false;
        }
        self.store.clear_fast();

        debug!("Attempting login");
        let response = self
            .http_client
            .post(self.endpoint("/auth/login"))
            .json(&LoginRequest { password })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {status}"),
            };
            warn!(status = %status, "Login rejected by server");
            return Err(AuthError::InvalidCredentials(message));
        }

        let token = response.json::<LoginResponse>().await?.token.trim().to_string();

        self.store.save_fast(&token);
        {
            let mut state = self.state.lock().unwrap();
            state.credential = Some(token.clone());
            state.is_authenticated = true;
        }
        if !self.store.save(&token).await {
            warn!("Durable credential persistence incomplete, continuing with in-memory session");
        }
        self.broadcast_state();

        if self.get_auth_headers().is_empty() {
            error!("Header generation failed immediately after login; this is a logic bug");
        }

        info!("Login successful");
        Ok(token)
    }

    /// Logout.
    ///
    /// The local state is cleared first so the UI reflects the logout even
    /// when the server is unreachable; the server notification afterwards
    /// is best-effort and its failure is swallowed. Always returns `true`.
    pub async fn logout(&self) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap();
            state.is_authenticated = false;
            state.credential.take()
        };
        self.store.clear();
        self.broadcast_state();

        if let Some(token) = previous {
            let result = self
                .http_client
                .post(self.endpoint("/auth/logout"))
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    debug!(status = %response.status(), "Server logout returned non-success (ignored)");
                }
                Ok(_) => debug!("Server notified of logout"),
                Err(e) => debug!(error = %e, "Server logout notification failed (ignored)"),
            }
        }

        info!("Logged out");
        true
    }

    /// Restore a persisted session on startup.
    ///
    /// A stored credential flips the state to authenticated and broadcasts
    /// immediately; the UI must not wait on server validation. Validation
    /// runs afterwards on a grace delay, and is deliberately conservative:
    /// a failed validation is logged loudly but only an explicit
    /// unauthorized response evicts the session. Transient network trouble
    /// must not log a working user out.
    pub async fn load_persisted_session(&self) -> AuthState {
        let Some(token) = self.store.load() else {
            debug!("No persisted credential found");
            return self.get_auth_state();
        };

        info!("Restoring persisted session");
        {
            let mut state = self.state.lock().unwrap();
            state.credential = Some(token);
            state.is_authenticated = true;
        }
        self.broadcast_state();

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_VALIDATION_GRACE).await;
            manager.validate_restored_session().await;
        });

        self.get_auth_state()
    }

    async fn validate_restored_session(&self) {
        match self.query_check().await {
            CheckOutcome::Definitive(true) => {
                debug!("Restored session validated by server");
            }
            CheckOutcome::Definitive(false) => {
                error!(
                    "Server reports restored session as not authenticated; \
                     keeping session pending an explicit unauthorized response"
                );
            }
            CheckOutcome::Unauthorized => {
                warn!("Server rejected restored credential, evicting session");
                self.evict("unauthorized during startup validation");
            }
            CheckOutcome::NoChange | CheckOutcome::Inconclusive => {
                debug!("Startup validation inconclusive, keeping session");
            }
        }
    }

    /// Reconcile the local authentication state with the server.
    ///
    /// Guards the inconsistent authenticated-without-credential case first:
    /// the credential is recovered from the fast backend when possible, and
    /// the session evicted when not; that state must never be reported as
    /// authenticated. Server verdicts then reconcile as follows: a
    /// definitive answer differing from local state transitions and
    /// broadcasts; unauthorized evicts; no-change and transport failures
    /// preserve the current state so transient errors cannot cause spurious
    /// logouts.
    pub async fn check_auth_with_server(&self) -> bool {
        let inconsistent = {
            let state = self.state.lock().unwrap();
            state.is_authenticated && state.credential.is_none()
        };
        if inconsistent {
            warn!("Authenticated without credential, attempting fast-backend recovery");
            match self.store.load_fast() {
                Some(token) => {
                    info!("Credential recovered from fast backend");
                    let mut state = self.state.lock().unwrap();
                    state.credential = Some(token);
                }
                None => {
                    error!("Credential unrecoverable from any backend, evicting session");
                    self.evict("consistency violation");
                    return false;
                }
            }
        }

        let current = { self.state.lock().unwrap().is_authenticated };

        match self.query_check().await {
            CheckOutcome::Definitive(server_verdict) => {
                if server_verdict != current {
                    info!(
                        server_verdict,
                        local = current,
                        "Server auth verdict differs from local state, reconciling"
                    );
                    {
                        let mut state = self.state.lock().unwrap();
                        state.is_authenticated = server_verdict;
                    }
                    self.broadcast_state();
                }
                server_verdict
            }
            CheckOutcome::Unauthorized => {
                warn!("Server rejected credential, evicting session");
                self.evict("unauthorized");
                false
            }
            CheckOutcome::NoChange | CheckOutcome::Inconclusive => current,
        }
    }

    async fn query_check(&self) -> CheckOutcome {
        let headers = self.get_auth_headers();
        let mut request = self
            .http_client
            .get(self.endpoint("/auth/check"))
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Auth check transport failure");
                return CheckOutcome::Inconclusive;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            CheckOutcome::NoChange
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            CheckOutcome::Unauthorized
        } else if status.is_success() {
            match response.json::<CheckResponse>().await {
                Ok(body) => CheckOutcome::Definitive(body.authenticated),
                Err(e) => {
                    warn!(error = %e, "Malformed auth check response");
                    CheckOutcome::Inconclusive
                }
            }
        } else {
            warn!(status = %status, "Unexpected auth check status");
            CheckOutcome::Inconclusive
        }
    }

    /// Build the authorization headers for a server request.
    ///
    /// Reads the in-memory credential, falling back to the fast backend on
    /// a cold path. When neither holds a credential the map comes back
    /// empty (callers must treat that as "not currently authenticated")
    /// and a reload of the persisted session is scheduled so the state
    /// self-heals rather than erroring.
    pub fn get_auth_headers(&self) -> HashMap<String, String> {
        let token = { self.state.lock().unwrap().credential.clone() };
        let token = token.or_else(|| {
            debug!("No in-memory credential, trying fast-backend fallback");
            self.store.load_fast()
        });

        match token {
            Some(token) => {
                let mut headers = HashMap::new();
                headers.insert("Authorization".to_string(), format!("Bearer {token}"));
                headers
            }
            None => {
                warn!("No credential available for headers, scheduling session reload");
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let manager = self.clone();
                    handle.spawn(async move {
                        manager.load_persisted_session().await;
                    });
                }
                HashMap::new()
            }
        }
    }

    /// Unconditional hard eviction: clears memory and both storage
    /// backends, broadcasts, and returns `false` (the new authentication
    /// status, convenient for call sites that use it directly).
    pub fn reset_authentication(&self) -> bool {
        warn!("Hard authentication reset");
        self.evict("explicit reset");
        false
    }

    fn evict(&self, reason: &str) {
        warn!(reason, "Evicting session");
        {
            let mut state = self.state.lock().unwrap();
            state.credential = None;
            state.is_authenticated = false;
        }
        if !self.store.clear() {
            warn!("Credential clear was incomplete during eviction");
        }
        self.broadcast_state();
    }

    fn broadcast_state(&self) {
        let state = self.get_auth_state();
        match serde_json::to_value(&state) {
            Ok(payload) => self.bus.publish(Notification::auth_status_changed(payload)),
            Err(e) => warn!(error = %e, "Failed to encode auth state payload"),
        }
    }

    #[cfg(test)]
    fn force_state(&self, credential: Option<&str>, is_authenticated: bool) {
        let mut state = self.state.lock().unwrap();
        state.credential = credential.map(str::to_string);
        state.is_authenticated = is_authenticated;
    }
}
