//! Authentication state snapshot.

use serde::{Deserialize, Serialize};

/// Snapshot of authentication state for broadcasts and status reporting.
///
/// Invariant: `is_authenticated` implies `has_credential` in steady state.
/// An observed violation is an error condition that the session manager
/// repairs or resolves by eviction, never a state it reports as valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Whether the client currently considers itself authenticated.
    pub is_authenticated: bool,
    /// Whether a credential is held in memory.
    pub has_credential: bool,
    /// Redacted credential preview (first/last 4 characters) for
    /// diagnostics. The full credential is never exposed or logged.
    pub credential_preview: Option<String>,
}

impl AuthState {
    /// A logged-out state.
    pub fn logged_out() -> Self {
        Self {
            is_authenticated: false,
            has_credential: false,
            credential_preview: None,
        }
    }
}

/// Redact a credential down to its first and last four characters.
pub(crate) fn redact_credential(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
