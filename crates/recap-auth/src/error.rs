//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
///
/// Storage and broadcast failures never surface here; they are contained
/// and logged inside the session manager. Only server interactions can
/// produce a user-visible error, and only login returns one.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server rejected the login; carries its error message verbatim.
    #[error("Login failed: {0}")]
    InvalidCredentials(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be
    /// retried (connection failures, timeouts, 5xx responses).
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            AuthError::InvalidCredentials(_) => false,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
