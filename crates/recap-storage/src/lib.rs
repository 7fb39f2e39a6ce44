//! Storage abstraction for the Recap client.
//!
//! The client persists its credential across two key-value backends with
//! different lifetimes:
//! - **Fast backend** ([`SessionStore`]): in-process, low latency, cleared
//!   whenever the worker restarts.
//! - **Durable backend** ([`DiskStore`]): JSON file under the base
//!   directory, survives restarts, authoritative across them.
//!
//! [`CredentialStore`] layers the credential lifecycle on top of the two
//! backends: dual writes, read-repair consistency checking, and
//! failure-tolerant semantics (a backend error never propagates past this
//! crate's boundary).

mod credential_store;
mod disk_store;
mod keys;
mod session_store;
mod traits;

pub use credential_store::{ConsistencyReport, CredentialStore, CONSISTENCY_CHECK_DELAY};
pub use disk_store::DiskStore;
pub use keys::StorageKeys;
pub use session_store::SessionStore;
pub use traits::KeyValueStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
