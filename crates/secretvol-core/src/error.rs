//! Error types for secret store access.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by secret store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the request (connect, auth, fetch).
    #[error("backend error: {0}")]
    Backend(String),

    /// A backend call exceeded its deadline.
    #[error("backend request for {path:?} timed out after {timeout:?}")]
    Timeout {
        /// Logical path of the request that timed out.
        path: String,
        /// The configured deadline.
        timeout: Duration,
    },

    /// No secret exists at the requested path.
    #[error("no secret at {0:?}")]
    NotFound(String),

    /// The requested backend id is not registered.
    #[error("unknown backend {0:?}")]
    UnknownBackend(String),

    /// A backend option was missing or malformed.
    #[error("invalid backend option: {0}")]
    InvalidOption(String),
}

impl StoreError {
    /// True if this error represents an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}
