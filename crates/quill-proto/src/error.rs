//! Transport-level error types.

use thiserror::Error;

/// Errors raised by a transport when a request never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// The connection could not be established (refused, DNS, TLS).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request did not complete within the transport timeout.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl NetworkError {
    /// Returns true if the failure is transient and an idempotent request may be resent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}
