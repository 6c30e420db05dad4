//! Streaming request relay
//!
//! A server that accepts queries, runs them against an upstream language
//! model and reports progress over a server-sent event push channel, plus the
//! client side that drives it: a reconnecting channel client, a retrying
//! request orchestrator and a fingerprinted response cache.
//!
//! # Modules
//!
//! - [`session`] - push-channel session registry and per-session event outbox
//! - [`cache`] - per-category TTL/size bounded response cache
//! - [`client`] - transport, reconnecting channel client and request orchestrator
//! - [`api`] - axum HTTP surface (`/process`, `/stream`, `/health`, `/stats`)
//! - [`worker`] / [`upstream`] - server-side job execution

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod events;
pub mod fingerprint;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod upstream;
pub mod worker;

pub use cache::{CachePolicy, CacheStats, ResponseCache};
pub use config::RelayConfig;
pub use events::{EventKind, StreamEvent};
pub use fingerprint::{CacheKey, Category, FileAttachment};
pub use session::{SessionRegistry, SessionStats};

/// Crate version reported by `GET /health`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use thiserror::Error;
use tooling::async_utils::{is_retryable_status, Retryable, TimedOut};
use tooling::logging::redact_secrets;

/// How an error should be treated by retry and reconnect logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network failures, 5xx, rate limiting, dropped channels.
    Transient,
    /// Authentication failures, malformed requests, protocol corruption.
    Permanent,
}

/// Errors produced by the relay crate
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or rejected credential (HTTP 401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limited by the remote side (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Any other non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection, DNS or body transfer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single attempt ran past its deadline
    #[error("{0}")]
    TimedOut(#[from] TimedOut),

    /// Malformed event or response body
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request rejected before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tooling helper failure
    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Map a non-success HTTP status and response body to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => RelayError::Unauthorized(message),
            429 => RelayError::RateLimited(message),
            _ => RelayError::Status { status, message },
        }
    }

    /// Classify this error as transient or permanent.
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::RateLimited(_) | RelayError::Transport(_) | RelayError::TimedOut(_) => {
                ErrorClass::Transient
            }
            RelayError::Status { status, .. } if is_retryable_status(*status) => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RelayError::Unauthorized(_) => Some(401),
            RelayError::RateLimited(_) => Some(429),
            RelayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for RelayError {
    fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest includes the request URL, which may carry a token
        let message = redact_secrets(&err.to_string());
        match err.status() {
            Some(status) => RelayError::from_status(status.as_u16(), message),
            None if err.is_decode() => RelayError::Decode(message),
            None => RelayError::Transport(message),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode(err.to_string())
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_classification() {
        assert_eq!(RelayError::from_status(401, "").class(), ErrorClass::Permanent);
        assert_eq!(RelayError::from_status(429, "").class(), ErrorClass::Transient);
        assert_eq!(RelayError::from_status(503, "").class(), ErrorClass::Transient);
        assert_eq!(RelayError::from_status(500, "").class(), ErrorClass::Transient);
        assert_eq!(RelayError::from_status(400, "").class(), ErrorClass::Permanent);
        assert_eq!(RelayError::from_status(404, "").class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_transport_and_timeout_are_retryable() {
        assert!(RelayError::Transport("connection reset".into()).is_retryable());
        assert!(RelayError::from(TimedOut(Duration::from_secs(1))).is_retryable());
        assert!(!RelayError::Decode("bad json".into()).is_retryable());
        assert!(!RelayError::Unauthorized("no token".into()).is_retryable());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(RelayError::from_status(401, "x").status(), Some(401));
        assert_eq!(RelayError::from_status(502, "x").status(), Some(502));
        assert_eq!(RelayError::Transport("x".into()).status(), None);
    }
}
