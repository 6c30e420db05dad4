//! Tooling utilities shared across the relay workspace
//!
//! # Modules
//!
//! - `async_utils` - Retry executor with backoff and per-attempt timeouts
//! - `config` - Layered configuration with environment variable loading
//! - `logging` - Secret redaction and formatting helpers for log lines
//! - `rate_limit` - Token bucket rate limiter
//! - `serialization` - Stable JSON serialization and content digests

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod rate_limit;
pub mod serialization;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// General error with message
    #[error("Tooling error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
