//! Async utilities for common async patterns
//!
//! - Bounded retries with exponential backoff and jitter
//! - Timeout wrappers
//!
//! # Example
//!
//! ```rust,ignore
//! use tooling::async_utils::retry::{execute, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default()
//!     .with_base_delay(Duration::from_millis(500))
//!     .with_attempt_timeout(Duration::from_secs(30));
//!
//! let accepted = execute(&policy, || transport.start(&request)).await?;
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{execute, is_retryable_status, RetryPolicy, Retryable};
pub use timeout::{with_timeout, TimedOut, TimeoutError};
