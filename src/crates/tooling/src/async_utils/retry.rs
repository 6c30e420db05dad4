//! Retry utilities for async operations
//!
//! Provides a bounded retry executor with exponential backoff, jitter,
//! per-attempt timeouts and a pluggable retry predicate.
//!
//! The delay before attempt `n + 1` (after attempt `n` failed) is
//!
//! ```text
//! min(base_delay * 2^(n - 1) * jitter, max_delay)      jitter ∈ [0.5, 1.5)
//! ```

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::timeout::{with_timeout, TimedOut, TimeoutError};

/// Errors that know whether retrying them can help.
///
/// Used as the default retry predicate of [`RetryPolicy`].
pub trait Retryable {
    /// `true` for transient failures (transport errors, 5xx, rate limits).
    fn is_retryable(&self) -> bool;
}

/// Shared retry predicate.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Configuration for retrying a failed operation.
///
/// A policy is immutable once built and is meant to be used for a single
/// logical invocation of [`execute`].
pub struct RetryPolicy<E> {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the second attempt, before jitter
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Timeout applied to each attempt individually
    pub attempt_timeout: Option<Duration>,

    /// Whether to scale delays by a random factor in `[0.5, 1.5)`
    pub jitter: bool,

    predicate: RetryPredicate<E>,
}

impl<E> RetryPolicy<E> {
    /// Create a policy that retries every failure up to `max_attempts` times.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tooling::async_utils::retry::RetryPolicy;
    ///
    /// let policy: RetryPolicy<String> = RetryPolicy::new(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            attempt_timeout: None,
            jitter: true,
            predicate: Arc::new(|_| true),
        }
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the retry predicate.
    ///
    /// Returning `false` makes the executor fail fast on that error.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Whether `error` should be retried according to the predicate.
    pub fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..1.5)
        } else {
            1.0
        };
        self.delay_with_factor(attempt, factor)
    }

    fn delay_with_factor(&self, attempt: u32, factor: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * factor;
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

impl<E: Retryable + 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(3).with_predicate(|e: &E| e.is_retryable())
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            attempt_timeout: self.attempt_timeout,
            jitter: self.jitter,
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

/// Execute an async operation with retry logic
///
/// Runs `operation` until it succeeds, the policy's predicate rejects the
/// error, or `max_attempts` is reached. The last error is returned unchanged.
/// An attempt that exceeds the per-attempt timeout fails with
/// `E::from(TimedOut)` and is always eligible for another attempt.
///
/// Dropping the returned future cancels the in-flight attempt and any
/// pending backoff sleep.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::async_utils::retry::{execute, RetryPolicy};
///
/// let policy = RetryPolicy::new(3).with_predicate(|e: &ApiError| e.is_transient());
/// let body = execute(&policy, || client.fetch()).await?;
/// ```
pub async fn execute<F, Fut, T, E>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TimedOut> + fmt::Display,
{
    let mut attempt = 1;

    loop {
        let outcome = match policy.attempt_timeout {
            Some(limit) => match with_timeout(limit, operation()).await {
                Ok(value) => Ok(value),
                Err(TimeoutError::OperationFailed(error)) => Err((error, false)),
                Err(TimeoutError::Timeout(after)) => Err((E::from(TimedOut(after)), true)),
            },
            None => operation().await.map_err(|error| (error, false)),
        };

        let (error, timed_out) = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) => failure,
        };

        if attempt >= policy.max_attempts {
            warn!(attempt, error = %error, "Retry budget exhausted");
            return Err(error);
        }

        if !timed_out && !policy.should_retry(&error) {
            debug!(attempt, error = %error, "Non-retryable error, failing fast");
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, retrying after delay"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Whether an HTTP status code denotes a transient condition.
///
/// 429 and every 5xx are retryable; everything else is not.
///
/// ```rust
/// use tooling::async_utils::retry::is_retryable_status;
///
/// assert!(is_retryable_status(503));
/// assert!(is_retryable_status(429));
/// assert!(!is_retryable_status(401));
/// assert!(!is_retryable_status(404));
/// ```
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
