//! Rate limiting utilities
//!
//! Token bucket limiter used to pace outbound calls to rate-limited APIs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Simple token bucket rate limiter
///
/// Tokens are added at a constant rate up to a maximum capacity. Cloning
/// the limiter shares the bucket.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::rate_limit::RateLimiter;
/// use std::time::Duration;
///
/// // 5 upstream requests per minute
/// let limiter = RateLimiter::new(5, Duration::from_secs(60));
/// limiter.acquire().await;
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
}

struct RateLimiterState {
    /// Maximum number of tokens
    capacity: usize,

    /// Current number of tokens
    tokens: f64,

    /// Time to refill the whole bucket
    refill_period: Duration,

    /// Last refill time
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter allowing `max_operations` per `period`.
    pub fn new(max_operations: usize, period: Duration) -> Self {
        let capacity = max_operations.max(1);
        Self {
            state: Arc::new(Mutex::new(RateLimiterState {
                capacity,
                tokens: capacity as f64,
                refill_period: period,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX / 2, Duration::from_nanos(1))
    }

    /// Take a token if one is available (non-blocking)
    pub async fn check(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refill();

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                state.refill();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                state.time_until_token()
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limited, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of operations that can be performed immediately
    pub async fn available(&self) -> usize {
        let mut state = self.state.lock().await;
        state.refill();
        state.tokens.floor() as usize
    }
}

impl RateLimiterState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        if elapsed >= self.refill_period {
            self.tokens = self.capacity as f64;
        } else {
            let ratio = elapsed.as_secs_f64() / self.refill_period.as_secs_f64();
            self.tokens = (self.tokens + self.capacity as f64 * ratio).min(self.capacity as f64);
        }
        self.last_refill = now;
    }

    fn time_until_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        let per_token = self.refill_period.as_secs_f64() / self.capacity as f64;
        Duration::from_secs_f64(missing * per_token).max(Duration::from_millis(1))
    }
}
