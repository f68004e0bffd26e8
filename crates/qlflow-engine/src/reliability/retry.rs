//! Retry policy implementation
//!
//! Supports exponential, linear, and fibonacci backoff with jitter to
//! avoid thundering herd. Policies are built from the named entries in
//! [`qlflow_core::config::RetryConfig`].

use std::time::Duration;

use qlflow_core::config::{BackoffStrategy, RetryParams};
use qlflow_core::ErrorKind;
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Configuration for activity retries
///
/// # Example
///
/// ```
/// use qlflow_engine::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_base(Duration::from_secs(1))
///     .with_cap(Duration::from_secs(30));
///
/// // First retry after ~1 second, then ~2, ~4, ...
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,

    /// Base delay before the first retry
    pub base: Duration,

    /// Maximum delay between retries
    pub cap: Duration,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,

    /// Backoff strategy
    pub strategy: BackoffStrategy,

    /// Emit a warning after this many attempts (0 = never)
    pub alert_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
            jitter: 0.1,
            strategy: BackoffStrategy::Exponential,
            alert_after: 0,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: 0.0,
            strategy: BackoffStrategy::Linear,
            alert_after: 0,
        }
    }

    /// Build a policy from configured parameters
    pub fn from_params(params: &RetryParams) -> Self {
        Self {
            max_attempts: params.max_attempts.max(1),
            base: Duration::from_millis(params.base_ms),
            cap: Duration::from_millis(params.cap_ms),
            jitter: params.jitter.clamp(0.0, 1.0),
            strategy: params.strategy,
            alert_after: params.alert_after,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the backoff strategy
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Delay before the retry following `attempt` (1-based)
    ///
    /// Attempt 1 is the initial call and has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base_secs = self.base.as_secs_f64();
        let raw = match self.strategy {
            BackoffStrategy::Exponential => base_secs * 2f64.powi(retry_num as i32 - 1),
            BackoffStrategy::Linear => base_secs * retry_num as f64,
            BackoffStrategy::Fibonacci => base_secs * fibonacci(retry_num) as f64,
        };
        let capped = raw.min(self.cap.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether the error kind consumes retry budget
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        kind.is_retryable()
    }

    /// Whether more attempts remain after `current_attempt`
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Whether this attempt count should raise an alert
    pub fn should_alert(&self, attempt: u32) -> bool {
        self.alert_after > 0 && attempt > self.alert_after
    }

    /// Sleep the backoff delay for `attempt`, returning early on
    /// cancellation
    ///
    /// Returns `false` when interrupted.
    pub async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay_for_attempt(attempt);
        if delay.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

/// nth fibonacci number, 1-based: 1, 1, 2, 3, 5, 8, ...
fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}
