//! Exponential backoff retrier

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default attempt budget for generic calls
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Attempt budget for upload-part calls
pub const PART_MAX_ATTEMPTS: u32 = 5;
/// Delay before the second attempt
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Upper bound for any single delay
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Multiplier applied per attempt
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Classification the retrier needs from an error
pub trait Retryable {
    /// The caller stopped the operation; never retried
    fn is_cancellation(&self) -> bool;

    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool {
        true
    }

    /// Error value reported when the cancellation token fires
    fn cancelled() -> Self;
}

/// Retry policy parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Policy used for upload-part calls
    pub fn for_parts() -> Self {
        Self {
            max_attempts: PART_MAX_ATTEMPTS,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay after failed attempt `attempt` (1-based):
    /// `min(initial * factor^(attempt - 1), max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        // A factor below 1 would make delays shrink
        let factor = self.backoff_factor.max(1.0);
        let raw = self.initial_delay_ms as f64 * factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Stateless retry wrapper; safe to share between independent operations
#[derive(Debug, Clone, Copy, Default)]
pub struct BackoffRetrier {
    policy: RetryPolicy,
}

impl BackoffRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent. The operation receives the 1-based attempt number.
    ///
    /// Each attempt and each backoff sleep is raced against `cancel`. The last
    /// observed error is returned as-is.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(E::cancelled());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(E::cancelled()),
                r = operation(attempt) => r,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if error.is_cancellation() {
                debug!("{} cancelled on attempt {}", label, attempt);
                return Err(error);
            }
            if !error.is_transient() {
                warn!("{} failed with non-retryable error: {}", label, error);
                return Err(error);
            }
            if attempt >= max_attempts {
                warn!(
                    "{} failed after {} attempts: {}",
                    label, max_attempts, error
                );
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            warn!(
                "{} failed (attempt {}/{}): {}, retrying in {}ms...",
                label,
                attempt,
                max_attempts,
                error,
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
