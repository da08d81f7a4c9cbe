//! Retry schedule and request timeouts.

use std::time::Duration;

/// Floor for any single request.
const MIN_TIMEOUT: Duration = Duration::from_secs(30);
/// Ceiling for any single request.
const MAX_TIMEOUT: Duration = Duration::from_secs(600);
/// Extra second granted per this many bytes of body.
const BYTES_PER_SECOND: u64 = 100 * 1024;

/// Timeout for a request carrying `len` bytes of body.
///
/// 30 seconds plus one second per 100 KiB, capped at 10 minutes. Computed
/// for every request since body sizes differ.
pub fn request_timeout(len: u64) -> Duration {
    MIN_TIMEOUT.saturating_add(Duration::from_secs(len / BYTES_PER_SECOND)).min(MAX_TIMEOUT)
}

/// Exponential backoff with linear jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per file, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Added once per attempt made so far.
    pub jitter: Duration,
}
impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(50),
        }
    }
}
impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let backoff = self.initial_delay.saturating_mul(multiplier).min(self.max_delay);
        backoff.saturating_add(self.jitter.saturating_mul(attempt))
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
