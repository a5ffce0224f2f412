use std::time::Duration;

use crate::error::CoreError;

/// Backoff schedule for retryable send failures.
///
/// Drives the UI's retry affordance: given how many attempts a pending
/// send has burned and the server's optional retry-after hint, produce the
/// delay before the next attempt, and stop suggesting retries once the
/// attempt budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before retrying a send that has failed `attempts` times.
    ///
    /// Doubles per attempt from the base, never below the server's
    /// retry-after hint, capped at the policy maximum.
    pub fn next_delay(&self, attempts: u32, error: &CoreError) -> Option<Duration> {
        if !error.is_retryable() || attempts >= self.max_attempts {
            return None;
        }
        let shift = attempts.saturating_sub(1).min(20);
        let calculated = self.base_delay_ms.saturating_mul(1_u64 << shift);
        let hinted = error.retry_after_ms.unwrap_or(0);
        let bounded = calculated.max(hinted).min(self.max_delay_ms);
        Some(Duration::from_millis(bounded))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 30_000, 5)
    }
}
