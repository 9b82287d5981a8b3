use crate::Error;
use std::time::Duration;

/// Which commit failures cause a batch to be re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    /// Only [`Error::ConcurrentBatch`].
    Conflict,
    /// Any commit failure, whatever its kind.
    AnyCommitError,
}

/// Configuration for re-running a batch whose commit failed.
///
/// Defines how many times to re-run and how long to wait between attempts,
/// using exponential backoff with configurable parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,

    /// Commit failures that qualify for a retry
    pub retry_on: RetryOn,
}

impl RetryPolicy {
    /// Creates a new retry policy with the specified parameters.
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            retry_on: RetryOn::Conflict,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(0, 0, 0, 1.0)
    }

    /// Three attempts in total, back to back, retrying only conflicts.
    pub fn batch() -> Self {
        Self::new(2, 0, 0, 1.0)
    }

    /// Select which commit failures are retried.
    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Total number of attempts, including the first.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }

    /// Whether a commit failure qualifies for another attempt.
    pub fn should_retry(&self, error: &Error) -> bool {
        match self.retry_on {
            RetryOn::Conflict => error.is_concurrent_batch(),
            RetryOn::AnyCommitError => true,
        }
    }

    /// Calculates the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Validate policy values
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be a finite value >= 1.0".to_string());
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms must not exceed max_backoff_ms".to_string());
        }

        Ok(())
    }
}

impl Default for RetryPolicy {
    /// Returns the batch policy (same as `batch()`).
    fn default() -> Self {
        Self::batch()
    }
}
