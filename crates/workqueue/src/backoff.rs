//! # Exponential Backoff
//!
//! Provides an exponential backoff mechanism for retries.
//! Each delay doubles the previous one until it reaches the configured maximum.
//!
//! Sequence for a 5ms base and 1000s cap: 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates backoff durations that double on every call to `next_backoff()`,
/// capped at `max`. `reset()` returns the sequence to `min` after a success.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff value (for reset)
    min: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the specified minimum and maximum durations
    ///
    /// # Arguments
    ///
    /// * `min` - First backoff duration, and the value restored by `reset()`
    /// * `max` - Maximum backoff duration (caps the sequence)
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = std::cmp::min(self.current, self.max);
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Calculate the backoff duration for a given failure count (stateless)
    ///
    /// Returns `base * 2^failures`, capped at `max`. A failure count of zero yields `base`.
    ///
    /// # Arguments
    ///
    /// * `failures` - The number of consecutive failures already recorded (0-indexed)
    /// * `base` - Backoff duration for the first failure
    /// * `max` - Maximum backoff duration
    #[must_use]
    pub fn calculate_for_failures(failures: u32, base: Duration, max: Duration) -> Duration {
        match 2u32.checked_pow(failures) {
            Some(factor) => std::cmp::min(base.saturating_mul(factor), max),
            None => max,
        }
    }
}
