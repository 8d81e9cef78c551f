//! # Exponential Backoff
//!
//! Provides the per-key exponential backoff used by the work queues for
//! rate-limited retries.
//!
//! Each consecutive failure doubles the delay, starting from a base delay and
//! capped at a maximum. The queue drops a key's backoff on success, so the next
//! failure starts again at the base.
//! With the default 5ms base and 1000s cap the sequence is:
//! 5ms, 10ms, 20ms, 40ms, ... 1000s (max).

use std::time::Duration;

/// Exponential backoff calculator
///
/// Generates backoff durations that double on every call, capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay returned for the first failure
    base: Duration,
    /// Upper bound for any returned delay
    max: Duration,
    /// Number of delays handed out so far
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and cap.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = Self::calculate_for_failure_count(self.failures, self.base, self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Number of delays handed out so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Calculate the backoff for a given failure count (stateless)
    ///
    /// `failure_count` is 0-indexed: the first failure gets `base`, the second
    /// `2 * base`, and so on, capped at `max`.
    #[must_use]
    pub fn calculate_for_failure_count(failure_count: u32, base: Duration, max: Duration) -> Duration {
        // 2^31 * base overflows any sensible cap long before this matters
        let factor = 2u32.checked_pow(failure_count.min(31)).unwrap_or(u32::MAX);
        base.checked_mul(factor).map_or(max, |delay| delay.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1000));

        assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(40));
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
        // Next would be 16s, capped at 10s
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(10));
    }

    #[test]
    fn test_calculate_for_large_failure_count_does_not_overflow() {
        let delay = ExponentialBackoff::calculate_for_failure_count(
            500,
            Duration::from_millis(5),
            Duration::from_secs(1000),
        );
        assert_eq!(delay, Duration::from_secs(1000));
    }
}
