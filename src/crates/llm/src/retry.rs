//! Randomized exponential backoff for transient API failures.
//!
//! Chat endpoints shed load with 429s and the occasional 5xx, and both
//! clear up if the caller waits. The policy here is the one the chat
//! handler has always run with: up to 6 attempts, each retry sleeping a
//! random duration drawn from an exponentially widening window between 1s
//! and 60s. Randomizing over the whole window (instead of nudging a fixed
//! delay) keeps a burst of concurrent tasks from retrying in lockstep.

use rand::Rng;
use std::time::Duration;

/// Retry budget and backoff window for an API call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` total attempts (including the
    /// first), sleeping between `min_delay` and `max_delay` before each
    /// retry.
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
        }
    }

    /// Total attempts allowed, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the call is out of attempts after `attempts` have been
    /// made.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// How long to sleep before retry number `retry` (0-based).
    ///
    /// Draws uniformly from `min_delay ..= min(min_delay << retry,
    /// max_delay)`. The window doubles with every failure until it pins
    /// at `max_delay`; the first retry always sleeps exactly `min_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let ceiling = self
            .min_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay);
        if ceiling <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=ceiling)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(6, Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_chat_handler_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 6);
        // The window has not opened yet on the first retry.
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
    }

    #[test]
    fn test_window_doubles_until_capped() {
        let policy = RetryPolicy::new(8, Duration::from_secs(1), Duration::from_secs(10));
        for _ in 0..50 {
            let second = policy.backoff(1);
            assert!(second >= Duration::from_secs(1));
            assert!(second <= Duration::from_secs(2));

            let third = policy.backoff(2);
            assert!(third >= Duration::from_secs(1));
            assert!(third <= Duration::from_secs(4));

            // Far past the cap the window pins at max_delay.
            let late = policy.backoff(30);
            assert!(late >= Duration::from_secs(1));
            assert!(late <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_degenerate_window_is_constant() {
        let policy = RetryPolicy::new(2, Duration::from_secs(3), Duration::from_secs(3));
        assert_eq!(policy.backoff(0), Duration::from_secs(3));
        assert_eq!(policy.backoff(5), Duration::from_secs(3));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(5));
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }
}
