//! Exponential backoff with a delay cap.
//!
//! Used for both the per-step retry loop and the inter-attempt delay of
//! whole-job retries: `delay = min(base * 2^(attempt-1), cap)`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub cap_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Creates a config from base and cap delays.
    #[must_use]
    pub fn new(base_delay: Duration, cap_delay: Duration) -> Self {
        Self {
            base_delay,
            cap_delay,
        }
    }

    /// Delay before retry number `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = (self.base_delay.as_millis() as u64)
            .saturating_mul(1u64 << exponent);
        Duration::from_millis(millis).min(self.cap_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_per_attempt() {
        let config = BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(30));

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_capped_at_max() {
        let config = BackoffConfig::new(Duration::from_millis(1000), Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_for_attempt(u32::MAX), config.cap_delay);
    }
}
