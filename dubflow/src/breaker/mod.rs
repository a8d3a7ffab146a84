//! Per-service circuit breaker.
//!
//! Tracks consecutive failures per external service and opens the
//! breaker once the threshold is reached, so a failing service is
//! skipped without incurring its latency. A success closes the breaker
//! and decays the failure count by one; a cooled-down breaker resets
//! itself on the next query.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failures required to open the breaker.
    pub failure_threshold: u32,
    /// How long after the last failure an open breaker auto-resets.
    pub cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

/// Per-service breaker state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BreakerState {
    /// Current consecutive-failure count, decayed by successes.
    pub failure_count: u32,
    /// Time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Whether calls to the service are currently skipped.
    pub is_open: bool,
}

/// Failure counters keyed by service name.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    states: DashMap<String, BreakerState>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker with the given config.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            states: DashMap::new(),
            config,
        }
    }

    /// Returns true if calls to `service` should be skipped.
    ///
    /// An open breaker whose cool-down has elapsed resets to closed as a
    /// side effect of this query.
    #[must_use]
    pub fn is_open(&self, service: &str) -> bool {
        let Some(mut entry) = self.states.get_mut(service) else {
            return false;
        };

        if !entry.is_open {
            return false;
        }

        let cool_down = ChronoDuration::from_std(self.config.cool_down).unwrap_or_default();
        let cooled = entry
            .last_failure_at
            .map_or(true, |at| Utc::now() - at > cool_down);
        if cooled {
            debug!(service, "circuit breaker cool-down elapsed, closing");
            entry.is_open = false;
            entry.failure_count = 0;
            return false;
        }

        true
    }

    /// Records a failed call to `service`.
    pub fn record_failure(&self, service: &str) {
        let mut entry = self.states.entry(service.to_string()).or_default();
        entry.failure_count += 1;
        entry.last_failure_at = Some(Utc::now());
        if entry.failure_count >= self.config.failure_threshold && !entry.is_open {
            warn!(
                service,
                failures = entry.failure_count,
                "circuit breaker opened"
            );
            entry.is_open = true;
        }
    }

    /// Records a successful call to `service`.
    ///
    /// Closes the breaker and decays the failure count by one.
    pub fn record_success(&self, service: &str) {
        if let Some(mut entry) = self.states.get_mut(service) {
            entry.failure_count = entry.failure_count.saturating_sub(1);
            entry.is_open = false;
        }
    }

    /// Clears all state for `service`.
    pub fn reset(&self, service: &str) {
        self.states.remove(service);
    }

    /// Current state for `service`, if any calls have been recorded.
    #[must_use]
    pub fn state(&self, service: &str) -> Option<BreakerState> {
        self.states.get(service).map(|s| s.clone())
    }

    /// Snapshot of all tracked services.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, BreakerState> {
        self.states
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.is_open("tts"));
    }

    #[test]
    fn test_opens_at_exact_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        });

        for _ in 0..4 {
            breaker.record_failure("tts");
        }
        assert!(!breaker.is_open("tts"));

        breaker.record_failure("tts");
        assert!(breaker.is_open("tts"));
    }

    #[test]
    fn test_success_closes_and_decays() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cool_down: Duration::from_secs(60),
        });

        for _ in 0..3 {
            breaker.record_failure("tts");
        }
        assert!(breaker.is_open("tts"));

        breaker.record_success("tts");
        assert!(!breaker.is_open("tts"));
        assert_eq!(breaker.state("tts").unwrap().failure_count, 2);
    }

    #[test]
    fn test_intervening_success_prevents_opening() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cool_down: Duration::from_secs(60),
        });

        breaker.record_failure("tts");
        breaker.record_failure("tts");
        breaker.record_success("tts");
        breaker.record_failure("tts");

        // 2 - 1 + 1 = 2 failures, below the threshold of 3.
        assert!(!breaker.is_open("tts"));
    }

    #[test]
    fn test_cool_down_auto_reset() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            cool_down: Duration::from_millis(0),
        });

        breaker.record_failure("tts");
        // Zero cool-down: the next query observes an elapsed window.
        assert!(!breaker.is_open("tts"));
        assert_eq!(breaker.state("tts").unwrap().failure_count, 0);
    }

    #[test]
    fn test_services_are_independent() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            cool_down: Duration::from_secs(60),
        });

        breaker.record_failure("tts-a");
        assert!(breaker.is_open("tts-a"));
        assert!(!breaker.is_open("tts-b"));
    }

    #[test]
    fn test_snapshot() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure("a");
        breaker.record_failure("b");
        let snap = breaker.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["a"].failure_count, 1);
    }
}
