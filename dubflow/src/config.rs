//! Aggregate configuration for an orchestrator instance.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::cache::CacheConfig;
use crate::pipeline::ExecutorConfig;
use crate::queue::QueueConfig;
use crate::router::RouterConfig;

/// Everything an [`crate::orchestrator::Orchestrator`] needs, with
/// defaults suitable for tests and small deployments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue admission and dispatch limits.
    pub queue: QueueConfig,
    /// Pipeline retry, backoff, and timeout tuning.
    pub executor: ExecutorConfig,
    /// Backend routing weights and quota threshold.
    pub router: RouterConfig,
    /// Memoization cache limits and persistence.
    pub cache: CacheConfig,
    /// Circuit breaker threshold and cool-down.
    pub breaker: BreakerConfig,
    /// Interval between scheduler ticks.
    pub tick_interval: TickInterval,
}

/// Scheduler tick interval wrapper with a 1s default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickInterval(pub Duration);

impl Default for TickInterval {
    fn default() -> Self {
        Self(Duration::from_secs(1))
    }
}

impl From<Duration> for TickInterval {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}
