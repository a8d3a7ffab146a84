//! Aggregate pipeline health statistics.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of pipeline execution statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatistics {
    /// Jobs that reached a terminal success or failure.
    pub total_jobs_processed: u64,
    /// Jobs completed successfully.
    pub successful_jobs: u64,
    /// Jobs that failed terminally.
    pub failed_jobs: u64,
    /// Rolling mean of successful-path processing time in milliseconds.
    pub average_processing_time_ms: f64,
    /// successful / processed; 1.0 before any job has finished.
    pub success_rate: f64,
    /// Jobs executing at snapshot time.
    pub active_jobs: usize,
    /// Healthy when the success rate exceeds 0.8 and capacity remains.
    pub is_healthy: bool,
}

#[derive(Debug, Default)]
struct HealthInner {
    total: u64,
    successful: u64,
    failed: u64,
    average_ms: f64,
}

/// Accumulates success/failure totals with an incremental mean of
/// processing time.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    inner: Mutex<HealthInner>,
}

impl HealthMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successfully completed job.
    pub fn record_success(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.successful += 1;
        let sample = elapsed.as_millis() as f64;
        inner.average_ms += (sample - inner.average_ms) / inner.total as f64;
    }

    /// Records a terminally failed job.
    pub fn record_failure(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        inner.total += 1;
        inner.failed += 1;
        let sample = elapsed.as_millis() as f64;
        inner.average_ms += (sample - inner.average_ms) / inner.total as f64;
    }

    /// Builds a snapshot against the current queue occupancy.
    #[must_use]
    pub fn statistics(&self, active_jobs: usize, max_concurrent_jobs: usize) -> PipelineStatistics {
        let inner = self.inner.lock();
        let success_rate = if inner.total == 0 {
            1.0
        } else {
            inner.successful as f64 / inner.total as f64
        };

        PipelineStatistics {
            total_jobs_processed: inner.total,
            successful_jobs: inner.successful,
            failed_jobs: inner.failed,
            average_processing_time_ms: inner.average_ms,
            success_rate,
            active_jobs,
            is_healthy: success_rate > 0.8 && active_jobs < max_concurrent_jobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_monitor_is_healthy() {
        let monitor = HealthMonitor::new();
        let stats = monitor.statistics(0, 3);
        assert!(stats.is_healthy);
        assert_eq!(stats.total_jobs_processed, 0);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_incremental_mean() {
        let monitor = HealthMonitor::new();
        monitor.record_success(Duration::from_millis(100));
        monitor.record_success(Duration::from_millis(300));

        let stats = monitor.statistics(0, 3);
        assert!((stats.average_processing_time_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_unhealthy_below_success_threshold() {
        let monitor = HealthMonitor::new();
        monitor.record_success(Duration::from_millis(10));
        monitor.record_failure(Duration::from_millis(10));

        // 50% success rate is below the 0.8 threshold.
        let stats = monitor.statistics(0, 3);
        assert!(!stats.is_healthy);
    }

    #[test]
    fn test_unhealthy_at_full_capacity() {
        let monitor = HealthMonitor::new();
        for _ in 0..10 {
            monitor.record_success(Duration::from_millis(10));
        }

        assert!(monitor.statistics(2, 3).is_healthy);
        assert!(!monitor.statistics(3, 3).is_healthy);
    }
}
