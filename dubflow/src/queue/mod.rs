//! Job queue: admission control, priority dispatch, and lifecycle
//! bookkeeping.
//!
//! All job state lives behind one mutex owned by the queue instance;
//! the executor and orchestrator mutate jobs only through these methods.
//! Dispatch order is strict descending priority with FIFO tie-break on
//! submission time. Completion order is unconstrained.

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{Job, JobId, JobStatus};
use crate::errors::{OrchestratorError, Result};

/// Queue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued (pending) jobs before admission is refused.
    pub max_queue_size: usize,
    /// Maximum concurrently executing jobs.
    pub max_concurrent_jobs: usize,
    /// Delay applied before a retried job becomes dispatchable again.
    pub retry_delay: Duration,
    /// How long terminal jobs are retained before the cleanup sweep
    /// drops them.
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_concurrent_jobs: 3,
            retry_delay: Duration::from_secs(30),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Read-only queue aggregates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// All jobs currently retained.
    pub total: usize,
    /// Jobs waiting for dispatch.
    pub pending: usize,
    /// Jobs currently executing.
    pub processing: usize,
    /// Jobs completed successfully.
    pub completed: usize,
    /// Jobs that failed terminally.
    pub failed: usize,
    /// Jobs cancelled by their owner.
    pub cancelled: usize,
    /// Mean wait of still-queued jobs in milliseconds.
    pub average_wait_ms: f64,
}

struct QueueInner {
    jobs: HashMap<JobId, Job>,
    pending: Vec<JobId>,
    active: HashSet<JobId>,
}

/// Priority queue with admission control and concurrency-limited
/// dispatch.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    config: QueueConfig,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("JobQueue")
            .field("jobs", &inner.jobs.len())
            .field("pending", &inner.pending.len())
            .field("active", &inner.active.len())
            .finish()
    }
}

impl JobQueue {
    /// Creates an empty queue with the given config.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: HashMap::new(),
                pending: Vec::new(),
                active: HashSet::new(),
            }),
            config,
        }
    }

    /// The queue config.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Admits a job, or refuses it when the pending set is full.
    pub fn submit(&self, job: Job) -> Result<Job> {
        if job.owner.is_empty() {
            return Err(OrchestratorError::Validation(
                "job owner must not be empty".to_string(),
            ));
        }
        if job.source_ref().is_empty() {
            return Err(OrchestratorError::Validation(
                "job must reference a source artifact".to_string(),
            ));
        }
        if job.status != JobStatus::Pending {
            return Err(OrchestratorError::Validation(format!(
                "job must be submitted as pending, got {}",
                job.status
            )));
        }

        let mut inner = self.inner.lock();
        if inner.pending.len() >= self.config.max_queue_size {
            return Err(OrchestratorError::CapacityExceeded {
                size: inner.pending.len(),
                max: self.config.max_queue_size,
            });
        }

        let id = job.id;
        inner.pending.push(id);
        inner.jobs.insert(id, job.clone());
        info!(job_id = %id, owner = %job.owner, priority = job.priority, "job admitted");
        Ok(job)
    }

    /// Dequeues the next dispatchable job, if concurrency allows.
    ///
    /// Selection is by descending priority, then ascending submission
    /// time. The returned job has been marked `Processing` and counted
    /// against the concurrency limit.
    pub fn dequeue_next(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        if inner.active.len() >= self.config.max_concurrent_jobs {
            return None;
        }

        let next_id = {
            let jobs = &inner.jobs;
            inner
                .pending
                .iter()
                .filter_map(|id| jobs.get(id))
                .filter(|job| job.status == JobStatus::Pending)
                .max_by(|a, b| {
                    a.priority
                        .cmp(&b.priority)
                        .then_with(|| b.created_at.cmp(&a.created_at))
                })
                .map(|job| job.id)
        }?;

        inner.pending.retain(|id| *id != next_id);
        inner.active.insert(next_id);

        let job = inner.jobs.get_mut(&next_id)?;
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        job.touch();
        debug!(job_id = %next_id, "job dispatched");
        Some(job.clone())
    }

    /// Cancels a job on behalf of `caller`.
    ///
    /// Only the owner may cancel, and only from a non-terminal status. A
    /// job still in the pending set is removed from it; a job already in
    /// flight keeps running until the executor observes the status at
    /// the next step boundary.
    pub fn cancel(&self, job_id: JobId, caller: &str) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if job.owner != caller {
            return Err(OrchestratorError::Unauthorized {
                caller: caller.to_string(),
                job_id,
            });
        }
        if job.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                job_id,
                from: job.status.to_string(),
                to: JobStatus::Cancelled.to_string(),
            });
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        job.touch();
        let job = job.clone();

        inner.pending.retain(|id| *id != job_id);
        inner.active.remove(&job_id);
        info!(job_id = %job_id, "job cancelled");
        Ok(job)
    }

    /// Re-queues a failed job for another whole-job attempt.
    ///
    /// Refused once `retry_count` has reached `max_retries`. Progress
    /// resets to zero and the retry counter increments.
    pub fn requeue_for_retry(&self, job_id: JobId) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if job.status != JobStatus::Failed {
            return Err(OrchestratorError::InvalidTransition {
                job_id,
                from: job.status.to_string(),
                to: JobStatus::Pending.to_string(),
            });
        }
        if job.retry_count >= job.max_retries {
            return Err(OrchestratorError::Unrecoverable(format!(
                "job {job_id} exhausted its {} retries",
                job.max_retries
            )));
        }

        job.retry_count += 1;
        job.status = JobStatus::Pending;
        job.reset_progress();
        job.error_message = None;
        job.started_at = None;
        job.completed_at = None;
        let job = job.clone();

        inner.pending.push(job_id);
        info!(job_id = %job_id, retry = job.retry_count, "job re-queued for retry");
        Ok(job)
    }

    /// Marks an in-flight job completed and releases its concurrency slot.
    pub fn complete(&self, job_id: JobId, output_refs: Vec<String>) -> Result<Job> {
        self.finish(job_id, JobStatus::Completed, None, Some(output_refs))
    }

    /// Marks an in-flight job failed and releases its concurrency slot.
    pub fn fail(&self, job_id: JobId, error_message: impl Into<String>) -> Result<Job> {
        self.finish(job_id, JobStatus::Failed, Some(error_message.into()), None)
    }

    fn finish(
        &self,
        job_id: JobId,
        status: JobStatus,
        error_message: Option<String>,
        output_refs: Option<Vec<String>>,
    ) -> Result<Job> {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;

        if !job.status.can_transition_to(status) {
            return Err(OrchestratorError::InvalidTransition {
                job_id,
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }

        job.status = status;
        job.completed_at = Some(Utc::now());
        job.error_message = error_message;
        if let Some(refs) = output_refs {
            job.output_refs = refs;
        }
        if status == JobStatus::Completed {
            job.progress = 100;
        }
        job.touch();
        let job = job.clone();
        inner.active.remove(&job_id);
        Ok(job)
    }

    /// Releases a concurrency slot without changing status.
    ///
    /// Used when a job was cancelled while in flight: the executor stops
    /// advancing it and only the slot needs returning.
    pub fn release(&self, job_id: JobId) {
        self.inner.lock().active.remove(&job_id);
    }

    /// Applies a mutation to a live job under the queue lock.
    pub fn with_job_mut<F, T>(&self, job_id: JobId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Job) -> T,
    {
        let mut inner = self.inner.lock();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;
        Ok(f(job))
    }

    /// A snapshot of the job, if it exists.
    #[must_use]
    pub fn get_job(&self, job_id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&job_id).cloned()
    }

    /// All jobs owned by `owner`, newest first.
    #[must_use]
    pub fn list_by_user(&self, owner: &str) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// All jobs in the given status, newest first.
    #[must_use]
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Number of jobs currently executing.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Read-only aggregates over all retained jobs.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        let mut stats = QueueStats {
            total: inner.jobs.len(),
            ..QueueStats::default()
        };

        let now = Utc::now();
        let mut wait_total_ms = 0.0;
        let mut waiting = 0usize;

        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => {
                    stats.pending += 1;
                    wait_total_ms += (now - job.created_at).num_milliseconds() as f64;
                    waiting += 1;
                }
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        if waiting > 0 {
            stats.average_wait_ms = wait_total_ms / waiting as f64;
        }
        stats
    }

    /// Drops terminal jobs older than the retention window.
    ///
    /// Returns the identifiers that were removed.
    pub fn cleanup_terminal(&self) -> Vec<JobId> {
        let horizon = ChronoDuration::from_std(self.config.retention).unwrap_or_default();
        let now = Utc::now();

        let mut inner = self.inner.lock();
        let stale: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| {
                job.is_terminal()
                    && job
                        .completed_at
                        .map_or(false, |done| now - done > horizon)
            })
            .map(|job| job.id)
            .collect();

        for id in &stale {
            inner.jobs.remove(id);
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "terminal job sweep");
        }
        stale
    }

    /// Removes a single job regardless of age; refuses non-terminal jobs.
    pub fn delete(&self, job_id: JobId) -> Result<Job> {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get(&job_id) else {
            return Err(OrchestratorError::JobNotFound(job_id));
        };
        if !job.is_terminal() {
            return Err(OrchestratorError::InvalidTransition {
                job_id,
                from: job.status.to_string(),
                to: "deleted".to_string(),
            });
        }
        Ok(inner.jobs.remove(&job_id).ok_or(OrchestratorError::JobNotFound(job_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn queue(max_queue: usize, max_concurrent: usize) -> JobQueue {
        JobQueue::new(QueueConfig {
            max_queue_size: max_queue,
            max_concurrent_jobs: max_concurrent,
            retry_delay: Duration::from_millis(1),
            retention: Duration::from_secs(7 * 24 * 3600),
        })
    }

    fn job(owner: &str, priority: i32) -> Job {
        Job::new(owner, "media://clip.mp4", "en", "de").with_priority(priority)
    }

    #[test]
    fn test_submit_and_get() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        let fetched = queue.get_job(submitted.id).unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[test]
    fn test_submit_rejects_when_full() {
        let queue = queue(2, 1);
        queue.submit(job("alice", 0)).unwrap();
        queue.submit(job("alice", 0)).unwrap();

        let err = queue.submit(job("alice", 0)).unwrap_err();
        assert!(matches!(err, OrchestratorError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_submit_validates_owner() {
        let queue = queue(10, 1);
        let err = queue.submit(job("", 0)).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_priority_then_fifo_dispatch_order() {
        let queue = queue(10, 3);

        let job1 = queue.submit(job("alice", 1)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let job2 = queue.submit(job("alice", 5)).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let job3 = queue.submit(job("alice", 1)).unwrap();

        assert_eq!(queue.dequeue_next().unwrap().id, job2.id);
        assert_eq!(queue.dequeue_next().unwrap().id, job1.id);
        assert_eq!(queue.dequeue_next().unwrap().id, job3.id);
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_dequeue_respects_concurrency_limit() {
        let queue = queue(10, 1);
        queue.submit(job("alice", 0)).unwrap();
        queue.submit(job("alice", 0)).unwrap();

        let first = queue.dequeue_next().unwrap();
        assert!(queue.dequeue_next().is_none());
        assert_eq!(queue.active_count(), 1);

        queue.complete(first.id, Vec::new()).unwrap();
        assert!(queue.dequeue_next().is_some());
    }

    #[test]
    fn test_dequeue_marks_processing() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        let dispatched = queue.dequeue_next().unwrap();

        assert_eq!(dispatched.id, submitted.id);
        assert_eq!(dispatched.status, JobStatus::Processing);
        assert!(dispatched.started_at.is_some());
    }

    #[test]
    fn test_cancel_requires_ownership() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();

        let err = queue.cancel(submitted.id, "mallory").unwrap_err();
        assert!(matches!(err, OrchestratorError::Unauthorized { .. }));

        let cancelled = queue.cancel(submitted.id, "alice").unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_removes_from_pending() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        queue.cancel(submitted.id, "alice").unwrap();

        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn test_cancel_terminal_is_invalid() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        queue.cancel(submitted.id, "alice").unwrap();

        let err = queue.cancel(submitted.id, "alice").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_exclusivity() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        queue.dequeue_next().unwrap();
        queue.complete(submitted.id, vec!["video://out".to_string()]).unwrap();

        // A completed job admits no further terminal transition.
        assert!(queue.fail(submitted.id, "late failure").is_err());
        assert!(queue.cancel(submitted.id, "alice").is_err());

        let job = queue.get_job(submitted.id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_requeue_for_retry() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();
        queue.dequeue_next().unwrap();
        queue.with_job_mut(submitted.id, |j| j.advance_progress(60)).unwrap();
        queue.fail(submitted.id, "transient").unwrap();

        let retried = queue.requeue_for_retry(submitted.id).unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.progress, 0);
        assert_eq!(retried.retry_count, 1);
        assert!(retried.error_message.is_none());

        // And it is dispatchable again.
        assert_eq!(queue.dequeue_next().unwrap().id, submitted.id);
    }

    #[test]
    fn test_requeue_exhausts_budget() {
        let queue = queue(10, 1);
        let submitted = queue
            .submit(job("alice", 0).with_max_retries(1))
            .unwrap();

        queue.dequeue_next().unwrap();
        queue.fail(submitted.id, "boom").unwrap();
        queue.requeue_for_retry(submitted.id).unwrap();

        queue.dequeue_next().unwrap();
        queue.fail(submitted.id, "boom again").unwrap();
        let err = queue.requeue_for_retry(submitted.id).unwrap_err();
        assert!(matches!(err, OrchestratorError::Unrecoverable(_)));
    }

    #[test]
    fn test_stats_counts_and_wait() {
        let queue = queue(10, 1);
        queue.submit(job("alice", 0)).unwrap();
        queue.submit(job("bob", 0)).unwrap();
        let c = queue.submit(job("carol", 0)).unwrap();
        queue.cancel(c.id, "carol").unwrap();

        let stats = queue.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.cancelled, 1);
        assert!(stats.average_wait_ms >= 0.0);
    }

    #[test]
    fn test_list_by_user_and_status() {
        let queue = queue(10, 1);
        queue.submit(job("alice", 0)).unwrap();
        queue.submit(job("alice", 0)).unwrap();
        queue.submit(job("bob", 0)).unwrap();

        assert_eq!(queue.list_by_user("alice").len(), 2);
        assert_eq!(queue.list_by_status(JobStatus::Pending).len(), 3);
        assert!(queue.list_by_status(JobStatus::Failed).is_empty());
    }

    #[test]
    fn test_delete_refuses_live_jobs() {
        let queue = queue(10, 1);
        let submitted = queue.submit(job("alice", 0)).unwrap();

        assert!(queue.delete(submitted.id).is_err());
        queue.cancel(submitted.id, "alice").unwrap();
        assert!(queue.delete(submitted.id).is_ok());
        assert!(queue.get_job(submitted.id).is_none());
    }

    #[test]
    fn test_cleanup_terminal_respects_retention() {
        let queue = JobQueue::new(QueueConfig {
            retention: Duration::from_secs(0),
            ..QueueConfig::default()
        });
        let submitted = queue.submit(job("alice", 0)).unwrap();
        queue.cancel(submitted.id, "alice").unwrap();

        std::thread::sleep(Duration::from_millis(5));
        let removed = queue.cleanup_terminal();
        assert_eq!(removed, vec![submitted.id]);
        assert!(queue.get_job(submitted.id).is_none());
    }
}
