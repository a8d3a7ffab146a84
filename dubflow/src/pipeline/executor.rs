//! Multi-step pipeline executor with layered retry and rollback.
//!
//! Two retry layers exist by design: a bounded per-step loop driven by
//! the recovery resolver, and a whole-job attempt loop that resets
//! progress between attempts. Their composition is capped explicitly by
//! `total_step_attempt_budget`, which bounds how often any single step
//! may run within one dispatch.
//!
//! Cancellation is cooperative: status is checked at step boundaries
//! and a cancelled job stops advancing, but an in-flight collaborator
//! call finishes on its own schedule.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::{Job, JobId, JobStatus, StepContext};
use crate::errors::{OrchestratorError, Result, StepError};
use crate::events::{EventSink, ProgressEvent};
use crate::pipeline::backoff::BackoffConfig;
use crate::pipeline::health::{HealthMonitor, PipelineStatistics};
use crate::pipeline::recovery::{resolve_or_default, RecoveryAction, RecoveryResolver};
use crate::pipeline::step::{validate_steps, PipelineStep};
use crate::queue::JobQueue;

/// Executor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Whole-job attempts per dispatch.
    pub max_job_attempts: u32,
    /// Invocations allowed per step within one job attempt.
    pub max_step_attempts: u32,
    /// Hard cap on invocations of any single step across all job
    /// attempts of one dispatch. Bounds the multiplicative composition
    /// of the two retry layers.
    pub total_step_attempt_budget: u32,
    /// Backoff between step retries.
    pub step_backoff: BackoffConfig,
    /// Backoff between whole-job attempts.
    pub job_backoff: BackoffConfig,
    /// Hard ceiling on total pipeline execution per dispatch.
    pub job_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_job_attempts: 2,
            max_step_attempts: 3,
            total_step_attempt_budget: 6,
            step_backoff: BackoffConfig::default(),
            job_backoff: BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(60)),
            job_timeout: Duration::from_secs(900),
        }
    }
}

struct StepFailure {
    step: String,
    error: StepError,
    action: RecoveryAction,
}

enum StepsOutcome {
    Done(StepContext),
    Cancelled,
    Failed(StepFailure),
}

enum RunOutcome {
    Completed(StepContext),
    Cancelled,
    Failed(StepFailure),
}

/// Runs dispatched jobs through the configured step list.
pub struct PipelineExecutor {
    steps: Vec<Arc<dyn PipelineStep>>,
    queue: Arc<JobQueue>,
    resolver: Arc<dyn RecoveryResolver>,
    health: Arc<HealthMonitor>,
    sink: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl PipelineExecutor {
    /// Creates an executor over a validated step list.
    pub fn new(
        steps: Vec<Arc<dyn PipelineStep>>,
        queue: Arc<JobQueue>,
        resolver: Arc<dyn RecoveryResolver>,
        sink: Arc<dyn EventSink>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        validate_steps(&steps)?;
        Ok(Self {
            steps,
            queue,
            resolver,
            health: Arc::new(HealthMonitor::new()),
            sink,
            config,
        })
    }

    /// The executor config.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Aggregate health statistics against current queue occupancy.
    #[must_use]
    pub fn statistics(&self) -> PipelineStatistics {
        self.health.statistics(
            self.queue.active_count(),
            self.queue.config().max_concurrent_jobs,
        )
    }

    /// Executes a dispatched job to a terminal status.
    ///
    /// Job-level failures are reported through the returned job's status
    /// and `error_message`, never as an `Err`; errors are reserved for
    /// bookkeeping problems such as an unknown job ID.
    pub async fn execute_job(&self, job_id: JobId) -> Result<Job> {
        let job = self
            .queue
            .get_job(job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))?;
        if job.status != JobStatus::Processing {
            return Err(OrchestratorError::InvalidTransition {
                job_id,
                from: job.status.to_string(),
                to: JobStatus::Processing.to_string(),
            });
        }

        let started = Instant::now();
        info!(job_id = %job_id, "pipeline execution started");

        match tokio::time::timeout(self.config.job_timeout, self.run_attempts(job_id)).await {
            Ok(RunOutcome::Completed(ctx)) => {
                let job = self.queue.complete(job_id, ctx.output_refs())?;
                self.health.record_success(started.elapsed());
                info!(job_id = %job_id, elapsed_ms = started.elapsed().as_millis() as u64, "job completed");
                self.sink.try_emit(
                    ProgressEvent::new(job_id, JobStatus::Completed, 100)
                        .with_message("pipeline completed"),
                );
                Ok(job)
            }
            Ok(RunOutcome::Cancelled) => {
                self.queue.release(job_id);
                debug!(job_id = %job_id, "stopped advancing cancelled job");
                self.queue
                    .get_job(job_id)
                    .ok_or(OrchestratorError::JobNotFound(job_id))
            }
            Ok(RunOutcome::Failed(failure)) => {
                let message = format!(
                    "step '{}' failed: {} (recovery: {})",
                    failure.step, failure.error, failure.action
                );
                self.fail_job(job_id, started, &message)
            }
            Err(_elapsed) => {
                let message = OrchestratorError::Timeout {
                    job_id,
                    timeout_secs: self.config.job_timeout.as_secs(),
                }
                .to_string();
                self.fail_job(job_id, started, &message)
            }
        }
    }

    fn fail_job(&self, job_id: JobId, started: Instant, message: &str) -> Result<Job> {
        match self.queue.fail(job_id, message) {
            Ok(job) => {
                self.health.record_failure(started.elapsed());
                warn!(job_id = %job_id, error = message, "job failed");
                self.sink.try_emit(
                    ProgressEvent::new(job_id, JobStatus::Failed, job.progress)
                        .with_error(message),
                );
                Ok(job)
            }
            // The job reached a terminal status some other way (e.g. a
            // cancel raced the timeout). Terminal states are immutable;
            // only the concurrency slot needs returning.
            Err(_) => {
                self.queue.release(job_id);
                self.queue
                    .get_job(job_id)
                    .ok_or(OrchestratorError::JobNotFound(job_id))
            }
        }
    }

    async fn run_attempts(&self, job_id: JobId) -> RunOutcome {
        let mut budgets = vec![0u32; self.steps.len()];
        let mut last_failure: Option<StepFailure> = None;

        for attempt in 1..=self.config.max_job_attempts.max(1) {
            if self.is_cancelled(job_id) {
                return RunOutcome::Cancelled;
            }

            if attempt > 1 {
                let delay = self.config.job_backoff.delay_for_attempt(attempt - 1);
                info!(job_id = %job_id, attempt, delay_ms = delay.as_millis() as u64, "retrying job");
                if self
                    .queue
                    .with_job_mut(job_id, Job::reset_progress)
                    .is_err()
                {
                    return RunOutcome::Cancelled;
                }
                self.sink.try_emit(
                    ProgressEvent::new(job_id, JobStatus::Processing, 0)
                        .with_message(format!("attempt {attempt}")),
                );
                tokio::time::sleep(delay).await;
            }

            match self.run_steps(job_id, &mut budgets).await {
                StepsOutcome::Done(ctx) => return RunOutcome::Completed(ctx),
                StepsOutcome::Cancelled => return RunOutcome::Cancelled,
                StepsOutcome::Failed(failure) => {
                    warn!(
                        job_id = %job_id,
                        attempt,
                        step = %failure.step,
                        error = %failure.error,
                        action = %failure.action,
                        "job attempt failed"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        RunOutcome::Failed(last_failure.unwrap_or(StepFailure {
            step: "unknown".to_string(),
            error: StepError::Other("no attempt was made".to_string()),
            action: RecoveryAction::ManualInterventionRequired,
        }))
    }

    async fn run_steps(&self, job_id: JobId, budgets: &mut [u32]) -> StepsOutcome {
        let mut ctx = StepContext::new();

        for (index, step) in self.steps.iter().enumerate() {
            if self.is_cancelled(job_id) {
                return StepsOutcome::Cancelled;
            }

            let (span_start, span_end) = step.progress_span();
            if self
                .queue
                .with_job_mut(job_id, |j| j.advance_progress(span_start))
                .is_err()
            {
                return StepsOutcome::Cancelled;
            }
            self.sink.try_emit(
                ProgressEvent::new(job_id, JobStatus::Processing, span_start)
                    .with_message(step.name().to_string()),
            );

            let mut attempt = 0u32;
            loop {
                if budgets[index] >= self.config.total_step_attempt_budget {
                    return StepsOutcome::Failed(StepFailure {
                        step: step.name().to_string(),
                        error: StepError::BudgetExhausted {
                            step: step.name().to_string(),
                            attempts: budgets[index],
                        },
                        action: RecoveryAction::ManualInterventionRequired,
                    });
                }
                attempt += 1;
                budgets[index] += 1;

                let Some(job) = self.queue.get_job(job_id) else {
                    return StepsOutcome::Failed(StepFailure {
                        step: step.name().to_string(),
                        error: StepError::Other("job disappeared mid-flight".to_string()),
                        action: RecoveryAction::AbortProcessing,
                    });
                };
                if job.status == JobStatus::Cancelled {
                    return StepsOutcome::Cancelled;
                }

                match step.execute(&job, &mut ctx).await {
                    Ok(output) => {
                        debug!(
                            job_id = %job_id,
                            step = step.name(),
                            output = output.kind(),
                            attempt,
                            "step completed"
                        );
                        ctx.put(output);
                        // Re-check before touching progress: a cancel may
                        // have landed while the step was in flight.
                        if self.is_cancelled(job_id) {
                            return StepsOutcome::Cancelled;
                        }
                        if self
                            .queue
                            .with_job_mut(job_id, |j| j.advance_progress(span_end))
                            .is_err()
                        {
                            return StepsOutcome::Cancelled;
                        }
                        self.sink.try_emit(
                            ProgressEvent::new(job_id, JobStatus::Processing, span_end)
                                .with_message(format!("{} done", step.name())),
                        );
                        break;
                    }
                    Err(error) => {
                        warn!(
                            job_id = %job_id,
                            step = step.name(),
                            attempt,
                            error = %error,
                            "step failed"
                        );
                        if let Err(rollback_err) = step.rollback(&job, &mut ctx).await {
                            warn!(
                                job_id = %job_id,
                                step = step.name(),
                                error = %rollback_err,
                                "rollback failed"
                            );
                        }

                        let action = resolve_or_default(self.resolver.as_ref(), &error, attempt);
                        if action == RecoveryAction::RetryWithDifferentParams
                            && step.retryable()
                            && attempt < self.config.max_step_attempts
                        {
                            let delay = self.config.step_backoff.delay_for_attempt(attempt);
                            debug!(
                                job_id = %job_id,
                                step = step.name(),
                                delay_ms = delay.as_millis() as u64,
                                "retrying step"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }

                        return StepsOutcome::Failed(StepFailure {
                            step: step.name().to_string(),
                            error,
                            action,
                        });
                    }
                }
            }
        }

        StepsOutcome::Done(ctx)
    }

    fn is_cancelled(&self, job_id: JobId) -> bool {
        self.queue
            .get_job(job_id)
            .map_or(true, |job| job.status == JobStatus::Cancelled)
    }
}
