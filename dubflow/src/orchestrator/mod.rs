//! Orchestrator facade: one instance owning queue, executor, router,
//! breaker, and caches.
//!
//! All state is constructed through [`OrchestratorBuilder`] and owned by
//! the instance, so tests can stand up isolated orchestrators. The
//! scheduler is an explicit [`Orchestrator::tick`] that a timer loop
//! drives in production and tests call synchronously.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::cache::{CacheStats, ResultCache};
use crate::config::OrchestratorConfig;
use crate::core::{Job, JobId, JobStatus, Transcript, Translation};
use crate::errors::{OrchestratorError, Result};
use crate::events::{EventSink, NoOpEventSink, ProgressEvent};
use crate::pipeline::{
    standard_steps, DefaultRecoveryResolver, PipelineExecutor, PipelineStatistics, PipelineStep,
    RecoveryResolver,
};
use crate::queue::{JobQueue, QueueStats};
use crate::router::{BackendUsage, RouterConfigUpdate, ServiceRouter};
use crate::services::{
    JobStore, MediaProcessor, OutputValidator, SpeechBackend, Transcriber, Translator,
};

/// A dubbing job submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Identity of the submitting user.
    pub owner: String,
    /// Reference to the source media artifact.
    pub source_ref: String,
    /// Source media language tag.
    pub source_language: String,
    /// Target dubbing language tag.
    pub target_language: String,
    /// Dispatch priority; higher dispatches first.
    pub priority: i32,
    /// Queue-level retry limit.
    pub max_retries: u32,
}

impl SubmitRequest {
    /// Creates a request with default priority and retries.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        source_ref: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            source_ref: source_ref.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            priority: 0,
            max_retries: 3,
        }
    }

    /// Sets the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Combined health snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    /// Overall verdict.
    pub is_healthy: bool,
    /// Queue occupancy and wait aggregates.
    pub queue: QueueStats,
    /// Executor success/failure aggregates.
    pub pipeline: PipelineStatistics,
}

/// Cache statistics for both memoization caches.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheReport {
    /// Transcript cache statistics.
    pub transcripts: CacheStats,
    /// Translation cache statistics.
    pub translations: CacheStats,
}

/// Builder wiring collaborators into an [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    media: Option<Arc<dyn MediaProcessor>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    translator: Option<Arc<dyn Translator>>,
    validator: Option<Arc<dyn OutputValidator>>,
    primary_backend: Option<Arc<dyn SpeechBackend>>,
    secondary_backend: Option<Arc<dyn SpeechBackend>>,
    store: Option<Arc<dyn JobStore>>,
    sink: Option<Arc<dyn EventSink>>,
    resolver: Option<Arc<dyn RecoveryResolver>>,
    steps: Option<Vec<Arc<dyn PipelineStep>>>,
}

impl OrchestratorBuilder {
    /// Creates a builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the whole configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the media processor collaborator.
    #[must_use]
    pub fn with_media(mut self, media: Arc<dyn MediaProcessor>) -> Self {
        self.media = Some(media);
        self
    }

    /// Sets the transcriber collaborator.
    #[must_use]
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Sets the translator collaborator.
    #[must_use]
    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Sets the output validator collaborator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn OutputValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sets the primary and secondary speech backends.
    #[must_use]
    pub fn with_backends(
        mut self,
        primary: Arc<dyn SpeechBackend>,
        secondary: Arc<dyn SpeechBackend>,
    ) -> Self {
        self.primary_backend = Some(primary);
        self.secondary_backend = Some(secondary);
        self
    }

    /// Sets the durable job store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the progress event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets a custom recovery resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn RecoveryResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the standard step list with a custom pipeline.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<Arc<dyn PipelineStep>>) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Assembles the orchestrator.
    pub fn build(self) -> Result<Arc<Orchestrator>> {
        let queue = Arc::new(JobQueue::new(self.config.queue.clone()));
        let breaker = Arc::new(CircuitBreaker::new(self.config.breaker.clone()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink));
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(DefaultRecoveryResolver));

        let primary = self
            .primary_backend
            .ok_or_else(|| missing("primary speech backend"))?;
        let secondary = self
            .secondary_backend
            .ok_or_else(|| missing("secondary speech backend"))?;
        let router = Arc::new(ServiceRouter::new(
            primary,
            secondary,
            self.config.router.clone(),
        ));

        // Separate subdirectories keep one cache's clear/cleanup from
        // touching the other's persisted files.
        let transcript_cache: Arc<ResultCache<Transcript>> =
            Arc::new(ResultCache::new(scoped_cache_config(&self.config.cache, "transcripts"))?);
        let translation_cache: Arc<ResultCache<Translation>> =
            Arc::new(ResultCache::new(scoped_cache_config(&self.config.cache, "translations"))?);

        let steps = match self.steps {
            Some(steps) => steps,
            None => standard_steps(
                self.media.ok_or_else(|| missing("media processor"))?,
                self.transcriber.ok_or_else(|| missing("transcriber"))?,
                self.translator.ok_or_else(|| missing("translator"))?,
                self.validator.ok_or_else(|| missing("output validator"))?,
                router.clone(),
                breaker.clone(),
                transcript_cache.clone(),
                translation_cache.clone(),
            ),
        };

        let executor = Arc::new(PipelineExecutor::new(
            steps,
            queue.clone(),
            resolver,
            sink.clone(),
            self.config.executor.clone(),
        )?);

        Ok(Arc::new(Orchestrator {
            queue,
            executor,
            router,
            breaker,
            transcript_cache,
            translation_cache,
            store: self.store,
            sink,
            tick_interval: self.config.tick_interval.0,
        }))
    }
}

fn missing(what: &str) -> OrchestratorError {
    OrchestratorError::Validation(format!("orchestrator requires a {what}"))
}

fn scoped_cache_config(base: &crate::cache::CacheConfig, scope: &str) -> crate::cache::CacheConfig {
    crate::cache::CacheConfig {
        persist_dir: base.persist_dir.as_ref().map(|dir| dir.join(scope)),
        ..base.clone()
    }
}

/// The orchestration core facade.
pub struct Orchestrator {
    queue: Arc<JobQueue>,
    executor: Arc<PipelineExecutor>,
    router: Arc<ServiceRouter>,
    breaker: Arc<CircuitBreaker>,
    transcript_cache: Arc<ResultCache<Transcript>>,
    translation_cache: Arc<ResultCache<Translation>>,
    store: Option<Arc<dyn JobStore>>,
    sink: Arc<dyn EventSink>,
    tick_interval: std::time::Duration,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("queue", &self.queue)
            .field("executor", &self.executor)
            .finish()
    }
}

impl Orchestrator {
    /// Starts building an orchestrator.
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Submits a new dubbing job.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job> {
        if request.source_language == request.target_language {
            return Err(OrchestratorError::Validation(
                "source and target language must differ".to_string(),
            ));
        }

        let job = Job::new(
            request.owner,
            request.source_ref,
            request.source_language,
            request.target_language,
        )
        .with_priority(request.priority)
        .with_max_retries(request.max_retries);

        let job = self.queue.submit(job)?;
        self.mirror(|store, job| async move { store.persist(&job).await }, &job)
            .await;
        self.sink
            .try_emit(ProgressEvent::new(job.id, job.status, 0).with_message("queued"));
        Ok(job)
    }

    /// Current snapshot of a job.
    pub fn get_status(&self, job_id: JobId) -> Result<Job> {
        self.queue
            .get_job(job_id)
            .ok_or(OrchestratorError::JobNotFound(job_id))
    }

    /// Cancels a job on behalf of its owner.
    pub async fn cancel(&self, job_id: JobId, caller: &str) -> Result<Job> {
        let job = self.queue.cancel(job_id, caller)?;
        self.mirror(|store, job| async move { store.update(&job).await }, &job)
            .await;
        self.sink.try_emit(
            ProgressEvent::new(job.id, JobStatus::Cancelled, job.progress)
                .with_message("cancelled by owner"),
        );
        Ok(job)
    }

    /// Re-queues a failed job for another run.
    pub async fn retry(&self, job_id: JobId) -> Result<Job> {
        let job = self.queue.requeue_for_retry(job_id)?;
        self.mirror(|store, job| async move { store.update(&job).await }, &job)
            .await;
        self.sink.try_emit(
            ProgressEvent::new(job.id, job.status, 0).with_message("queued for retry"),
        );
        Ok(job)
    }

    /// Deletes a terminal job on behalf of its owner.
    pub async fn delete(&self, job_id: JobId, caller: &str) -> Result<Job> {
        let job = self.get_status(job_id)?;
        if job.owner != caller {
            return Err(OrchestratorError::Unauthorized {
                caller: caller.to_string(),
                job_id,
            });
        }
        let job = self.queue.delete(job_id)?;
        if let Some(store) = &self.store {
            if let Err(err) = store.delete(&job_id).await {
                warn!(job_id = %job_id, error = %err, "failed to delete persisted job record");
            }
        }
        Ok(job)
    }

    /// Jobs owned by `owner`, newest first.
    #[must_use]
    pub fn list_jobs(&self, owner: &str) -> Vec<Job> {
        self.queue.list_by_user(owner)
    }

    /// Jobs in a given status, newest first.
    #[must_use]
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.queue.list_by_status(status)
    }

    /// Queue occupancy and wait aggregates.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Executor success/failure aggregates.
    #[must_use]
    pub fn pipeline_statistics(&self) -> PipelineStatistics {
        self.executor.statistics()
    }

    /// Combined health snapshot.
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        let pipeline = self.executor.statistics();
        HealthStatus {
            is_healthy: pipeline.is_healthy,
            queue: self.queue.stats(),
            pipeline,
        }
    }

    /// Per-backend usage counters.
    #[must_use]
    pub fn router_usage(&self) -> HashMap<String, BackendUsage> {
        self.router.all_usage()
    }

    /// Applies a partial router config update at runtime.
    pub fn update_router_config(&self, update: RouterConfigUpdate) {
        self.router.update_config(update);
    }

    /// Circuit breaker states per service.
    #[must_use]
    pub fn breaker_snapshot(&self) -> HashMap<String, BreakerState> {
        self.breaker.snapshot()
    }

    /// Statistics for both memoization caches.
    #[must_use]
    pub fn cache_report(&self) -> CacheReport {
        CacheReport {
            transcripts: self.transcript_cache.stats(),
            translations: self.translation_cache.stats(),
        }
    }

    /// One scheduler tick: dispatches as many pending jobs as the
    /// concurrency limit allows.
    ///
    /// Returns the join handles of the spawned executions so tests can
    /// await deterministic completion.
    pub fn tick(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        while let Some(job) = self.queue.dequeue_next() {
            debug!(job_id = %job.id, "dispatching job");
            self.sink.try_emit(
                ProgressEvent::new(job.id, JobStatus::Processing, job.progress)
                    .with_message("dispatched"),
            );
            let executor = self.executor.clone();
            let store = self.store.clone();
            let job_id = job.id;
            handles.push(tokio::spawn(async move {
                match executor.execute_job(job_id).await {
                    Ok(job) => {
                        if let Some(store) = store {
                            if let Err(err) = store.update(&job).await {
                                warn!(job_id = %job_id, error = %err, "job store mirror failed");
                            }
                        }
                    }
                    // Job-level failures are reported via status; an Err
                    // here is a bookkeeping problem.
                    Err(err) => {
                        warn!(job_id = %job_id, error = %err, "executor bookkeeping error");
                    }
                }
            }));
        }
        handles
    }

    /// Periodic housekeeping: terminal-job sweep and cache cleanup.
    pub fn maintenance(&self) {
        let removed = self.queue.cleanup_terminal();
        for job_id in removed {
            if let Some(store) = &self.store {
                let store = store.clone();
                tokio::spawn(async move {
                    if let Err(err) = store.delete(&job_id).await {
                        warn!(job_id = %job_id, error = %err, "failed to delete swept job record");
                    }
                });
            }
        }
        self.transcript_cache.cleanup();
        self.translation_cache.cleanup();
    }

    /// Runs the timer-driven scheduler loop until the handle is aborted.
    #[must_use]
    pub fn run(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let tick_interval = self.tick_interval;
        info!(interval_ms = tick_interval.as_millis() as u64, "scheduler loop started");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            loop {
                interval.tick().await;
                self.tick();
                self.maintenance();
            }
        })
    }

    async fn mirror<F, Fut>(&self, op: F, job: &Job)
    where
        F: FnOnce(Arc<dyn JobStore>, Job) -> Fut,
        Fut: std::future::Future<Output = crate::errors::StepResult<()>>,
    {
        if let Some(store) = &self.store {
            if let Err(err) = op(store.clone(), job.clone()).await {
                warn!(job_id = %job.id, error = %err, "job store mirror failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::pipeline::BackoffConfig;
    use crate::pipeline::ExecutorConfig;
    use crate::queue::QueueConfig;
    use crate::testing::mocks::{
        MockMediaProcessor, MockSpeechBackend, MockTranscriber, MockTranslator, MockValidator,
        RecordingJobStore,
    };
    use std::time::Duration;

    fn fast_executor_config() -> ExecutorConfig {
        ExecutorConfig {
            step_backoff: BackoffConfig::new(Duration::from_millis(1), Duration::from_millis(4)),
            job_backoff: BackoffConfig::new(Duration::from_millis(1), Duration::from_millis(4)),
            ..ExecutorConfig::default()
        }
    }

    fn build_orchestrator(
        max_concurrent: usize,
        sink: Arc<CollectingEventSink>,
        store: Option<Arc<RecordingJobStore>>,
    ) -> Arc<Orchestrator> {
        let config = OrchestratorConfig {
            queue: QueueConfig {
                max_concurrent_jobs: max_concurrent,
                ..QueueConfig::default()
            },
            executor: fast_executor_config(),
            ..OrchestratorConfig::default()
        };

        let mut builder = Orchestrator::builder()
            .with_config(config)
            .with_media(Arc::new(MockMediaProcessor::new()))
            .with_transcriber(Arc::new(MockTranscriber::new()))
            .with_translator(Arc::new(MockTranslator::new()))
            .with_validator(Arc::new(MockValidator::passing()))
            .with_backends(
                Arc::new(MockSpeechBackend::named("cloud-tts").with_quota(0, 1_000_000)),
                Arc::new(MockSpeechBackend::named("local-tts").unmetered()),
            )
            .with_sink(sink);
        if let Some(store) = store {
            builder = builder.with_store(store);
        }
        builder.build().unwrap()
    }

    fn request(owner: &str, priority: i32) -> SubmitRequest {
        SubmitRequest::new(owner, "media://clip.mp4", "en", "de").with_priority(priority)
    }

    #[tokio::test]
    async fn test_submit_and_full_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = build_orchestrator(1, sink.clone(), None);

        let job = orchestrator.submit(request("alice", 0)).await.unwrap();
        for handle in orchestrator.tick() {
            handle.await.unwrap();
        }

        let done = orchestrator.get_status(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(!done.output_refs.is_empty());

        // Submission, dispatch, steps, completion all produced events.
        assert!(sink.events_for(job.id).len() > 3);
    }

    #[tokio::test]
    async fn test_submit_rejects_same_language() {
        let orchestrator =
            build_orchestrator(1, Arc::new(CollectingEventSink::new()), None);
        let err = orchestrator
            .submit(SubmitRequest::new("alice", "media://x", "en", "en"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_priority_dispatch_order_with_single_slot() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = build_orchestrator(1, sink.clone(), None);

        let job1 = orchestrator.submit(request("alice", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let job2 = orchestrator.submit(request("alice", 5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let job3 = orchestrator.submit(request("alice", 1)).await.unwrap();

        let mut completion_order = Vec::new();
        for _ in 0..3 {
            let handles = orchestrator.tick();
            assert_eq!(handles.len(), 1, "one slot means one dispatch per tick");
            for handle in handles {
                handle.await.unwrap();
            }
            for job in [&job1, &job2, &job3] {
                let status = orchestrator.get_status(job.id).unwrap().status;
                if status == JobStatus::Completed && !completion_order.contains(&job.id) {
                    completion_order.push(job.id);
                }
            }
        }

        assert_eq!(completion_order, vec![job2.id, job1.id, job3.id]);
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds_each_tick() {
        let sink = Arc::new(CollectingEventSink::new());
        let orchestrator = build_orchestrator(2, sink, None);

        for _ in 0..5 {
            orchestrator.submit(request("alice", 0)).await.unwrap();
        }

        let handles = orchestrator.tick();
        assert_eq!(handles.len(), 2);
        assert!(orchestrator.queue_stats().processing <= 2);

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let orchestrator =
            build_orchestrator(1, Arc::new(CollectingEventSink::new()), None);

        let job = orchestrator.submit(request("alice", 0)).await.unwrap();
        let cancelled = orchestrator.cancel(job.id, "alice").await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        // The cancelled job is never dispatched.
        assert!(orchestrator.tick().is_empty());
    }

    #[tokio::test]
    async fn test_store_mirrors_lifecycle() {
        let store = Arc::new(RecordingJobStore::new());
        let orchestrator = build_orchestrator(
            1,
            Arc::new(CollectingEventSink::new()),
            Some(store.clone()),
        );

        let job = orchestrator.submit(request("alice", 0)).await.unwrap();
        for handle in orchestrator.tick() {
            handle.await.unwrap();
        }

        let ops = store.operations();
        assert_eq!(ops.first().unwrap(), &format!("persist:{}", job.id));
        assert!(ops.iter().any(|op| op == &format!("update:{}", job.id)));
    }

    #[tokio::test]
    async fn test_store_failure_never_blocks_jobs() {
        let store = Arc::new(RecordingJobStore::failing());
        let orchestrator = build_orchestrator(
            1,
            Arc::new(CollectingEventSink::new()),
            Some(store),
        );

        let job = orchestrator.submit(request("alice", 0)).await.unwrap();
        for handle in orchestrator.tick() {
            handle.await.unwrap();
        }

        assert_eq!(
            orchestrator.get_status(job.id).unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_retry_after_delete_and_health_surfaces() {
        let orchestrator =
            build_orchestrator(1, Arc::new(CollectingEventSink::new()), None);

        let job = orchestrator.submit(request("alice", 0)).await.unwrap();
        for handle in orchestrator.tick() {
            handle.await.unwrap();
        }

        let health = orchestrator.health_status();
        assert!(health.is_healthy);
        assert_eq!(health.pipeline.total_jobs_processed, 1);

        // Completed jobs cannot be retried.
        assert!(orchestrator.retry(job.id).await.is_err());

        // But they can be deleted by their owner.
        assert!(orchestrator.delete(job.id, "mallory").await.is_err());
        orchestrator.delete(job.id, "alice").await.unwrap();
        assert!(orchestrator.get_status(job.id).is_err());
    }

    #[tokio::test]
    async fn test_cache_report_after_duplicate_submissions() {
        let orchestrator =
            build_orchestrator(1, Arc::new(CollectingEventSink::new()), None);

        for _ in 0..2 {
            orchestrator.submit(request("alice", 0)).await.unwrap();
            for handle in orchestrator.tick() {
                handle.await.unwrap();
            }
        }

        // The second job's transcription and translation hit the cache.
        let report = orchestrator.cache_report();
        assert!(report.transcripts.hits >= 1);
        assert!(report.translations.hits >= 1);
    }

    #[tokio::test]
    async fn test_router_usage_reported() {
        let orchestrator =
            build_orchestrator(1, Arc::new(CollectingEventSink::new()), None);

        orchestrator.submit(request("alice", 0)).await.unwrap();
        for handle in orchestrator.tick() {
            handle.await.unwrap();
        }

        let usage = orchestrator.router_usage();
        assert!(usage.contains_key("cloud-tts"));
        assert!(usage["cloud-tts"].call_count > 0);
    }
}
