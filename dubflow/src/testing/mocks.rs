//! Scripted mock collaborators for tests.
//!
//! Mocks complete instantly and deterministically. Failure behavior is
//! scripted per instance: `fail_times(n)` fails the first `n` calls,
//! `failing()` fails every call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{
    AudioSegment, Job, JobId, SpeechSegment, Transcript, Translation, ValidationReport,
};
use crate::errors::{StepError, StepResult};
use crate::services::{
    JobStore, MediaProcessor, OutputValidator, QuotaStatus, SpeechBackend, Transcriber,
    Translator,
};

/// Instant media processor producing deterministic artifact references.
#[derive(Debug, Default)]
pub struct MockMediaProcessor {
    calls: AtomicU64,
}

impl MockMediaProcessor {
    /// Creates the mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total calls across all operations.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProcessor for MockMediaProcessor {
    async fn extract_audio(&self, source: &str) -> StepResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("audio://{source}"))
    }

    async fn assemble_audio(&self, segments: &[AudioSegment]) -> StepResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("track://{}-segments", segments.len()))
    }

    async fn combine_video_audio(&self, video: &str, audio_track: &str) -> StepResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("video://{video}+{audio_track}"))
    }
}

/// Transcriber that fails a scripted number of times before succeeding.
#[derive(Debug)]
pub struct MockTranscriber {
    name: String,
    calls: AtomicU64,
    fail_first: u64,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranscriber {
    /// A transcriber that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "mock-stt".to_string(),
            calls: AtomicU64::new(0),
            fail_first: 0,
        }
    }

    /// Fails the first `n` calls with a retryable error.
    #[must_use]
    pub fn fail_times(n: u64) -> Self {
        Self {
            fail_first: n,
            ..Self::new()
        }
    }

    /// Number of transcribe calls made.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, _audio_ref: &str, language: &str) -> StepResult<Transcript> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(StepError::retryable(&self.name, "transcription flaked"));
        }
        Ok(Transcript::new(
            language,
            vec![
                SpeechSegment::new(0, 1500, "Hello there."),
                SpeechSegment::new(1500, 3000, "Welcome back."),
            ],
        ))
    }
}

/// Translator that echoes segments with a language prefix.
#[derive(Debug)]
pub struct MockTranslator {
    name: String,
    calls: AtomicU64,
    fail_first: u64,
}

impl Default for MockTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTranslator {
    /// A translator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: "mock-mt".to_string(),
            calls: AtomicU64::new(0),
            fail_first: 0,
        }
    }

    /// Fails the first `n` translate calls with a retryable error.
    #[must_use]
    pub fn fail_times(n: u64) -> Self {
        Self {
            fail_first: n,
            ..Self::new()
        }
    }

    /// Number of translate calls made.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(
        &self,
        transcript: &Transcript,
        target_language: &str,
    ) -> StepResult<Translation> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(StepError::retryable(&self.name, "translation flaked"));
        }
        let segments = transcript
            .segments
            .iter()
            .map(|s| {
                SpeechSegment::new(s.start_ms, s.end_ms, format!("[{target_language}] {}", s.text))
            })
            .collect();
        Ok(Translation::new(target_language, segments))
    }

    async fn generate_subtitles(&self, translation: &Translation) -> StepResult<String> {
        Ok(format!("subs://{}-{}", translation.language, translation.segments.len()))
    }
}

/// Speech backend with a scripted quota and failure behavior.
#[derive(Debug)]
pub struct MockSpeechBackend {
    name: String,
    metered: bool,
    quota: Mutex<Option<QuotaStatus>>,
    fail_synthesis: bool,
    calls: AtomicU64,
}

impl MockSpeechBackend {
    /// A metered backend with a wide-open quota.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metered: true,
            quota: Mutex::new(Some(QuotaStatus::new(0, u64::MAX))),
            fail_synthesis: false,
            calls: AtomicU64::new(0),
        }
    }

    /// Sets the scripted quota.
    #[must_use]
    pub fn with_quota(self, used: u64, limit: u64) -> Self {
        *self.quota.lock() = Some(QuotaStatus::new(used, limit));
        self
    }

    /// Makes `check_quota` fail.
    #[must_use]
    pub fn with_failing_quota(self) -> Self {
        *self.quota.lock() = None;
        self
    }

    /// Marks the backend non-metered (local).
    #[must_use]
    pub fn unmetered(mut self) -> Self {
        self.metered = false;
        self
    }

    /// Makes every synthesis call fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_synthesis = true;
        self
    }

    /// Number of synthesis calls made.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechBackend for MockSpeechBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn metered(&self) -> bool {
        self.metered
    }

    async fn synthesize(&self, text: &str, language: &str) -> StepResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_synthesis {
            return Err(StepError::retryable(&self.name, "synthesis unavailable"));
        }
        Ok(format!("audio://{}/{language}/{}", self.name, text.len()))
    }

    async fn check_quota(&self) -> StepResult<QuotaStatus> {
        let quota = *self.quota.lock();
        quota.ok_or_else(|| StepError::retryable(&self.name, "quota endpoint unavailable"))
    }
}

/// Validator with a fixed verdict.
#[derive(Debug)]
pub struct MockValidator {
    report: ValidationReport,
}

impl MockValidator {
    /// A validator that passes everything.
    #[must_use]
    pub fn passing() -> Self {
        Self {
            report: ValidationReport {
                passes_threshold: true,
                issues: Vec::new(),
            },
        }
    }

    /// A validator that rejects everything with the given issue.
    #[must_use]
    pub fn failing(issue: impl Into<String>) -> Self {
        Self {
            report: ValidationReport {
                passes_threshold: false,
                issues: vec![issue.into()],
            },
        }
    }
}

#[async_trait]
impl OutputValidator for MockValidator {
    async fn validate_output(&self, _artifact: &str) -> StepResult<ValidationReport> {
        Ok(self.report.clone())
    }
}

/// Job store that records every call for assertions.
#[derive(Debug, Default)]
pub struct RecordingJobStore {
    operations: Mutex<Vec<String>>,
    fail_all: bool,
}

impl RecordingJobStore {
    /// A store that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            fail_all: true,
        }
    }

    /// The recorded operations, e.g. `persist:<id>`.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    fn record(&self, op: &str, job_id: JobId) -> StepResult<()> {
        self.operations.lock().push(format!("{op}:{job_id}"));
        if self.fail_all {
            return Err(StepError::retryable("job-store", "storage unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for RecordingJobStore {
    async fn persist(&self, job: &Job) -> StepResult<()> {
        self.record("persist", job.id)
    }

    async fn update(&self, job: &Job) -> StepResult<()> {
        self.record("update", job.id)
    }

    async fn delete(&self, job_id: &JobId) -> StepResult<()> {
        self.record("delete", *job_id)
    }
}

/// A pipeline step for executor tests with scripted failures.
#[derive(Debug)]
pub struct ScriptedStep {
    name: String,
    span: (u8, u8),
    retryable: bool,
    fail_first: u64,
    fatal: bool,
    executions: AtomicU64,
    rollbacks: AtomicU64,
}

impl ScriptedStep {
    /// A step that always succeeds.
    #[must_use]
    pub fn succeeding(name: impl Into<String>, span: (u8, u8)) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            span,
            retryable: true,
            fail_first: 0,
            fatal: false,
            executions: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        })
    }

    /// A retryable step failing the first `n` executions.
    #[must_use]
    pub fn flaky(name: impl Into<String>, span: (u8, u8), n: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            span,
            retryable: true,
            fail_first: n,
            fatal: false,
            executions: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        })
    }

    /// A step that always fails with a non-retryable error.
    #[must_use]
    pub fn broken(name: impl Into<String>, span: (u8, u8)) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            span,
            retryable: true,
            fail_first: u64::MAX,
            fatal: true,
            executions: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        })
    }

    /// A retryable step that always fails with a retryable error.
    #[must_use]
    pub fn always_flaky(name: impl Into<String>, span: (u8, u8)) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            span,
            retryable: true,
            fail_first: u64::MAX,
            fatal: false,
            executions: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        })
    }

    /// Number of executions so far.
    #[must_use]
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Number of rollbacks so far.
    #[must_use]
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::pipeline::PipelineStep for ScriptedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn progress_span(&self) -> (u8, u8) {
        self.span
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    async fn execute(
        &self,
        _job: &Job,
        _ctx: &mut crate::core::StepContext,
    ) -> StepResult<crate::core::StepOutput> {
        let call = self.executions.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            if self.fatal {
                return Err(StepError::fatal(&self.name, "hard failure"));
            }
            return Err(StepError::retryable(&self.name, "scripted flake"));
        }
        Ok(crate::core::StepOutput::AudioRef {
            audio_ref: format!("audio://{}", self.name),
        })
    }

    async fn rollback(
        &self,
        _job: &Job,
        _ctx: &mut crate::core::StepContext,
    ) -> StepResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
