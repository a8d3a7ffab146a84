//! Capability traits for external collaborators.
//!
//! The orchestration core never touches media bytes or model APIs; it
//! consumes these opaque interfaces. Wire formats, codecs, and auth are
//! the implementors' concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{AudioSegment, Job, JobId, Transcript, Translation, ValidationReport};
use crate::errors::StepResult;

/// Quota consumption snapshot for a metered backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    /// Units consumed in the current quota window.
    pub used: u64,
    /// Total units allowed in the window.
    pub limit: u64,
    /// Units remaining in the window.
    pub remaining: u64,
}

impl QuotaStatus {
    /// Creates a status, deriving `remaining` from `limit - used`.
    #[must_use]
    pub fn new(used: u64, limit: u64) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
        }
    }
}

/// Audio/video manipulation collaborator.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Extracts the audio track from a source asset.
    async fn extract_audio(&self, source: &str) -> StepResult<String>;

    /// Assembles synthesized segments into one continuous audio track.
    async fn assemble_audio(&self, segments: &[AudioSegment]) -> StepResult<String>;

    /// Muxes a dubbed audio track back into the source video.
    async fn combine_video_audio(&self, video: &str, audio_track: &str) -> StepResult<String>;
}

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Service name for breaker attribution and logging.
    fn name(&self) -> &str;

    /// Transcribes an audio artifact in the given language.
    async fn transcribe(&self, audio_ref: &str, language: &str) -> StepResult<Transcript>;
}

/// Translation and subtitle collaborator.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Service name for breaker attribution and logging.
    fn name(&self) -> &str;

    /// Translates a transcript into the target language.
    async fn translate(&self, transcript: &Transcript, target_language: &str)
        -> StepResult<Translation>;

    /// Renders a subtitle artifact from a translation.
    async fn generate_subtitles(&self, translation: &Translation) -> StepResult<String>;
}

/// One interchangeable speech-synthesis backend.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Backend name, used for sticky assignment and usage tracking.
    fn name(&self) -> &str;

    /// Whether this backend consumes a metered external quota.
    ///
    /// The router fails open toward a non-metered backend.
    fn metered(&self) -> bool;

    /// Synthesizes speech for one text span, returning an audio reference.
    async fn synthesize(&self, text: &str, language: &str) -> StepResult<String>;

    /// Reports current quota consumption.
    async fn check_quota(&self) -> StepResult<QuotaStatus>;
}

/// Final-output quality gate.
#[async_trait]
pub trait OutputValidator: Send + Sync {
    /// Validates a produced artifact against the quality threshold.
    async fn validate_output(&self, artifact: &str) -> StepResult<ValidationReport>;
}

/// Durable job record store.
///
/// All calls are best-effort from the orchestrator's point of view:
/// failures are logged and never change a job's in-memory status.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a newly submitted job.
    async fn persist(&self, job: &Job) -> StepResult<()>;

    /// Updates a previously persisted job.
    async fn update(&self, job: &Job) -> StepResult<()>;

    /// Deletes a persisted job record.
    async fn delete(&self, job_id: &JobId) -> StepResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_status_derives_remaining() {
        let quota = QuotaStatus::new(300, 1000);
        assert_eq!(quota.remaining, 700);
    }

    #[test]
    fn test_quota_status_saturates() {
        let quota = QuotaStatus::new(1500, 1000);
        assert_eq!(quota.remaining, 0);
    }
}
