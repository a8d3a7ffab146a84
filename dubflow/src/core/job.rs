//! Job model and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle status of a job.
///
/// Transitions follow `Pending -> Processing -> {Completed | Failed | Cancelled}`,
/// with `Cancelled` also reachable directly from `Pending` and a retried job
/// moving from `Failed` back to `Pending`. Terminal statuses admit no further
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admitted to the queue, waiting for dispatch.
    Pending,
    /// Dispatched to the pipeline executor.
    Processing,
    /// All steps completed successfully.
    Completed,
    /// Execution failed after exhausting retries.
    Failed,
    /// Cancelled by the owner before completion.
    Cancelled,
}

impl JobStatus {
    /// Returns true for the three terminal statuses.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the state machine permits moving to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing | Self::Cancelled) => true,
            (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled) => true,
            // Queue-level retry re-queues a failed job.
            (Self::Failed, Self::Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of orchestrated dubbing work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Identity of the submitting user.
    pub owner: String,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Progress percentage, 0-100. Monotonically non-decreasing within a
    /// single execution attempt; reset when an attempt is retried.
    pub progress: u8,
    /// Dispatch priority. Higher values dispatch first.
    pub priority: i32,
    /// Source media language tag.
    pub source_language: String,
    /// Target dubbing language tag.
    pub target_language: String,
    /// References to collaborator-owned input artifacts.
    pub input_refs: Vec<String>,
    /// References to collaborator-owned output artifacts.
    pub output_refs: Vec<String>,
    /// Number of queue-level retries consumed.
    pub retry_count: u32,
    /// Maximum queue-level retries allowed.
    pub max_retries: u32,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Dispatch time of the current attempt, if any.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal status, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error description for failed jobs.
    pub error_message: Option<String>,
}

impl Job {
    /// Creates a new pending job for the given owner and source artifact.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        source_ref: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner: owner.into(),
            status: JobStatus::Pending,
            progress: 0,
            priority: 0,
            source_language: source_language.into(),
            target_language: target_language.into(),
            input_refs: vec![source_ref.into()],
            output_refs: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Sets the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the queue-level retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Appends an additional input reference.
    #[must_use]
    pub fn with_input_ref(mut self, input_ref: impl Into<String>) -> Self {
        self.input_refs.push(input_ref.into());
        self
    }

    /// Returns true if the job is in a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The primary source artifact reference.
    #[must_use]
    pub fn source_ref(&self) -> &str {
        self.input_refs.first().map_or("", String::as_str)
    }

    /// Advances progress, never moving backwards.
    pub fn advance_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.touch();
    }

    /// Resets progress for a fresh attempt.
    pub fn reset_progress(&mut self) {
        self.progress = 0;
        self.touch();
    }

    /// Updates the mutation timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new("alice", "media://clip.mp4", "en", "de");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.priority, 0);
        assert_eq!(job.source_ref(), "media://clip.mp4");
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Pending));

        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = Job::new("alice", "media://clip.mp4", "en", "de");
        job.advance_progress(30);
        assert_eq!(job.progress, 30);

        job.advance_progress(10);
        assert_eq!(job.progress, 30);

        job.advance_progress(75);
        assert_eq!(job.progress, 75);
    }

    #[test]
    fn test_progress_reset_for_retry() {
        let mut job = Job::new("alice", "media://clip.mp4", "en", "de");
        job.advance_progress(60);
        job.reset_progress();
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn test_progress_capped_at_100() {
        let mut job = Job::new("alice", "media://clip.mp4", "en", "de");
        job.advance_progress(250);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let job = Job::new("alice", "media://clip.mp4", "en", "de").with_priority(5);
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.priority, 5);
    }
}
