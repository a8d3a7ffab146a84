//! Core data model: jobs, statuses, and typed step artifacts.

mod artifact;
mod job;

pub use artifact::{
    AudioSegment, SpeechSegment, StepContext, StepOutput, Transcript, Translation,
    ValidationReport,
};
pub use job::{Job, JobId, JobStatus};
