//! # Dubflow
//!
//! Job orchestration core for long-running media dubbing pipelines.
//!
//! Dubflow takes a source asset through transcription, translation,
//! speech synthesis, and reassembly without ever touching media bytes
//! itself: codecs, models, storage, and transports are collaborators
//! behind capability traits. What lives here is the hard part:
//!
//! - **Admission-controlled queue**: bounded, priority + FIFO dispatch
//!   under a concurrency limit
//! - **Pipeline executor**: layered step/job retries with rollback,
//!   recovery-action classification, and a whole-job timeout
//! - **Quota-aware routing**: sticky A/B assignment across
//!   interchangeable synthesis backends
//! - **Result cache**: TTL + LRU memoization with compressed
//!   persistence
//! - **Circuit breaking**: per-service failure counters that skip
//!   failing dependencies without incurring their latency
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dubflow::prelude::*;
//!
//! let orchestrator = Orchestrator::builder()
//!     .with_media(media)
//!     .with_transcriber(transcriber)
//!     .with_translator(translator)
//!     .with_validator(validator)
//!     .with_backends(cloud_tts, local_tts)
//!     .build()?;
//!
//! let job = orchestrator.submit(SubmitRequest::new(
//!     "alice", "media://clip.mp4", "en", "de",
//! )).await?;
//! let scheduler = orchestrator.run();
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod breaker;
pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod services;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
    pub use crate::cache::{cache_key, CacheConfig, CacheStats, ResultCache};
    pub use crate::config::OrchestratorConfig;
    pub use crate::core::{
        AudioSegment, Job, JobId, JobStatus, SpeechSegment, StepContext, StepOutput, Transcript,
        Translation, ValidationReport,
    };
    pub use crate::errors::{OrchestratorError, Result, StepError, StepResult};
    pub use crate::events::{
        ChannelEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
        ProgressEvent,
    };
    pub use crate::orchestrator::{
        HealthStatus, Orchestrator, OrchestratorBuilder, SubmitRequest,
    };
    pub use crate::pipeline::{
        standard_steps, BackoffConfig, DefaultRecoveryResolver, ExecutorConfig, PipelineExecutor,
        PipelineStatistics, PipelineStep, RecoveryAction, RecoveryResolver,
    };
    pub use crate::queue::{JobQueue, QueueConfig, QueueStats};
    pub use crate::router::{
        BackendUsage, RouterConfig, RouterConfigUpdate, ServiceRouter, SynthesisRequest,
    };
    pub use crate::services::{
        JobStore, MediaProcessor, OutputValidator, QuotaStatus, SpeechBackend, Transcriber,
        Translator,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn library_compiles() {
        assert!(true);
    }
}
