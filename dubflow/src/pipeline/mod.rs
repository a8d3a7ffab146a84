//! Pipeline execution: steps, retry layers, recovery, and health.

pub mod backoff;
pub mod executor;
pub mod health;
pub mod recovery;
pub mod step;
pub mod steps;


pub use backoff::BackoffConfig;
pub use executor::{ExecutorConfig, PipelineExecutor};
pub use health::{HealthMonitor, PipelineStatistics};
pub use recovery::{DefaultRecoveryResolver, RecoveryAction, RecoveryResolver};
pub use step::{validate_steps, PipelineStep};
pub use steps::{
    standard_steps, AssembleStep, ExtractAudioStep, FinalizeStep, SubtitleStep, SynthesizeStep,
    TranscribeStep, TranslateStep,
};
