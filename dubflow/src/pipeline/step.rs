//! Pipeline step trait and step-list validation.
//!
//! Steps are configuration, not per-job state: one step list is shared
//! by every job the executor runs. Each step owns a contiguous progress
//! span, so a job's progress percentage always identifies the active
//! step.

use async_trait::async_trait;

use crate::core::{Job, StepContext, StepOutput};
use crate::errors::{OrchestratorError, Result, StepResult};

/// One named stage of the dubbing pipeline.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Step name, used in events, logs, and error messages.
    fn name(&self) -> &str;

    /// `(progress_start, progress_end)` for this step, each 0-100.
    fn progress_span(&self) -> (u8, u8);

    /// Whether the executor may retry this step after a failure.
    fn retryable(&self) -> bool {
        true
    }

    /// Executes the step against the job, reading inputs from and
    /// writing its output into the typed context.
    async fn execute(&self, job: &Job, ctx: &mut StepContext) -> StepResult<StepOutput>;

    /// Undoes partial effects after a failed `execute`.
    ///
    /// Rollback failures are logged by the executor and never fatal.
    async fn rollback(&self, _job: &Job, _ctx: &mut StepContext) -> StepResult<()> {
        Ok(())
    }
}

/// Validates that a step list forms a complete, contiguous progress
/// ladder from 0 to 100.
pub fn validate_steps(steps: &[std::sync::Arc<dyn PipelineStep>]) -> Result<()> {
    if steps.is_empty() {
        return Err(OrchestratorError::Validation(
            "pipeline must declare at least one step".to_string(),
        ));
    }

    let mut expected_start = 0u8;
    for step in steps {
        let (start, end) = step.progress_span();
        if end <= start {
            return Err(OrchestratorError::Validation(format!(
                "step '{}' has an empty progress span ({start}..{end})",
                step.name()
            )));
        }
        if start != expected_start {
            return Err(OrchestratorError::Validation(format!(
                "step '{}' starts at {start}, expected {expected_start}",
                step.name()
            )));
        }
        expected_start = end;
    }

    if expected_start != 100 {
        return Err(OrchestratorError::Validation(format!(
            "pipeline ends at progress {expected_start}, expected 100"
        )));
    }
    Ok(())
}
