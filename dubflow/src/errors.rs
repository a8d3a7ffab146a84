//! Error types for the dubflow orchestration core.
//!
//! Two error families exist: [`OrchestratorError`] for failures surfaced
//! through the public orchestrator API, and [`StepError`] for collaborator
//! failures raised inside pipeline steps. Step-local failures are retried
//! transparently and only reach callers through a job's `error_message`.

use thiserror::Error;

use crate::core::JobId;

/// Result alias for orchestrator-level operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Result alias for pipeline step execution.
pub type StepResult<T> = std::result::Result<T, StepError>;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A job submission was malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The queue refused admission because it is full.
    #[error("queue capacity exceeded: {size} jobs queued, limit is {max}")]
    CapacityExceeded {
        /// Current number of queued jobs.
        size: usize,
        /// Configured queue size limit.
        max: usize,
    },

    /// The caller does not own the job it tried to mutate.
    #[error("caller '{caller}' is not the owner of job {job_id}")]
    Unauthorized {
        /// The identity that made the call.
        caller: String,
        /// The job that was targeted.
        job_id: JobId,
    },

    /// No job with the given identifier exists.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// A status transition was requested that the job state machine forbids.
    #[error("invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        /// The job that was targeted.
        job_id: JobId,
        /// The current status.
        from: String,
        /// The requested status.
        to: String,
    },

    /// The whole-job execution deadline was exceeded.
    #[error("job {job_id} timed out after {timeout_secs}s")]
    Timeout {
        /// The job that timed out.
        job_id: JobId,
        /// The configured deadline in seconds.
        timeout_secs: u64,
    },

    /// A failure that requires manual intervention.
    #[error("manual intervention required: {0}")]
    Unrecoverable(String),

    /// A generic internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised by a pipeline step when a collaborator call fails.
///
/// Carries the identity of the external service involved so the recovery
/// resolver and the circuit breaker can attribute the failure.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The call was skipped because the service's circuit breaker is open.
    #[error("service '{service}' skipped: circuit breaker open")]
    CircuitOpen {
        /// The service whose breaker is open.
        service: String,
    },

    /// A collaborator call failed.
    #[error("{service}: {message}")]
    Service {
        /// The service that failed.
        service: String,
        /// What went wrong.
        message: String,
        /// Whether the caller may retry the call.
        retryable: bool,
    },

    /// The step's cumulative attempt budget was exhausted.
    #[error("attempt budget exhausted for step '{step}' after {attempts} invocations")]
    BudgetExhausted {
        /// The step that ran out of budget.
        step: String,
        /// Total invocations consumed.
        attempts: u32,
    },

    /// A failure not attributable to a specific service.
    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Creates a retryable service failure.
    #[must_use]
    pub fn retryable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable service failure.
    #[must_use]
    pub fn fatal(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a circuit-open error for the given service.
    #[must_use]
    pub fn circuit_open(service: impl Into<String>) -> Self {
        Self::CircuitOpen {
            service: service.into(),
        }
    }

    /// Returns the service name this error is attributed to, if any.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { service } | Self::Service { service, .. } => Some(service),
            Self::BudgetExhausted { .. } | Self::Other(_) => None,
        }
    }

    /// Returns true if the underlying failure is marked retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_service_attribution() {
        let err = StepError::retryable("whisper", "connection reset");
        assert_eq!(err.service_name(), Some("whisper"));
        assert!(err.is_retryable());

        let err = StepError::fatal("whisper", "unsupported codec");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_circuit_open_display() {
        let err = StepError::circuit_open("polyglot-tts");
        assert!(err.to_string().contains("circuit breaker open"));
        assert_eq!(err.service_name(), Some("polyglot-tts"));
    }

    #[test]
    fn test_other_has_no_service() {
        let err = StepError::Other("boom".to_string());
        assert_eq!(err.service_name(), None);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_capacity_exceeded_display() {
        let err = OrchestratorError::CapacityExceeded { size: 100, max: 100 };
        assert!(err.to_string().contains("100"));
    }
}
