//! Recovery-action classification for step failures.
//!
//! After a step fails and its rollback has run, the executor asks a
//! [`RecoveryResolver`] what to do next. Only
//! [`RecoveryAction::RetryWithDifferentParams`] keeps the step loop
//! alive; every other action terminates it and propagates the error to
//! the job-level attempt loop.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::StepError;

/// Classified response to a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Retry the step, possibly with adjusted parameters.
    RetryWithDifferentParams,
    /// Stop the step and route future calls to an alternative service.
    FallbackToAlternativeService,
    /// Stop; a human has to look at this.
    ManualInterventionRequired,
    /// Stop; the job cannot meaningfully continue.
    AbortProcessing,
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RetryWithDifferentParams => "retry_with_different_params",
            Self::FallbackToAlternativeService => "fallback_to_alternative_service",
            Self::ManualInterventionRequired => "manual_intervention_required",
            Self::AbortProcessing => "abort_processing",
        };
        f.write_str(s)
    }
}

/// Pluggable classifier mapping a step failure to a recovery action.
pub trait RecoveryResolver: Send + Sync {
    /// Classifies the error. `attempt` is the 1-indexed invocation count
    /// of the failing step within the current job attempt.
    fn classify(&self, error: &StepError, attempt: u32) -> RecoveryAction;
}

/// Resolves an action, defaulting conservatively when the resolver
/// itself panics.
#[must_use]
pub fn resolve_or_default(
    resolver: &dyn RecoveryResolver,
    error: &StepError,
    attempt: u32,
) -> RecoveryAction {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        resolver.classify(error, attempt)
    }))
    .unwrap_or_else(|_| {
        warn!(error = %error, "recovery resolver panicked, defaulting to manual intervention");
        RecoveryAction::ManualInterventionRequired
    })
}

/// Keyword-based default classifier.
///
/// Circuit-open failures route to the alternative service; transient
/// transport and quota failures retry; malformed-input failures abort;
/// anything unclassified goes to manual intervention.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRecoveryResolver;

impl RecoveryResolver for DefaultRecoveryResolver {
    fn classify(&self, error: &StepError, _attempt: u32) -> RecoveryAction {
        match error {
            StepError::CircuitOpen { .. } => RecoveryAction::FallbackToAlternativeService,
            StepError::BudgetExhausted { .. } => RecoveryAction::ManualInterventionRequired,
            StepError::Service {
                message, retryable, ..
            } => {
                let lower = message.to_lowercase();
                if lower.contains("quota")
                    || lower.contains("rate limit")
                    || lower.contains("timeout")
                    || lower.contains("unavailable")
                    || lower.contains("connection")
                    || *retryable
                {
                    RecoveryAction::RetryWithDifferentParams
                } else if lower.contains("unsupported")
                    || lower.contains("invalid")
                    || lower.contains("corrupt")
                {
                    RecoveryAction::AbortProcessing
                } else {
                    RecoveryAction::ManualInterventionRequired
                }
            }
            StepError::Other(_) => RecoveryAction::ManualInterventionRequired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_falls_back() {
        let resolver = DefaultRecoveryResolver;
        let action = resolver.classify(&StepError::circuit_open("tts"), 1);
        assert_eq!(action, RecoveryAction::FallbackToAlternativeService);
    }

    #[test]
    fn test_transient_retries() {
        let resolver = DefaultRecoveryResolver;
        for message in ["connection reset", "rate limit hit", "gateway timeout"] {
            let action = resolver.classify(&StepError::fatal("svc", message), 1);
            assert_eq!(action, RecoveryAction::RetryWithDifferentParams, "{message}");
        }
    }

    #[test]
    fn test_retryable_flag_retries() {
        let resolver = DefaultRecoveryResolver;
        let action = resolver.classify(&StepError::retryable("svc", "flaked"), 1);
        assert_eq!(action, RecoveryAction::RetryWithDifferentParams);
    }

    #[test]
    fn test_malformed_input_aborts() {
        let resolver = DefaultRecoveryResolver;
        let action = resolver.classify(&StepError::fatal("svc", "unsupported codec"), 1);
        assert_eq!(action, RecoveryAction::AbortProcessing);
    }

    #[test]
    fn test_unclassified_goes_manual() {
        let resolver = DefaultRecoveryResolver;
        let action = resolver.classify(&StepError::fatal("svc", "who knows"), 1);
        assert_eq!(action, RecoveryAction::ManualInterventionRequired);
    }

    #[test]
    fn test_panicking_resolver_defaults_to_manual() {
        struct Panicker;
        impl RecoveryResolver for Panicker {
            fn classify(&self, _error: &StepError, _attempt: u32) -> RecoveryAction {
                panic!("resolver bug")
            }
        }

        let action = resolve_or_default(&Panicker, &StepError::Other("x".to_string()), 1);
        assert_eq!(action, RecoveryAction::ManualInterventionRequired);
    }
}
