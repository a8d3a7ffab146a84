//! Quota-aware routing between interchangeable speech backends.
//!
//! Selection honors, in order: quota pressure on the primary backend,
//! the experiment on/off switch, an existing sticky assignment for the
//! session, and finally a weighted random draw. Routing never blocks a
//! job: any internal selection failure falls open to the non-metered
//! backend.

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::errors::{StepError, StepResult};
use crate::services::SpeechBackend;

/// Router tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Whether weighted A/B assignment is active. When disabled the
    /// primary backend is always chosen unless quota forces otherwise.
    pub experiment_enabled: bool,
    /// Percentage of sessions assigned to the primary backend when the
    /// experiment is active, 0-100.
    pub primary_weight_pct: u8,
    /// Remaining-quota floor below which the primary backend is bypassed.
    pub quota_threshold: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            experiment_enabled: false,
            primary_weight_pct: 50,
            quota_threshold: 1000,
        }
    }
}

/// Partial update applied over the live config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfigUpdate {
    /// New experiment switch, if changing.
    pub experiment_enabled: Option<bool>,
    /// New primary weight, if changing.
    pub primary_weight_pct: Option<u8>,
    /// New quota threshold, if changing.
    pub quota_threshold: Option<u64>,
}

/// Cumulative usage counters for one backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BackendUsage {
    /// Units (characters) processed.
    pub units_processed: u64,
    /// Total wall-clock time spent in calls, in milliseconds.
    pub processing_time_ms: u64,
    /// Number of calls made.
    pub call_count: u64,
    /// Number of calls that failed.
    pub error_count: u64,
}

/// A synthesis request routed to a backend.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Text to synthesize.
    pub text: String,
    /// Session the request belongs to; sticky assignments key on this.
    pub session_id: String,
    /// Target language.
    pub language: String,
}

/// Routes synthesis requests across a primary and a secondary backend.
pub struct ServiceRouter {
    primary: Arc<dyn SpeechBackend>,
    secondary: Arc<dyn SpeechBackend>,
    config: RwLock<RouterConfig>,
    assignments: DashMap<String, String>,
    usage: DashMap<String, BackendUsage>,
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRouter")
            .field("primary", &self.primary.name())
            .field("secondary", &self.secondary.name())
            .field("assignments", &self.assignments.len())
            .finish()
    }
}

impl ServiceRouter {
    /// Creates a router over the two backends.
    #[must_use]
    pub fn new(
        primary: Arc<dyn SpeechBackend>,
        secondary: Arc<dyn SpeechBackend>,
        config: RouterConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config: RwLock::new(config),
            assignments: DashMap::new(),
            usage: DashMap::new(),
        }
    }

    /// Chooses a backend for the request and returns its name.
    ///
    /// The decision is persisted as a sticky assignment for the session.
    /// Never fails: a broken quota check routes to the non-metered
    /// backend rather than blocking the job.
    pub async fn select_backend(&self, request: &SynthesisRequest) -> String {
        let config = self.config.read().clone();

        match self.primary.check_quota().await {
            Ok(quota) if quota.remaining < config.quota_threshold => {
                debug!(
                    backend = self.secondary.name(),
                    remaining = quota.remaining,
                    threshold = config.quota_threshold,
                    "primary quota below threshold, forcing secondary"
                );
                let name = self.secondary.name().to_string();
                self.assignments
                    .insert(request.session_id.clone(), name.clone());
                return name;
            }
            Ok(_) => {}
            Err(err) => {
                let fallback = self.fallback_backend();
                warn!(
                    error = %err,
                    backend = fallback.name(),
                    "quota check failed, failing open"
                );
                return fallback.name().to_string();
            }
        }

        if !config.experiment_enabled {
            return self.primary.name().to_string();
        }

        if let Some(assigned) = self.assignments.get(&request.session_id) {
            return assigned.clone();
        }

        let roll: u8 = rand::thread_rng().gen_range(0..100);
        let chosen = if roll < config.primary_weight_pct {
            self.primary.name()
        } else {
            self.secondary.name()
        };
        self.assignments
            .insert(request.session_id.clone(), chosen.to_string());
        debug!(session = %request.session_id, backend = chosen, roll, "sticky assignment created");
        chosen.to_string()
    }

    /// Invokes the named backend and returns the synthesized audio
    /// reference, recording usage on both success and failure.
    pub async fn dispatch(
        &self,
        request: &SynthesisRequest,
        backend_name: &str,
    ) -> StepResult<String> {
        let backend = self.backend_by_name(backend_name)?;
        let units = request.text.chars().count() as u64;
        let started = Instant::now();

        let result = backend.synthesize(&request.text, &request.language).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(audio_ref) => {
                self.track_usage(backend_name, units, elapsed_ms, false);
                Ok(audio_ref)
            }
            Err(err) => {
                self.track_usage(backend_name, units, elapsed_ms, true);
                Err(StepError::retryable(
                    backend_name,
                    format!("synthesis failed: {err}"),
                ))
            }
        }
    }

    /// Accumulates usage counters for a backend. Additive: repeated calls
    /// never overwrite.
    pub fn track_usage(&self, backend_name: &str, units: u64, elapsed_ms: u64, errored: bool) {
        let mut usage = self.usage.entry(backend_name.to_string()).or_default();
        usage.units_processed += units;
        usage.processing_time_ms += elapsed_ms;
        usage.call_count += 1;
        if errored {
            usage.error_count += 1;
        }
    }

    /// Usage counters for one backend.
    #[must_use]
    pub fn usage(&self, backend_name: &str) -> BackendUsage {
        self.usage
            .get(backend_name)
            .map(|u| *u)
            .unwrap_or_default()
    }

    /// Usage counters for all backends that have been called.
    #[must_use]
    pub fn all_usage(&self) -> HashMap<String, BackendUsage> {
        self.usage
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// The sticky assignment for a session, if one exists.
    #[must_use]
    pub fn assignment(&self, session_id: &str) -> Option<String> {
        self.assignments.get(session_id).map(|a| a.clone())
    }

    /// Drops the sticky assignment for a session so the next selection
    /// re-routes. Used when falling back away from a failing backend.
    pub fn clear_assignment(&self, session_id: &str) {
        self.assignments.remove(session_id);
    }

    /// Applies a partial config update without restarting.
    pub fn update_config(&self, update: RouterConfigUpdate) {
        let mut config = self.config.write();
        if let Some(enabled) = update.experiment_enabled {
            config.experiment_enabled = enabled;
        }
        if let Some(weight) = update.primary_weight_pct {
            config.primary_weight_pct = weight.min(100);
        }
        if let Some(threshold) = update.quota_threshold {
            config.quota_threshold = threshold;
        }
    }

    /// Current config snapshot.
    #[must_use]
    pub fn config(&self) -> RouterConfig {
        self.config.read().clone()
    }

    fn backend_by_name(&self, name: &str) -> StepResult<&Arc<dyn SpeechBackend>> {
        if self.primary.name() == name {
            Ok(&self.primary)
        } else if self.secondary.name() == name {
            Ok(&self.secondary)
        } else {
            Err(StepError::Other(format!("unknown backend: {name}")))
        }
    }

    /// Prefers a backend that does not consume a metered quota.
    fn fallback_backend(&self) -> &Arc<dyn SpeechBackend> {
        if !self.secondary.metered() {
            &self.secondary
        } else if !self.primary.metered() {
            &self.primary
        } else {
            &self.secondary
        }
    }
}
