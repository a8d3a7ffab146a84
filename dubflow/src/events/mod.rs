//! Progress event surface.
//!
//! The orchestrator pushes [`ProgressEvent`]s through an [`EventSink`];
//! a transport layer (WebSocket, HTTP polling) subscribes on the other
//! side. Delivery is fire-and-forget: a slow or broken sink never blocks
//! or fails job progress.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{JobId, JobStatus};

/// A progress notification for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The job the event is about.
    pub job_id: JobId,
    /// Job status at emission time.
    pub status: JobStatus,
    /// Progress percentage at emission time.
    pub progress: u8,
    /// Human-readable detail, e.g. the active step name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error description for failure events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Creates an event for the given job state.
    #[must_use]
    pub fn new(job_id: JobId, status: JobStatus, progress: u8) -> Self {
        Self {
            job_id,
            status,
            progress,
            message: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches an error description.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Trait for sinks that receive progress events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: ProgressEvent);

    /// Emits an event without blocking.
    ///
    /// Must never fail or panic; events that cannot be delivered are
    /// dropped.
    fn try_emit(&self, event: ProgressEvent);
}

/// A no-op sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: ProgressEvent) {
        // Intentionally empty - discards all events
    }

    fn try_emit(&self, _event: ProgressEvent) {
        // Intentionally empty - discards all events
    }
}

/// A sink that logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    fn log_event(event: &ProgressEvent) {
        info!(
            job_id = %event.job_id,
            status = %event.status,
            progress = event.progress,
            message = event.message.as_deref(),
            error = event.error.as_deref(),
            "job progress"
        );
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: ProgressEvent) {
        Self::log_event(&event);
    }

    fn try_emit(&self, event: ProgressEvent) {
        Self::log_event(&event);
    }
}

/// A sink that forwards events into a bounded tokio channel.
///
/// The transport layer drains the receiving half. When the channel is
/// full the event is dropped, preserving at-most-best-effort delivery.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: tokio::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelEventSink {
    /// Creates a sink and its receiving half with the given buffer size.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, tokio::sync::mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: ProgressEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "progress event dropped");
        }
    }

    fn try_emit(&self, event: ProgressEvent) {
        if let Err(err) = self.tx.try_send(event) {
            debug!(error = %err, "progress event dropped");
        }
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<ProgressEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Events for a single job, in emission order.
    #[must_use]
    pub fn events_for(&self, job_id: JobId) -> Vec<ProgressEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: ProgressEvent) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: ProgressEvent) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(ProgressEvent::new(JobId::new(), JobStatus::Pending, 0))
            .await;
        sink.try_emit(ProgressEvent::new(JobId::new(), JobStatus::Pending, 0));
        // Should not panic
    }

    #[tokio::test]
    async fn test_collecting_sink_per_job() {
        let sink = CollectingEventSink::new();
        let job_a = JobId::new();
        let job_b = JobId::new();

        sink.emit(ProgressEvent::new(job_a, JobStatus::Pending, 0)).await;
        sink.emit(ProgressEvent::new(job_b, JobStatus::Pending, 0)).await;
        sink.try_emit(ProgressEvent::new(job_a, JobStatus::Processing, 10));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_for(job_a).len(), 2);
        assert_eq!(sink.events_for(job_b).len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelEventSink::new(8);
        let job_id = JobId::new();

        sink.emit(ProgressEvent::new(job_id, JobStatus::Processing, 50).with_message("synthesize"))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.progress, 50);
        assert_eq!(event.message.as_deref(), Some("synthesize"));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelEventSink::new(1);
        let job_id = JobId::new();

        sink.try_emit(ProgressEvent::new(job_id, JobStatus::Pending, 0));
        // Buffer is full; this one is dropped rather than blocking.
        sink.try_emit(ProgressEvent::new(job_id, JobStatus::Processing, 10));

        assert_eq!(rx.recv().await.unwrap().progress, 0);
        assert!(rx.try_recv().is_err());
    }
}
