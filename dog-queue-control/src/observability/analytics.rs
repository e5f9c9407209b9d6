use std::pin::Pin;
use std::sync::Arc;
use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::debug;

use crate::JobEvent;
use super::metrics::{Counter, LiveMetrics};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Event broadcast plus live counters for every control decision
#[derive(Clone)]
pub struct ObservabilityLayer {
    event_broadcaster: broadcast::Sender<JobEvent>,
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            event_broadcaster,
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    /// Publish `event` and bump its counter under `job_type`
    pub fn record(&self, job_type: &str, event: JobEvent) {
        let counter = match &event {
            JobEvent::Enqueued { .. } => Counter::Enqueued,
            JobEvent::Duplicate { .. } => Counter::Duplicate,
            JobEvent::Admitted { .. } => Counter::Admitted,
            JobEvent::Rejected { .. } => Counter::Rejected,
            JobEvent::RetryScheduled { .. } => Counter::Retried,
            JobEvent::Continued { .. } => Counter::Continued,
            JobEvent::Completed { .. } => Counter::Completed,
            JobEvent::RetriesExhausted { .. } => Counter::Exhausted,
            JobEvent::IterationLimitExceeded { .. } => Counter::IterationLimit,
            JobEvent::Failed { .. } => Counter::Failed,
        };
        self.metrics.increment(counter, job_type);

        debug!(job_type, event = event.event_name(), "Recorded control event");
        // no subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    /// Subscribe to events recorded from now on
    pub fn event_stream(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    /// Same as [`event_stream`](Self::event_stream), as a `Stream`.
    /// Events missed by a lagging subscriber are skipped.
    pub fn boxed_event_stream(&self) -> BoxStream<JobEvent> {
        let stream = BroadcastStream::new(self.event_broadcaster.subscribe())
            .filter_map(|event| event.ok());
        Box::pin(stream)
    }

    pub fn metrics(&self) -> &LiveMetrics {
        &self.metrics
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}
