//! Progress event bus (§4.1 "emits progress events"; supplemented broadcast
//! bus grounded on `crawl_events/bus.rs` + `crawl_events/metrics.rs`,
//! collapsed to what the orchestrator actually needs: publish, subscribe,
//! and a published/dropped counter — the teacher's capacity-backpressure
//! notifier and shutdown machinery have no counterpart here since this bus
//! is per-process, not per-crawl-session).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::fetch::ProgressEmitter;
use crate::job::JobStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    Starting,
    TierAttempt { tier: String },
    FetchSucceeded { tier: String },
    Extracting,
    StatusChanged { from: JobStatus, to: JobStatus },
    Completed,
    Failed { reason: String },
    Cancelled,
    Message { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub at: DateTime<Utc>,
    pub action: ActionEvent,
}

/// `broadcast::Sender::send` only fails when there are no live receivers;
/// that case is counted as `dropped` rather than treated as an error, since
/// a job with nobody watching its progress is a normal state.
#[derive(Debug, Default)]
pub struct EventBusMetrics {
    published: AtomicU64,
    dropped: AtomicU64,
}

impl EventBusMetrics {
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (self.published.load(Ordering::Relaxed), self.dropped.load(Ordering::Relaxed))
    }
}

pub struct EventBus {
    sender: broadcast::Sender<ProgressEvent>,
    metrics: Arc<EventBusMetrics>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, metrics: Arc::new(EventBusMetrics::default()) }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<EventBusMetrics> {
        self.metrics.clone()
    }

    pub fn publish(&self, event: ProgressEvent) {
        if self.sender.send(event).is_ok() {
            self.metrics.published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn publish_action(&self, job_id: &str, action: ActionEvent) {
        self.publish(ProgressEvent { job_id: job_id.to_string(), at: Utc::now(), action });
    }

    /// Build a `fetch::ProgressEmitter` closure scoped to one job, so fetch
    /// tiers can publish into this bus through the plain-callback seam they
    /// already take, without depending on `events` directly.
    #[must_use]
    pub fn emitter_for(self: &Arc<Self>, job_id: String) -> ProgressEmitter {
        let bus = self.clone();
        Arc::new(move |text: String| {
            bus.publish_action(&job_id, ActionEvent::Message { text });
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_counts_as_dropped() {
        let bus = EventBus::new(16);
        bus.publish_action("job-1", ActionEvent::Starting);
        let (published, dropped) = bus.metrics().snapshot();
        assert_eq!(published, 0);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn publish_with_subscriber_counts_as_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish_action("job-1", ActionEvent::Completed);
        let event = rx.try_recv().expect("event delivered");
        assert_eq!(event.job_id, "job-1");
        let (published, dropped) = bus.metrics().snapshot();
        assert_eq!(published, 1);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn emitter_for_publishes_message_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("job-2".to_string());
        emitter("trying tier Http".to_string());
        let event = rx.try_recv().expect("event delivered");
        assert_eq!(event.job_id, "job-2");
        matches!(event.action, ActionEvent::Message { .. });
    }
}
