use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::outbox::EventEnvelope;
use crate::queue::{Consumer, Message};

pub const METRICS_GROUP: &str = "metrics";

/// Event ids remembered for duplicate detection.
const DEDUP_WINDOW: usize = 10_000;

/// Point-in-time view of the event counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub duplicates: u64,
    pub undecodable: u64,
    pub by_name: BTreeMap<String, u64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    snapshot: MetricsSnapshot,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

/// Per-event-name counters, tolerant of at-least-once redelivery.
#[derive(Default)]
pub struct EventMetrics {
    inner: Mutex<Counters>,
}

impl EventMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `envelope` unless its id was seen recently. Returns whether it counted.
    pub fn record(&self, envelope: &EventEnvelope) -> bool {
        let mut counters = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if counters.seen.contains(&envelope.id) {
            counters.snapshot.duplicates += 1;
            return false;
        }
        counters.seen.insert(envelope.id.clone());
        counters.order.push_back(envelope.id.clone());
        if counters.order.len() > DEDUP_WINDOW {
            if let Some(oldest) = counters.order.pop_front() {
                counters.seen.remove(&oldest);
            }
        }

        let snapshot = &mut counters.snapshot;
        snapshot.processed += 1;
        *snapshot.by_name.entry(envelope.name.clone()).or_insert(0) += 1;
        snapshot.last_event_at = Some(envelope.created_at);
        true
    }

    pub fn record_undecodable(&self) {
        let mut counters = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        counters.snapshot.undecodable += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot
            .clone()
    }
}

/// Consumes every event on the topic in its own group and keeps counters.
pub struct MetricsWorker {
    consumer: Arc<dyn Consumer>,
    metrics: Arc<EventMetrics>,
    topic: String,
    consume_timeout: Duration,
    report_interval: Duration,
    backoff: Duration,
}

impl MetricsWorker {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        metrics: Arc<EventMetrics>,
        topic: &str,
        consume_timeout: Duration,
        report_interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            consumer,
            metrics,
            topic: topic.to_string(),
            consume_timeout,
            report_interval,
            backoff,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(topic = %self.topic, group = METRICS_GROUP, "Metrics worker started");

        let mut report = tokio::time::interval(self.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        report.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = report.tick() => self.report(),
                next = self.consumer.consume(&self.topic, self.consume_timeout) => match next {
                    Ok(Some(message)) => self.handle(&message).await,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read from broker");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.backoff) => {}
                        }
                    }
                },
            }
        }

        self.report();
        tracing::info!("Metrics worker stopped");
    }

    pub async fn handle(&self, message: &Message) {
        match EventEnvelope::decode(&message.value) {
            Ok(envelope) => {
                if !self.metrics.record(&envelope) {
                    tracing::debug!(event_id = %envelope.id, "Duplicate event ignored");
                }
            }
            Err(e) => {
                tracing::warn!(offset = message.offset, error = %e, "Undecodable event");
                self.metrics.record_undecodable();
            }
        }

        if let Err(e) = self.consumer.commit(message).await {
            tracing::warn!(offset = message.offset, error = %e, "Failed to commit message");
        }
    }

    fn report(&self) {
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            processed = snapshot.processed,
            duplicates = snapshot.duplicates,
            undecodable = snapshot.undecodable,
            by_name = ?snapshot.by_name,
            "Event metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::EventPayload;

    fn envelope(id: &str) -> EventEnvelope {
        EventEnvelope {
            id: id.to_string(),
            name: "FileRenamed".to_string(),
            created_at: Utc::now(),
            payload: EventPayload::FileRenamed {
                file_id: "f".to_string(),
                owner_id: "o".to_string(),
                old_name: "a".to_string(),
                new_name: "b".to_string(),
            },
        }
    }

    #[test]
    fn redelivered_events_count_once() {
        let metrics = EventMetrics::new();
        assert!(metrics.record(&envelope("e1")));
        assert!(!metrics.record(&envelope("e1")));
        assert!(metrics.record(&envelope("e2")));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.by_name.get("FileRenamed"), Some(&2));
    }

    #[test]
    fn dedup_window_is_bounded() {
        let metrics = EventMetrics::new();
        for i in 0..=DEDUP_WINDOW {
            metrics.record(&envelope(&format!("e{i}")));
        }
        // e0 fell out of the window and counts again
        assert!(metrics.record(&envelope("e0")));
        assert_eq!(metrics.snapshot().processed, DEDUP_WINDOW as u64 + 2);
    }
}
