use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::service::{EventService, OutboxError};
use crate::config::OutboxConfig;

/// Ticking loop that drains the outbox to the broker.
pub struct OutboxPublisher {
    events: Arc<EventService>,
    config: OutboxConfig,
}

impl OutboxPublisher {
    pub fn new(events: Arc<EventService>, config: OutboxConfig) -> Self {
        Self { events, config }
    }

    /// Run until `cancel` fires. Failures are retried on the next tick.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            instance = %self.events.instance_id(),
            topic = %self.config.topic,
            interval_ms = self.config.interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Outbox publisher started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        tracing::info!("Outbox publisher stopped");
    }

    async fn tick(&self) {
        match self
            .events
            .publish_pending(self.config.batch_size, self.config.max_retries)
            .await
        {
            Ok(report) if report.claimed > 0 => {
                tracing::debug!(%report, "Published outbox batch");
            }
            Ok(_) => {}
            Err(OutboxError::PartialFailure(report)) => {
                tracing::warn!(%report, "Outbox batch partially failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Outbox publish pass failed");
            }
        }
    }
}
