use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::events::{EventEnvelope, EventPayload};
use crate::queue::Producer;
use crate::storage::events::{self, EventCounts};
use crate::storage::models::EventRecord;
use crate::storage::{DatabaseError, Transaction, UnitOfWork};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Event not found: {0}")]
    NotFound(String),
    #[error("Event {0} is not parked")]
    NotParked(String),
    #[error("{} of {} events failed to publish", .0.failed, .0.claimed)]
    PartialFailure(PublishReport),
}

/// Outcome of one `publish_pending` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Events this instance locked
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Events moved out of rotation because they ran out of retries
    pub parked: usize,
    /// Events another instance held, or that finished while we looked
    pub skipped: usize,
}

impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "claimed={} sent={} failed={} parked={} skipped={}",
            self.claimed, self.sent, self.failed, self.parked, self.skipped
        )
    }
}

/// Records facts inside business transactions and drains them to the broker.
pub struct EventService {
    uow: UnitOfWork,
    producer: Arc<dyn Producer>,
    instance_id: String,
    topic: String,
    lock_timeout: chrono::Duration,
}

impl EventService {
    pub fn new(
        uow: UnitOfWork,
        producer: Arc<dyn Producer>,
        instance_id: &str,
        topic: &str,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            uow,
            producer,
            instance_id: instance_id.to_string(),
            topic: topic.to_string(),
            lock_timeout: chrono::Duration::from_std(lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Append a fact to the outbox as part of `tx`.
    ///
    /// The row becomes visible to publishers only when `tx` commits, and
    /// disappears with it on rollback. It is stored locked to this instance
    /// (`locked_at == created_at`), so other instances leave it alone until
    /// the lock times out while this instance's publisher may claim it at
    /// once. The returned record is unlocked.
    pub fn create(
        &self,
        tx: &Transaction,
        payload: &EventPayload,
    ) -> Result<EventRecord, OutboxError> {
        let created_at = Utc::now();
        let mut event = EventRecord {
            id: Uuid::now_v7().to_string(),
            name: payload.name().to_string(),
            payload: serde_json::to_vec(payload)?,
            created_at,
            sent: false,
            sent_at: None,
            locked_at: Some(created_at),
            locked_by: Some(self.instance_id.clone()),
            retry_count: 0,
            last_error: None,
            parked_at: None,
        };

        events::insert(tx, &event)?;
        event.locked_at = None;
        event.locked_by = None;

        tracing::debug!(event_id = %event.id, name = %event.name, "Recorded event");
        Ok(event)
    }

    /// Claim up to `batch_size` pending events, oldest first, and push each to
    /// the broker.
    ///
    /// One event failing never stops the rest of the batch; the pass returns
    /// [`OutboxError::PartialFailure`] afterwards if anything failed.
    pub async fn publish_pending(
        &self,
        batch_size: usize,
        max_retries: u32,
    ) -> Result<PublishReport, OutboxError> {
        let candidates = events::pending(&self.uow.db().read()?, batch_size)?;
        let mut report = PublishReport::default();

        for candidate in candidates {
            let event = match self.claim(&candidate.id) {
                Ok(Some(event)) => event,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(event_id = %candidate.id, error = %e, "Failed to claim event");
                    report.failed += 1;
                    continue;
                }
            };
            report.claimed += 1;

            match self.produce(&event).await {
                Ok(()) => match self.mark_sent(&event.id) {
                    Ok(true) => report.sent += 1,
                    Ok(false) => report.skipped += 1,
                    Err(e) => {
                        // Delivered but not recorded: the lock expires and the
                        // event goes out again, which consumers tolerate.
                        tracing::error!(
                            event_id = %event.id,
                            name = %event.name,
                            error = %e,
                            "Published event but failed to mark it sent"
                        );
                        report.failed += 1;
                    }
                },
                Err(reason) => {
                    tracing::warn!(
                        event_id = %event.id,
                        name = %event.name,
                        retry_count = event.retry_count + 1,
                        error = %reason,
                        "Failed to publish event"
                    );
                    report.failed += 1;
                    match self.mark_failed(&event.id, &reason, max_retries) {
                        Ok(true) => report.parked += 1,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!(
                                event_id = %event.id,
                                error = %e,
                                "Failed to record publish failure"
                            );
                        }
                    }
                }
            }
        }

        if report.failed > 0 {
            return Err(OutboxError::PartialFailure(report));
        }
        Ok(report)
    }

    /// Lock an event for this instance iff it is unsent, unparked and not
    /// held by a live lock. The creation lock of this instance's own events
    /// does not count. Check and lock happen in one write transaction.
    fn claim(&self, id: &str) -> Result<Option<EventRecord>, OutboxError> {
        let now = Utc::now();
        self.uow.run(|tx| {
            let Some(mut event) = events::get(tx, id)? else {
                return Ok(None);
            };
            let own_creation_lock = event.is_creation_lock()
                && event.locked_by.as_deref() == Some(self.instance_id.as_str());
            if event.sent
                || event.parked_at.is_some()
                || (event.is_locked(now, self.lock_timeout) && !own_creation_lock)
            {
                return Ok(None);
            }

            if let (Some(previous), false) = (&event.locked_by, own_creation_lock) {
                tracing::info!(
                    event_id = %event.id,
                    previous_owner = %previous,
                    "Reclaiming event with expired lock"
                );
            }

            event.locked_at = Some(now);
            event.locked_by = Some(self.instance_id.clone());
            events::update(tx, &event)?;
            Ok(Some(event))
        })
    }

    async fn produce(&self, event: &EventRecord) -> Result<(), String> {
        let payload: EventPayload =
            serde_json::from_slice(&event.payload).map_err(|e| format!("corrupt payload: {e}"))?;
        let envelope = EventEnvelope {
            id: event.id.clone(),
            name: event.name.clone(),
            created_at: event.created_at,
            payload,
        };
        let value = envelope.encode().map_err(|e| e.to_string())?;

        self.producer
            .produce(&self.topic, &event.id, &value)
            .await
            .map_err(|e| e.to_string())
    }

    /// Returns false when the event was already sent by someone else.
    fn mark_sent(&self, id: &str) -> Result<bool, OutboxError> {
        self.uow.run(|tx| {
            let mut event = events::get(tx, id)?.ok_or_else(|| OutboxError::NotFound(id.into()))?;
            if event.sent {
                return Ok(false);
            }
            event.sent = true;
            event.sent_at = Some(Utc::now());
            event.locked_at = None;
            event.locked_by = None;
            events::update(tx, &event)?;
            Ok(true)
        })
    }

    /// Record a failed attempt and release the lock. Returns true when the
    /// event has now used up its retries and was parked.
    fn mark_failed(&self, id: &str, reason: &str, max_retries: u32) -> Result<bool, OutboxError> {
        self.uow.run(|tx| {
            let mut event = events::get(tx, id)?.ok_or_else(|| OutboxError::NotFound(id.into()))?;
            if event.sent {
                return Ok(false);
            }
            event.retry_count += 1;
            event.last_error = Some(reason.to_string());
            event.locked_at = None;
            event.locked_by = None;

            let park = event.retry_count >= max_retries;
            if park {
                event.parked_at = Some(Utc::now());
                tracing::error!(
                    event_id = %event.id,
                    name = %event.name,
                    retry_count = event.retry_count,
                    error = %reason,
                    "Event exhausted its retries and was parked; requeue it once the broker is healthy"
                );
            }

            events::update(tx, &event)?;
            Ok(park)
        })
    }

    /// Put a parked event back into rotation with a fresh retry budget.
    pub fn requeue(&self, id: &str) -> Result<EventRecord, OutboxError> {
        let event = self.uow.run(|tx| {
            let mut event = events::get(tx, id)?.ok_or_else(|| OutboxError::NotFound(id.into()))?;
            if event.parked_at.is_none() || event.sent {
                return Err(OutboxError::NotParked(id.to_string()));
            }
            event.parked_at = None;
            event.retry_count = 0;
            event.last_error = None;
            events::update(tx, &event)?;
            Ok(event)
        })?;

        tracing::info!(event_id = %event.id, name = %event.name, "Requeued parked event");
        Ok(event)
    }

    pub fn get(&self, id: &str) -> Result<Option<EventRecord>, OutboxError> {
        Ok(events::get(&self.uow.db().read()?, id)?)
    }

    pub fn pending(&self, limit: usize) -> Result<Vec<EventRecord>, OutboxError> {
        Ok(events::pending(&self.uow.db().read()?, limit)?)
    }

    pub fn parked(&self, limit: usize) -> Result<Vec<EventRecord>, OutboxError> {
        Ok(events::parked(&self.uow.db().read()?, limit)?)
    }

    pub fn stats(&self) -> Result<EventCounts, OutboxError> {
        Ok(events::counts(&self.uow.db().read()?)?)
    }
}
