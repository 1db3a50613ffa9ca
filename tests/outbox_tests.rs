mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Harness, RecordingProducer, TOPIC};
use file_vault::outbox::{EventEnvelope, EventPayload, OutboxError};
use file_vault::queue::{Consumer, Producer, QueueError};
use file_vault::storage::models::DeliveryState;
use file_vault::storage::{DatabaseError, Reader, UnitOfWork, EVENTS};

fn renamed(file_id: &str) -> EventPayload {
    EventPayload::FileRenamed {
        file_id: file_id.to_string(),
        owner_id: "owner".to_string(),
        old_name: "a".to_string(),
        new_name: "b".to_string(),
    }
}

fn record(h: &Harness, payload: &EventPayload) -> String {
    h.uow
        .run(|tx| h.events.create(tx, payload))
        .unwrap()
        .id
}

#[tokio::test]
async fn test_created_event_is_pending_and_held_by_its_creator() {
    let h = Harness::new();
    let created = h.uow.run(|tx| h.events.create(tx, &renamed("f1"))).unwrap();
    assert!(created.locked_at.is_none());
    assert!(created.locked_by.is_none());

    let stored = h.events.get(&created.id).unwrap().unwrap();
    assert_eq!(stored.name, "FileRenamed");
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.locked_by.as_deref(), Some("instance-a"));
    assert_eq!(stored.locked_at, Some(stored.created_at));
    assert_eq!(stored.delivery_state(), DeliveryState::Pending);
    assert_eq!(h.events.stats().unwrap().pending, 1);
}

#[tokio::test]
async fn test_creation_lock_keeps_other_instances_away() {
    let producer = Arc::new(RecordingProducer::default());
    let h = Harness::with_producer(producer.clone());
    let id = record(&h, &renamed("f1"));

    let other = h.replica_events("instance-b", producer.clone());
    let report = other.publish_pending(10, 3).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(report.skipped, 1);

    // The creating instance does not wait for its own lock to expire
    let report = h.events.publish_pending(10, 3).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(producer.keys(), vec![id]);
}

#[tokio::test]
async fn test_event_rolls_back_with_its_transaction() {
    let h = Harness::new();

    let result: Result<(), OutboxError> = h.uow.run(|tx| {
        h.events.create(tx, &renamed("f1"))?;
        Err(OutboxError::NotFound("business failure".to_string()))
    });
    assert!(result.is_err());

    let counts = h.events.stats().unwrap();
    assert_eq!(counts.total, 0);
    assert!(h.events.pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_publish_delivers_in_creation_order() {
    let h = Harness::new();
    let first = record(&h, &renamed("f1"));
    let second = record(&h, &renamed("f2"));
    let third = record(&h, &renamed("f3"));

    let report = h.events.publish_pending(10, 3).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.sent, 3);

    let consumer = h.queue.consumer("test");
    let mut keys = Vec::new();
    while let Some(message) = consumer.consume(TOPIC, Duration::ZERO).await.unwrap() {
        let envelope = EventEnvelope::decode(&message.value).unwrap();
        assert_eq!(envelope.id, message.key);
        keys.push(message.key.clone());
        consumer.commit(&message).await.unwrap();
    }
    assert_eq!(keys, vec![first.clone(), second, third]);

    let sent = h.events.get(&first).unwrap().unwrap();
    assert_eq!(sent.delivery_state(), DeliveryState::Sent);
    assert!(sent.sent_at.is_some());
    assert!(sent.locked_at.is_none());
    assert_eq!(h.events.stats().unwrap().sent(), 3);
}

#[tokio::test]
async fn test_batch_size_limits_a_pass() {
    let h = Harness::new();
    for i in 0..5 {
        record(&h, &renamed(&format!("f{i}")));
    }

    let report = h.events.publish_pending(2, 3).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(h.events.stats().unwrap().pending, 3);

    h.events.publish_pending(10, 3).await.unwrap();
    assert_eq!(h.events.stats().unwrap().pending, 0);
}

#[tokio::test]
async fn test_failed_publish_increments_retry_and_unlocks() {
    let producer = Arc::new(RecordingProducer::failing(1));
    let h = Harness::with_producer(producer.clone());
    let id = record(&h, &renamed("f1"));

    let err = h.events.publish_pending(10, 5).await.unwrap_err();
    match err {
        OutboxError::PartialFailure(report) => {
            assert_eq!(report.failed, 1);
            assert_eq!(report.parked, 0);
        }
        other => panic!("unexpected error: {other}"),
    }

    let event = h.events.get(&id).unwrap().unwrap();
    assert_eq!(event.retry_count, 1);
    assert_eq!(event.delivery_state(), DeliveryState::Pending);
    assert!(event.last_error.as_deref().unwrap().contains("broker down"));

    // Next pass succeeds
    let report = h.events.publish_pending(10, 5).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(producer.keys(), vec![id]);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_batch() {
    let producer = Arc::new(RecordingProducer::failing(1));
    let h = Harness::with_producer(producer.clone());
    let first = record(&h, &renamed("f1"));
    let second = record(&h, &renamed("f2"));

    let err = h.events.publish_pending(10, 5).await.unwrap_err();
    let OutboxError::PartialFailure(report) = err else {
        panic!("expected partial failure");
    };
    assert_eq!(report.claimed, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);

    assert!(!h.events.get(&first).unwrap().unwrap().sent);
    assert!(h.events.get(&second).unwrap().unwrap().sent);
}

#[tokio::test]
async fn test_exhausted_event_is_parked_and_can_be_requeued() {
    let producer = Arc::new(RecordingProducer::failing(2));
    let h = Harness::with_producer(producer.clone());
    let id = record(&h, &renamed("f1"));

    assert!(h.events.publish_pending(10, 2).await.is_err());
    let err = h.events.publish_pending(10, 2).await.unwrap_err();
    let OutboxError::PartialFailure(report) = err else {
        panic!("expected partial failure");
    };
    assert_eq!(report.parked, 1);

    // Parked events are out of rotation
    let counts = h.events.stats().unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.parked, 1);
    let report = h.events.publish_pending(10, 2).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(h.events.parked(10).unwrap()[0].id, id);

    let requeued = h.events.requeue(&id).unwrap();
    assert_eq!(requeued.retry_count, 0);
    assert!(requeued.parked_at.is_none());
    assert!(matches!(h.events.requeue(&id), Err(OutboxError::NotParked(_))));

    let report = h.events.publish_pending(10, 2).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(producer.keys(), vec![id]);
}

#[tokio::test]
async fn test_live_lock_is_respected_and_expired_lock_reclaimed() {
    let h = Harness::new();
    let id = record(&h, &renamed("f1"));

    // Another instance holds a fresh lock
    h.uow
        .run(|tx| {
            let mut event = file_vault::storage::events::get(tx, &id)?.unwrap();
            event.locked_at = Some(chrono::Utc::now());
            event.locked_by = Some("instance-b".to_string());
            file_vault::storage::events::update(tx, &event)
        })
        .unwrap();

    let report = h.events.publish_pending(10, 3).await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(
        h.events.get(&id).unwrap().unwrap().delivery_state(),
        DeliveryState::InFlight
    );

    // That instance died long ago
    h.uow
        .run(|tx| {
            let mut event = file_vault::storage::events::get(tx, &id)?.unwrap();
            event.locked_at = Some(chrono::Utc::now() - chrono::Duration::minutes(10));
            file_vault::storage::events::update(tx, &event)
        })
        .unwrap();

    let report = h.events.publish_pending(10, 3).await.unwrap();
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn test_concurrent_publishers_never_double_send() {
    let producer = Arc::new(RecordingProducer::slow(Duration::from_millis(5)));
    let h = Harness::with_producer(producer.clone());
    let mut ids: Vec<String> = (0..20).map(|i| record(&h, &renamed(&format!("f{i}")))).collect();

    let a = Arc::new(h.replica_events("instance-a", producer.clone()));
    let b = Arc::new(h.replica_events("instance-b", producer.clone()));

    let (ra, rb) = tokio::join!(
        {
            let a = Arc::clone(&a);
            async move { a.publish_pending(100, 3).await.unwrap() }
        },
        {
            let b = Arc::clone(&b);
            async move { b.publish_pending(100, 3).await.unwrap() }
        },
    );
    assert_eq!(ra.sent + rb.sent, 20);

    let mut keys = producer.keys();
    keys.sort();
    ids.sort();
    assert_eq!(keys, ids);
}

/// Delivers everything, but garbles the stored row of the first event it sees
/// so recording the delivery fails.
struct CorruptingProducer {
    uow: std::sync::Mutex<Option<UnitOfWork>>,
    inner: RecordingProducer,
}

#[async_trait]
impl Producer for CorruptingProducer {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), QueueError> {
        let uow = self.uow.lock().unwrap().take();
        if let Some(uow) = uow {
            uow.run(|tx| {
                let mut table = tx.table(EVENTS)?;
                table.insert(key, b"not msgpack".as_slice())?;
                Ok::<_, DatabaseError>(())
            })
            .unwrap();
        }
        self.inner.produce(topic, key, value).await
    }
}

#[tokio::test]
async fn test_bookkeeping_failure_does_not_stop_the_batch() {
    let producer = Arc::new(CorruptingProducer {
        uow: std::sync::Mutex::new(None),
        inner: RecordingProducer::default(),
    });
    let h = Harness::with_producer(producer.clone());
    *producer.uow.lock().unwrap() = Some(h.uow.clone());
    let first = record(&h, &renamed("f1"));
    let second = record(&h, &renamed("f2"));

    let err = h.events.publish_pending(10, 3).await.unwrap_err();
    let OutboxError::PartialFailure(report) = err else {
        panic!("expected partial failure");
    };
    assert_eq!(report.claimed, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(producer.inner.keys(), vec![first, second.clone()]);
    assert!(h.events.get(&second).unwrap().unwrap().sent);
}
