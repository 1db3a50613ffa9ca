use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database as RedbDatabase, ReadableTable, TableDefinition};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Consumer, Message, Producer, QueueError};
use crate::storage::DatabaseError;

/// Messages: (topic, offset) -> (key, value)
const MESSAGES: TableDefinition<(&str, u64), (&str, &[u8])> =
    TableDefinition::new("queue_messages");

/// Next offset to assign per topic
const HEADS: TableDefinition<&str, u64> = TableDefinition::new("queue_heads");

/// Next offset to deliver per (topic, consumer group)
const OFFSETS: TableDefinition<(&str, &str), u64> = TableDefinition::new("queue_offsets");

/// Durable append-only topic log with per-group committed offsets.
#[derive(Clone)]
pub struct RedbQueue {
    db: Arc<RedbDatabase>,
    notify: Arc<Notify>,
}

/// Consumer handle for one group; cheap to clone.
#[derive(Clone)]
pub struct RedbConsumer {
    queue: RedbQueue,
    group: String,
}

impl RedbQueue {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, QueueError> {
        std::fs::create_dir_all(data_dir.as_ref()).map_err(DatabaseError::from)?;
        let db = RedbDatabase::create(data_dir.as_ref().join("queue.redb"))
            .map_err(DatabaseError::from)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES)?;
            let _ = write_txn.open_table(HEADS)?;
            let _ = write_txn.open_table(OFFSETS)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn consumer(&self, group: &str) -> RedbConsumer {
        RedbConsumer {
            queue: self.clone(),
            group: group.to_string(),
        }
    }

    /// Messages on `topic` not yet committed by `group`.
    pub fn lag(&self, topic: &str, group: &str) -> Result<u64, QueueError> {
        let read_txn = self.db.begin_read()?;
        let heads = read_txn.open_table(HEADS)?;
        let offsets = read_txn.open_table(OFFSETS)?;
        let head = heads.get(topic)?.map(|v| v.value()).unwrap_or(0);
        let committed = offsets.get((topic, group))?.map(|v| v.value()).unwrap_or(0);
        Ok(head.saturating_sub(committed))
    }

    fn append(&self, topic: &str, key: &str, value: &[u8]) -> Result<u64, QueueError> {
        let write_txn = self.db.begin_write()?;
        let offset = {
            let mut heads = write_txn.open_table(HEADS)?;
            let offset = heads.get(topic)?.map(|v| v.value()).unwrap_or(0);
            heads.insert(topic, offset + 1)?;
            offset
        };
        {
            let mut messages = write_txn.open_table(MESSAGES)?;
            messages.insert((topic, offset), (key, value))?;
        }
        write_txn.commit()?;
        Ok(offset)
    }

    fn next_for(&self, topic: &str, group: &str) -> Result<Option<Message>, QueueError> {
        let read_txn = self.db.begin_read()?;
        let offsets = read_txn.open_table(OFFSETS)?;
        let messages = read_txn.open_table(MESSAGES)?;

        let committed = offsets.get((topic, group))?.map(|v| v.value()).unwrap_or(0);
        let mut range = messages.range((topic, committed)..=(topic, u64::MAX))?;

        match range.next() {
            Some(entry) => {
                let (k, v) = entry?;
                let (_, offset) = k.value();
                let (key, value) = v.value();
                Ok(Some(Message {
                    topic: topic.to_string(),
                    offset,
                    key: key.to_string(),
                    value: value.to_vec(),
                }))
            }
            None => Ok(None),
        }
    }

    fn commit_offset(&self, topic: &str, group: &str, offset: u64) -> Result<(), QueueError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut offsets = write_txn.open_table(OFFSETS)?;
            let current = offsets.get((topic, group))?.map(|v| v.value()).unwrap_or(0);
            if offset + 1 > current {
                offsets.insert((topic, group), offset + 1)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl Producer for RedbQueue {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), QueueError> {
        let offset = self.append(topic, key, value)?;
        tracing::trace!(topic, key, offset, "Produced message");
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Consumer for RedbConsumer {
    async fn consume(&self, topic: &str, wait: Duration) -> Result<Option<Message>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register for wakeups before looking, so a produce in between is not missed.
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.queue.next_for(topic, &self.group)? {
                return Ok(Some(message));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), QueueError> {
        self.queue
            .commit_offset(&message.topic, &self.group, message.offset)
    }
}
