//! Broker capability used by the outbox publisher and the event consumers.
//!
//! Delivery is at-least-once: a consumed message is handed out again until its
//! consumer group commits it.

mod redb_log;

pub use redb_log::{RedbConsumer, RedbQueue};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl From<redb::Error> for QueueError {
    fn from(e: redb::Error) -> Self {
        QueueError::Storage(DatabaseError::from(e))
    }
}

impl From<redb::StorageError> for QueueError {
    fn from(e: redb::StorageError) -> Self {
        QueueError::Storage(DatabaseError::from(e))
    }
}

impl From<redb::TableError> for QueueError {
    fn from(e: redb::TableError) -> Self {
        QueueError::Storage(DatabaseError::from(e))
    }
}

impl From<redb::TransactionError> for QueueError {
    fn from(e: redb::TransactionError) -> Self {
        QueueError::Storage(DatabaseError::from(e))
    }
}

impl From<redb::CommitError> for QueueError {
    fn from(e: redb::CommitError) -> Self {
        QueueError::Storage(DatabaseError::from(e))
    }
}

/// A message read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub offset: u64,
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), QueueError>;
}

/// A consumer bound to one consumer group.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Next uncommitted message on `topic`, waiting at most `wait` for one to arrive.
    async fn consume(&self, topic: &str, wait: Duration) -> Result<Option<Message>, QueueError>;

    /// Acknowledge `message` and everything before it on its topic.
    async fn commit(&self, message: &Message) -> Result<(), QueueError>;
}
