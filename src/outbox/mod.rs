//! Transactional outbox: facts are written with the change that caused them
//! and delivered to the broker at least once.

pub mod events;
mod publisher;
mod service;

pub use events::{EventEnvelope, EventPayload};
pub use publisher::OutboxPublisher;
pub use service::{EventService, OutboxError, PublishReport};
