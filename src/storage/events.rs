//! Outbox event repository.

use redb::{ReadableTable, ReadableTableMetadata};

use super::db::{get_record, DatabaseError, Reader};
use super::models::EventRecord;
use super::tables::*;
use super::unit_of_work::Transaction;

/// Row counts for the outbox tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub total: u64,
    pub pending: u64,
    pub parked: u64,
}

impl EventCounts {
    pub fn sent(&self) -> u64 {
        self.total.saturating_sub(self.pending + self.parked)
    }
}

/// Get an event by its UUID
pub fn get<R: Reader>(r: &R, id: &str) -> Result<Option<EventRecord>, DatabaseError> {
    let table = r.table(EVENTS)?;
    get_record(&table, id)
}

/// Up to `limit` unsent, unparked events, oldest first
pub fn pending<R: Reader>(r: &R, limit: usize) -> Result<Vec<EventRecord>, DatabaseError> {
    let index = r.table(PENDING_EVENTS)?;
    let events = r.table(EVENTS)?;

    let mut out = Vec::with_capacity(limit);
    for entry in index.iter()?.take(limit) {
        let (key, _) = entry?;
        let (_, id) = key.value();
        if let Some(event) = get_record(&events, id)? {
            out.push(event);
        }
    }

    Ok(out)
}

/// Up to `limit` parked events
pub fn parked<R: Reader>(r: &R, limit: usize) -> Result<Vec<EventRecord>, DatabaseError> {
    let index = r.table(PARKED_EVENTS)?;
    let events = r.table(EVENTS)?;

    let mut out = Vec::new();
    for entry in index.iter()?.take(limit) {
        let (id, _) = entry?;
        if let Some(event) = get_record(&events, id.value())? {
            out.push(event);
        }
    }

    Ok(out)
}

pub fn counts<R: Reader>(r: &R) -> Result<EventCounts, DatabaseError> {
    Ok(EventCounts {
        total: r.table(EVENTS)?.len()?,
        pending: r.table(PENDING_EVENTS)?.len()?,
        parked: r.table(PARKED_EVENTS)?.len()?,
    })
}

/// Append a new event to the outbox
pub fn insert(tx: &Transaction, event: &EventRecord) -> Result<(), DatabaseError> {
    debug_assert!(!event.sent, "new events must be unsent");

    {
        let mut table = tx.table(EVENTS)?;
        let data = rmp_serde::to_vec_named(event)?;
        table.insert(event.id.as_str(), data.as_slice())?;
    }

    let mut index = tx.table(PENDING_EVENTS)?;
    index.insert(event.pending_key(), ())?;
    Ok(())
}

/// Persist delivery bookkeeping. Sent and parked events leave the pending index.
pub fn update(tx: &Transaction, event: &EventRecord) -> Result<(), DatabaseError> {
    {
        let mut table = tx.table(EVENTS)?;
        let data = rmp_serde::to_vec_named(event)?;
        table.insert(event.id.as_str(), data.as_slice())?;
    }

    {
        let mut index = tx.table(PENDING_EVENTS)?;
        if event.sent || event.parked_at.is_some() {
            index.remove(event.pending_key())?;
        } else {
            index.insert(event.pending_key(), ())?;
        }
    }

    let mut parked = tx.table(PARKED_EVENTS)?;
    match event.parked_at {
        Some(at) if !event.sent => {
            parked.insert(event.id.as_str(), at.timestamp_micros())?;
        }
        _ => {
            parked.remove(event.id.as_str())?;
        }
    }

    Ok(())
}
