//! The closed set of facts the system records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    FileCreated {
        file_id: String,
        owner_id: String,
        version_id: String,
        name: String,
    },
    FileRenamed {
        file_id: String,
        owner_id: String,
        old_name: String,
        new_name: String,
    },
    FileDeleted {
        file_id: String,
        owner_id: String,
        versions: u32,
    },
    FileVersionCreated {
        file_id: String,
        version_id: String,
        version_num: u32,
        storage_key: String,
    },
    /// Bytes were confirmed in storage. The preview worker acts on this one.
    FileVersionUploaded {
        file_id: String,
        version_id: String,
        version_num: u32,
        storage_key: String,
    },
    FileVersionReady {
        file_id: String,
        version_id: String,
        preview_key: String,
    },
    FileVersionFailed {
        file_id: String,
        version_id: String,
        reason: String,
    },
    FileVersionRestored {
        file_id: String,
        version_id: String,
        version_num: u32,
    },
    FileVersionDeleted {
        file_id: String,
        version_id: String,
        version_num: u32,
    },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::FileCreated { .. } => "FileCreated",
            EventPayload::FileRenamed { .. } => "FileRenamed",
            EventPayload::FileDeleted { .. } => "FileDeleted",
            EventPayload::FileVersionCreated { .. } => "FileVersionCreated",
            EventPayload::FileVersionUploaded { .. } => "FileVersionUploaded",
            EventPayload::FileVersionReady { .. } => "FileVersionReady",
            EventPayload::FileVersionFailed { .. } => "FileVersionFailed",
            EventPayload::FileVersionRestored { .. } => "FileVersionRestored",
            EventPayload::FileVersionDeleted { .. } => "FileVersionDeleted",
        }
    }

    pub fn file_id(&self) -> &str {
        match self {
            EventPayload::FileCreated { file_id, .. }
            | EventPayload::FileRenamed { file_id, .. }
            | EventPayload::FileDeleted { file_id, .. }
            | EventPayload::FileVersionCreated { file_id, .. }
            | EventPayload::FileVersionUploaded { file_id, .. }
            | EventPayload::FileVersionReady { file_id, .. }
            | EventPayload::FileVersionFailed { file_id, .. }
            | EventPayload::FileVersionRestored { file_id, .. }
            | EventPayload::FileVersionDeleted { file_id, .. } => file_id,
        }
    }
}

/// What goes over the broker: the fact plus its identity, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_internally_tagged() {
        let payload = EventPayload::FileVersionUploaded {
            file_id: "f".to_string(),
            version_id: "v".to_string(),
            version_num: 2,
            storage_key: "o/f/v2/a.png".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "FileVersionUploaded");
        assert_eq!(json["version_num"], 2);
        assert_eq!(payload.name(), "FileVersionUploaded");
        assert_eq!(payload.file_id(), "f");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let raw = br#"{"id":"e","name":"Nope","created_at":"2024-01-01T00:00:00Z","payload":{"type":"Nope"}}"#;
        assert!(EventEnvelope::decode(raw).is_err());
    }
}
