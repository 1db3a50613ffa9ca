use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::VersionStatus;

/// Classification of a file derived from its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Audio,
    Binary,
    Document,
    Image,
    Video,
}

impl FileType {
    /// Derive a file type classification from a MIME type string.
    pub fn from_mime(mime_type: &str) -> Self {
        let primary = mime_type.split('/').next().unwrap_or("");
        match primary {
            "audio" => FileType::Audio,
            "image" => FileType::Image,
            "video" => FileType::Video,
            "text" | "application" => {
                let sub = mime_type.split('/').nth(1).unwrap_or("");
                match sub {
                    "pdf"
                    | "msword"
                    | "rtf"
                    | "csv"
                    | "vnd.openxmlformats-officedocument.wordprocessingml.document"
                    | "vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                    | "vnd.openxmlformats-officedocument.presentationml.presentation"
                    | "vnd.ms-excel"
                    | "vnd.ms-powerpoint" => FileType::Document,
                    _ if primary == "text" => FileType::Document,
                    _ => FileType::Binary,
                }
            }
            _ => FileType::Binary,
        }
    }
}

/// Current-state projection of a user's logical document.
///
/// `status`, `mime_type`, `byte_size` and `preview_key` mirror the version whose
/// number equals `version_num`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub uploaded_by_session_id: String,
    pub name: String,
    pub mime_type: String,
    pub file_type: FileType,
    pub byte_size: u64,
    pub status: VersionStatus,
    pub version_num: u32,
    /// Highest version number ever allocated for this file. Never decreases,
    /// so numbers and storage keys of deleted versions are not handed out again.
    #[serde(default)]
    pub max_version_num: u32,
    #[serde(default)]
    pub preview_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Copy the denormalized fields of `version` onto this file and point at it.
    pub fn mirror(&mut self, version: &FileVersionRecord) {
        self.version_num = version.version_num;
        self.mime_type = version.mime_type.clone();
        self.file_type = FileType::from_mime(&version.mime_type);
        self.byte_size = version.byte_size;
        self.status = version.status;
        self.preview_key = version.preview_key.clone();
        self.uploaded_by_session_id = version.uploaded_by_session_id.clone();
        self.updated_at = Utc::now();
    }

    pub fn is_current(&self, version: &FileVersionRecord) -> bool {
        version.file_id == self.id && version.version_num == self.version_num
    }
}

/// One upload of a file. Content is immutable once uploaded; status is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersionRecord {
    pub id: String,
    pub file_id: String,
    pub uploaded_by_session_id: String,
    pub storage_key: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub version_num: u32,
    #[serde(default)]
    pub preview_key: Option<String>,
    pub status: VersionStatus,
    /// Storage existence checks that came back empty while `processing`.
    #[serde(default)]
    pub check_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An outbox row: an immutable fact plus mutable delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub name: String,
    /// JSON-encoded `EventPayload`
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub sent: bool,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_by: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub parked_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Key into the FIFO pending index.
    pub fn pending_key(&self) -> (i64, &str) {
        (self.created_at.timestamp_micros(), self.id.as_str())
    }

    /// Locked by the instance that recorded it and never claimed since.
    pub fn is_creation_lock(&self) -> bool {
        self.locked_at == Some(self.created_at)
    }

    pub fn delivery_state(&self) -> DeliveryState {
        if self.sent {
            DeliveryState::Sent
        } else if self.locked_at.is_some() && !self.is_creation_lock() {
            DeliveryState::InFlight
        } else {
            DeliveryState::Pending
        }
    }

    /// A lock is live when it was taken less than `timeout` ago.
    pub fn is_locked(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        match self.locked_at {
            Some(at) => now - at < timeout,
            None => false,
        }
    }
}

/// The three legal delivery states of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    InFlight,
    Sent,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryState::Pending => write!(f, "pending"),
            DeliveryState::InFlight => write!(f, "in_flight"),
            DeliveryState::Sent => write!(f, "sent"),
        }
    }
}
