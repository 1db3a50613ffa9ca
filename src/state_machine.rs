//! Lifecycle of a file version.
//!
//! ```text
//! processing ──> uploaded ──> ready
//!      │             │
//!      └──> failed <─┘
//! ```
//!
//! `ready` and `failed` are terminal. A version never skips `uploaded` on its
//! way to `ready`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    /// Upload URL issued, bytes not yet seen in storage.
    Processing,
    /// Bytes confirmed in storage, no preview yet.
    Uploaded,
    /// Preview generated, fully servable.
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: VersionStatus,
    pub to: VersionStatus,
}

impl VersionStatus {
    pub const ALL: [VersionStatus; 4] = [
        VersionStatus::Processing,
        VersionStatus::Uploaded,
        VersionStatus::Ready,
        VersionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Processing => "processing",
            VersionStatus::Uploaded => "uploaded",
            VersionStatus::Ready => "ready",
            VersionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VersionStatus::Ready | VersionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        matches!(
            (self, next),
            (VersionStatus::Processing, VersionStatus::Uploaded)
                | (VersionStatus::Processing, VersionStatus::Failed)
                | (VersionStatus::Uploaded, VersionStatus::Ready)
                | (VersionStatus::Uploaded, VersionStatus::Failed)
        )
    }

    /// Validate a forward move, returning the new status.
    pub fn transition(self, next: VersionStatus) -> Result<VersionStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(VersionStatus::Processing),
            "uploaded" => Ok(VersionStatus::Uploaded),
            "ready" => Ok(VersionStatus::Ready),
            "failed" => Ok(VersionStatus::Failed),
            other => Err(format!("unknown version status '{other}'")),
        }
    }
}
