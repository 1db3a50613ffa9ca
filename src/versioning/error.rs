use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::outbox::OutboxError;
use crate::state_machine::InvalidTransition;
use crate::storage::DatabaseError;

#[derive(Debug, Error)]
pub enum VersionError {
    // Not found
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("File version not found: {0}")]
    VersionNotFound(String),

    // Invalid state
    #[error("Cannot delete the current version of a file")]
    CannotDeleteCurrent,
    #[error("Version is still processing")]
    VersionProcessing,
    #[error("Version {0} is not ready")]
    VersionNotReady(String),
    #[error("Version {version_num} of file {file_id} already exists")]
    VersionConflict { file_id: String, version_num: u32 },
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    // Validation
    #[error("File size {size} exceeds the {limit} byte limit")]
    SizeExceeded { size: u64, limit: u64 },
    #[error("Validation failed: {0}")]
    Validation(String),

    // Infrastructure
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Storage error: {0}")]
    Storage(#[from] ObjectStoreError),
    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),
}

impl VersionError {
    /// Infrastructure failures that a later attempt may get past.
    pub fn is_transient(&self) -> bool {
        match self {
            VersionError::Database(_) | VersionError::Outbox(_) => true,
            VersionError::Storage(e) => !matches!(
                e,
                ObjectStoreError::InvalidKey(_) | ObjectStoreError::NotFound(_)
            ),
            _ => false,
        }
    }
}
