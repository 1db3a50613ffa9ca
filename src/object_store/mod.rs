mod gcs;
mod local;
pub mod signing;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use signing::UrlSigner;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Signing error: {0}")]
    Signing(String),
}

/// A time-limited URL granting direct access to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub method: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Abstraction over object storage backends.
///
/// Keys are slash-separated paths derived from owner, file and version ids.
/// Clients move bytes through pre-signed URLs; the backend only touches
/// content for previews.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn upload_url(&self, key: &str, ttl: Duration) -> Result<PresignedUrl, ObjectStoreError>;
    async fn download_url(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, ObjectStoreError>;
}

/// Reject empty keys and keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty()
        || key.starts_with('/')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        assert!(validate_key("owner/file/v1/photo.png").is_ok());
        assert!(validate_key("previews/abc.jpg").is_ok());
    }

    #[test]
    fn rejects_traversal_and_empty_segments() {
        for key in ["", "/abs", "a/../b", "a//b", "./a", "a/"] {
            assert!(
                matches!(validate_key(key), Err(ObjectStoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }
}
