use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::thumbnail::{self, ThumbnailError};
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::outbox::{EventEnvelope, EventPayload};
use crate::queue::{Consumer, Message};
use crate::state_machine::VersionStatus;
use crate::versioning::keys;
use crate::versioning::{VersionError, VersionService, DEFAULT_PREVIEW_KEY};

pub const PREVIEW_GROUP: &str = "previews";

const PLACEHOLDER_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Version(#[from] VersionError),
    #[error(transparent)]
    Storage(#[from] ObjectStoreError),
    #[error("Thumbnail error: {0}")]
    Thumbnail(#[from] ThumbnailError),
}

impl PreviewError {
    /// Whether the message should be left uncommitted and tried again.
    pub fn is_transient(&self) -> bool {
        match self {
            PreviewError::Version(e) => e.is_transient(),
            PreviewError::Storage(e) => !matches!(
                e,
                ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_)
            ),
            PreviewError::Thumbnail(ThumbnailError::Task(_)) => true,
            PreviewError::Thumbnail(ThumbnailError::Image(_)) => false,
        }
    }
}

/// What handling one message amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// A thumbnail was rendered and stored under this key
    Generated(String),
    Placeholder,
    /// Content was missing or could not be thumbnailed; the version was marked failed
    Failed(String),
    Skipped(&'static str),
}

/// Turns `FileVersionUploaded` events into previews and `ready` versions.
pub struct PreviewWorker {
    consumer: Arc<dyn Consumer>,
    versions: Arc<VersionService>,
    topic: String,
    consume_timeout: Duration,
    backoff: Duration,
    thumbnail_size: u32,
}

impl PreviewWorker {
    pub fn new(
        consumer: Arc<dyn Consumer>,
        versions: Arc<VersionService>,
        topic: &str,
        consume_timeout: Duration,
        backoff: Duration,
        thumbnail_size: u32,
    ) -> Self {
        Self {
            consumer,
            versions,
            topic: topic.to_string(),
            consume_timeout,
            backoff,
            thumbnail_size,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(topic = %self.topic, group = PREVIEW_GROUP, "Preview worker started");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.consumer.consume(&self.topic, self.consume_timeout) => next,
            };

            let retry = match next {
                Ok(Some(message)) => !self.handle(&message).await,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read from broker");
                    true
                }
            };

            if retry {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        tracing::info!("Preview worker stopped");
    }

    /// Process and commit one message. Returns false when it was left
    /// uncommitted for redelivery.
    pub async fn handle(&self, message: &Message) -> bool {
        match self.process(message).await {
            Ok(outcome) => {
                tracing::debug!(offset = message.offset, key = %message.key, ?outcome, "Handled message");
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    offset = message.offset,
                    key = %message.key,
                    error = %e,
                    "Preview generation failed, will retry"
                );
                return false;
            }
            Err(e) => {
                tracing::error!(
                    offset = message.offset,
                    key = %message.key,
                    error = %e,
                    "Dropping message that cannot be processed"
                );
            }
        }

        match self.consumer.commit(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(offset = message.offset, error = %e, "Failed to commit message");
                false
            }
        }
    }

    pub async fn process(&self, message: &Message) -> Result<PreviewOutcome, PreviewError> {
        let envelope = match EventEnvelope::decode(&message.value) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(offset = message.offset, error = %e, "Undecodable event");
                return Ok(PreviewOutcome::Skipped("undecodable"));
            }
        };

        let EventPayload::FileVersionUploaded {
            version_id,
            storage_key,
            ..
        } = envelope.payload
        else {
            return Ok(PreviewOutcome::Skipped("not an upload"));
        };

        let version = match self.versions.get_version(&version_id) {
            Ok(version) => version,
            Err(VersionError::VersionNotFound(_)) => {
                return Ok(PreviewOutcome::Skipped("version deleted"))
            }
            Err(e) => return Err(e.into()),
        };
        if version.status != VersionStatus::Uploaded {
            return Ok(PreviewOutcome::Skipped("already settled"));
        }

        if !keys::is_thumbnailable(&storage_key) {
            self.versions.update_preview(&version_id, DEFAULT_PREVIEW_KEY)?;
            return Ok(PreviewOutcome::Placeholder);
        }

        let content = match self.versions.store().get(&storage_key).await {
            Ok(content) => content,
            Err(e @ (ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_))) => {
                // Only committed once the version is settled as failed
                let reason = format!("uploaded content is gone: {e}");
                self.versions.mark_failed(&version_id, &reason)?;
                return Ok(PreviewOutcome::Failed(reason));
            }
            Err(e) => return Err(e.into()),
        };
        let jpeg = match thumbnail::generate(content, self.thumbnail_size).await {
            Ok(jpeg) => jpeg,
            Err(ThumbnailError::Image(e)) => {
                let reason = format!("could not decode image: {e}");
                self.versions.mark_failed(&version_id, &reason)?;
                return Ok(PreviewOutcome::Failed(reason));
            }
            Err(e) => return Err(e.into()),
        };

        let preview_key = keys::preview_key(&version_id);
        self.versions.store().put(&preview_key, jpeg).await?;
        self.versions.update_preview(&version_id, &preview_key)?;

        Ok(PreviewOutcome::Generated(preview_key))
    }
}

/// Make sure the shared placeholder preview exists.
pub async fn ensure_placeholder(store: &dyn ObjectStore) -> Result<(), PreviewError> {
    if store.exists(DEFAULT_PREVIEW_KEY).await? {
        return Ok(());
    }
    store
        .put(DEFAULT_PREVIEW_KEY, thumbnail::placeholder(PLACEHOLDER_SIZE)?)
        .await?;
    tracing::info!(key = DEFAULT_PREVIEW_KEY, "Stored placeholder preview");
    Ok(())
}
