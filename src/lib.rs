//! file-vault - Versioned file storage with a transactional event outbox
//!
//! This crate provides:
//! - Files with immutable, numbered versions moving through processing, uploaded, ready and failed
//! - Direct-to-storage uploads and downloads via pre-signed URLs (local filesystem, GCS)
//! - redb embedded database for metadata and the outbox (ACID, MVCC, crash-safe)
//! - An at-least-once outbox publisher feeding a durable topic log
//! - Background workers for upload reconciliation, previews and event metrics

pub mod api;
pub mod config;
pub mod object_store;
pub mod outbox;
pub mod queue;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod versioning;
pub mod workers;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::Config;
use object_store::{LocalStore, ObjectStore};
use outbox::{EventService, OutboxPublisher};
use queue::RedbQueue;
use storage::{Database, UnitOfWork};
use versioning::VersionService;
use workers::{
    EventMetrics, FileChecker, MetricsWorker, PreviewWorker, METRICS_GROUP, PREVIEW_GROUP,
};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub queue: RedbQueue,
    pub object_store: Arc<dyn ObjectStore>,
    /// Set when the local backend is active; serves its signed URLs.
    pub local_store: Option<Arc<LocalStore>>,
    pub events: Arc<EventService>,
    pub versions: Arc<VersionService>,
    pub metrics: Arc<EventMetrics>,
}

impl AppState {
    /// Wire the services on top of opened storage.
    pub fn new(
        config: Config,
        db: Database,
        queue: RedbQueue,
        object_store: Arc<dyn ObjectStore>,
        local_store: Option<Arc<LocalStore>>,
    ) -> Self {
        let uow = UnitOfWork::new(db.clone());
        let events = Arc::new(EventService::new(
            uow.clone(),
            Arc::new(queue.clone()),
            &config.node.id,
            &config.outbox.topic,
            config.outbox.lock_timeout,
        ));
        let versions = Arc::new(VersionService::new(
            uow,
            Arc::clone(&object_store),
            Arc::clone(&events),
            config.storage.upload_url_ttl,
            config.storage.download_url_ttl,
        ));

        Self {
            config,
            db,
            queue,
            object_store,
            local_store,
            events,
            versions,
            metrics: Arc::new(EventMetrics::new()),
        }
    }

    /// Start the outbox publisher and the workers. They stop when `cancel` fires.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let outbox = &self.config.outbox;
        let workers = &self.config.workers;

        let publisher = OutboxPublisher::new(Arc::clone(&self.events), outbox.clone());
        let checker = FileChecker::new(
            Arc::clone(&self.versions),
            workers.file_check_interval,
            workers.file_check_max_polls,
        );
        let previews = PreviewWorker::new(
            Arc::new(self.queue.consumer(PREVIEW_GROUP)),
            Arc::clone(&self.versions),
            &outbox.topic,
            workers.consume_timeout,
            workers.preview_backoff,
            workers.thumbnail_size,
        );
        let metrics = MetricsWorker::new(
            Arc::new(self.queue.consumer(METRICS_GROUP)),
            Arc::clone(&self.metrics),
            &outbox.topic,
            workers.consume_timeout,
            workers.metrics_report_interval,
            workers.preview_backoff,
        );

        vec![
            tokio::spawn(publisher.run(cancel.child_token())),
            tokio::spawn(checker.run(cancel.child_token())),
            tokio::spawn(previews.run(cancel.child_token())),
            tokio::spawn(metrics.run(cancel.child_token())),
        ]
    }
}
