//! Harness shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use file_vault::object_store::{LocalStore, ObjectStore, UrlSigner};
use file_vault::outbox::EventService;
use file_vault::queue::{Producer, QueueError, RedbQueue};
use file_vault::storage::{Database, UnitOfWork};
use file_vault::versioning::{UploadRequest, UploadTicket, VersionService};

pub const TOPIC: &str = "file-events";

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: Database,
    pub uow: UnitOfWork,
    pub queue: RedbQueue,
    pub store: Arc<LocalStore>,
    pub events: Arc<EventService>,
    pub versions: Arc<VersionService>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queue = RedbQueue::open(dir.path().join("data")).unwrap();
        Self::build(dir, queue.clone(), Arc::new(queue), "instance-a")
    }

    /// A harness whose outbox publishes through `producer` instead of the queue.
    pub fn with_producer(producer: Arc<dyn Producer>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let queue = RedbQueue::open(dir.path().join("data")).unwrap();
        Self::build(dir, queue, producer, "instance-a")
    }

    fn build(
        dir: tempfile::TempDir,
        queue: RedbQueue,
        producer: Arc<dyn Producer>,
        instance: &str,
    ) -> Self {
        let db = Database::open(dir.path().join("data")).unwrap();
        let uow = UnitOfWork::new(db.clone());
        let signer = UrlSigner::new("http://localhost:8080", b"integration-test-secret");
        let store = Arc::new(LocalStore::new(dir.path().join("files"), signer).unwrap());
        let events = Arc::new(EventService::new(
            uow.clone(),
            producer,
            instance,
            TOPIC,
            Duration::from_secs(60),
        ));
        let versions = Arc::new(VersionService::new(
            uow.clone(),
            store.clone(),
            events.clone(),
            Duration::from_secs(900),
            Duration::from_secs(3600),
        ));

        Self {
            dir,
            db,
            uow,
            queue,
            store,
            events,
            versions,
        }
    }

    /// A second outbox instance over the same database, as another replica would run.
    pub fn replica_events(&self, instance: &str, producer: Arc<dyn Producer>) -> EventService {
        EventService::new(
            self.uow.clone(),
            producer,
            instance,
            TOPIC,
            Duration::from_secs(60),
        )
    }

    pub async fn upload(&self, owner: &str, name: &str) -> UploadTicket {
        self.versions
            .upload_new_file(request(owner, name))
            .await
            .unwrap()
    }

    pub async fn upload_version(&self, owner: &str, file_id: &str, name: &str) -> UploadTicket {
        let num = self.versions.next_version_num(file_id).unwrap();
        self.versions
            .upload_new_version(file_id, num, request(owner, name))
            .await
            .unwrap()
    }
}

pub fn request<'a>(owner: &'a str, name: &'a str) -> UploadRequest<'a> {
    UploadRequest {
        owner_id: owner,
        session_id: "session-1",
        name,
        byte_size: 1024,
        mime_type: None,
    }
}

/// Records everything produced; optionally fails the first `fail_first` calls.
#[derive(Default)]
pub struct RecordingProducer {
    pub produced: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub calls: AtomicUsize,
    pub fail_first: usize,
    pub delay: Option<Duration>,
}

impl RecordingProducer {
    pub fn failing(fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.produced
            .lock()
            .unwrap()
            .iter()
            .map(|(_, key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl Producer for RecordingProducer {
    async fn produce(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), QueueError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.fail_first {
            return Err(QueueError::Unavailable("broker down".to_string()));
        }
        self.produced
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), value.to_vec()));
        Ok(())
    }
}

/// Put bytes where the client would have uploaded them.
pub async fn deliver(h: &Harness, ticket: &UploadTicket, data: &'static [u8]) {
    h.store
        .put(&ticket.version.storage_key, bytes::Bytes::from_static(data))
        .await
        .unwrap();
}
