//! Shared test helpers for file-vault unit tests.

use std::sync::Arc;

use crate::config::{Config, NodeConfig, OutboxConfig, StorageConfig, WorkerConfig};
use crate::object_store::{LocalStore, UrlSigner};
use crate::queue::RedbQueue;
use crate::storage::Database;
use crate::AppState;

pub const TEST_SECRET: &str = "test-signing-secret-0123456789";

/// Create a test AppState with a temporary database, queue and local object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> Arc<AppState> {
    let data_dir = temp_dir.path().join("data");
    let files_dir = temp_dir.path().join("files");

    let config = Config {
        node: NodeConfig {
            id: uuid::Uuid::new_v4().to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            public_url: "http://localhost:8080".to_string(),
        },
        storage: StorageConfig {
            local_storage_path: files_dir.to_string_lossy().to_string(),
            signing_secret: TEST_SECRET.to_string(),
            ..StorageConfig::default()
        },
        outbox: OutboxConfig::default(),
        workers: WorkerConfig::default(),
        test_mode: true,
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let queue = RedbQueue::open(&data_dir).expect("Failed to open test queue");
    let signer = UrlSigner::new(&config.node.public_url, TEST_SECRET.as_bytes());
    let store = Arc::new(LocalStore::new(&files_dir, signer).expect("Failed to create test object store"));

    Arc::new(AppState::new(config, db, queue, store.clone(), Some(store)))
}
