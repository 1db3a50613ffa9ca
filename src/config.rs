use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub outbox: OutboxConfig,
    pub workers: WorkerConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Instance id; also the outbox lock owner.
    pub id: String,
    /// Externally reachable base URL, used for local pre-signed URLs.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Gcs,
    Local,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// HMAC secret for local pre-signed URLs
    pub signing_secret: String,
    /// GCS bucket name (required when backend is gcs)
    pub gcs_bucket: Option<String>,
    /// Path to GCS service account JSON (optional, defaults to ADC; required for signed URLs)
    pub gcs_credentials_file: Option<String>,
    pub upload_url_ttl: Duration,
    pub download_url_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Broker topic every outbox event is published to
    pub topic: String,
    pub interval: Duration,
    pub batch_size: usize,
    /// Failed attempts before an event is parked
    pub max_retries: u32,
    /// Claims older than this are considered abandoned
    pub lock_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub file_check_interval: Duration,
    /// Empty storage checks before a processing version is marked failed
    pub file_check_max_polls: u32,
    pub preview_backoff: Duration,
    /// Thumbnails fit inside a square box of this many pixels
    pub thumbnail_size: u32,
    /// Upper bound on a single broker read
    pub consume_timeout: Duration,
    pub metrics_report_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            signing_secret: uuid::Uuid::new_v4().to_string(),
            gcs_bucket: None,
            gcs_credentials_file: None,
            upload_url_ttl: Duration::from_secs(15 * 60),
            download_url_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            topic: "file-events".to_string(),
            interval: Duration::from_millis(1000),
            batch_size: 100,
            max_retries: 10,
            lock_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            file_check_interval: Duration::from_secs(10),
            file_check_max_polls: 180,
            preview_backoff: Duration::from_secs(5),
            thumbnail_size: 256,
            consume_timeout: Duration::from_millis(2000),
            metrics_report_interval: Duration::from_secs(60),
        }
    }
}

/// Parse an environment variable, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node_id = std::env::var("NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let public_url =
            std::env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let storage_backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            _ => StorageBackend::Local,
        };

        let storage_defaults = StorageConfig::default();
        let signing_secret = match std::env::var("STORAGE_SIGNING_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                if matches!(storage_backend, StorageBackend::Local) {
                    tracing::warn!(
                        "STORAGE_SIGNING_SECRET not set; signed URLs will not survive a restart"
                    );
                }
                storage_defaults.signing_secret
            }
        };

        let outbox = OutboxConfig::default();
        let workers = WorkerConfig::default();

        let config = Config {
            node: NodeConfig {
                id: node_id,
                bind_address,
                data_dir,
                public_url,
            },
            storage: StorageConfig {
                backend: storage_backend,
                local_storage_path: std::env::var("LOCAL_STORAGE_PATH")
                    .unwrap_or(storage_defaults.local_storage_path),
                signing_secret,
                gcs_bucket: std::env::var("GCS_BUCKET").ok(),
                gcs_credentials_file: std::env::var("GCS_CREDENTIALS_FILE").ok(),
                upload_url_ttl: Duration::from_secs(env_or(
                    "UPLOAD_URL_TTL_SECS",
                    storage_defaults.upload_url_ttl.as_secs(),
                )),
                download_url_ttl: Duration::from_secs(env_or(
                    "DOWNLOAD_URL_TTL_SECS",
                    storage_defaults.download_url_ttl.as_secs(),
                )),
            },
            outbox: OutboxConfig {
                topic: std::env::var("EVENTS_TOPIC").unwrap_or(outbox.topic),
                interval: Duration::from_millis(env_or(
                    "OUTBOX_INTERVAL_MS",
                    outbox.interval.as_millis() as u64,
                )),
                batch_size: env_or("OUTBOX_BATCH_SIZE", outbox.batch_size),
                max_retries: env_or("OUTBOX_MAX_RETRIES", outbox.max_retries),
                lock_timeout: Duration::from_secs(env_or(
                    "OUTBOX_LOCK_TIMEOUT_SECS",
                    outbox.lock_timeout.as_secs(),
                )),
            },
            workers: WorkerConfig {
                file_check_interval: Duration::from_secs(env_or(
                    "FILE_CHECK_INTERVAL_SECS",
                    workers.file_check_interval.as_secs(),
                )),
                file_check_max_polls: env_or("FILE_CHECK_MAX_POLLS", workers.file_check_max_polls),
                preview_backoff: Duration::from_secs(env_or(
                    "PREVIEW_BACKOFF_SECS",
                    workers.preview_backoff.as_secs(),
                )),
                thumbnail_size: env_or("PREVIEW_THUMBNAIL_SIZE", workers.thumbnail_size),
                consume_timeout: Duration::from_millis(env_or(
                    "QUEUE_CONSUME_TIMEOUT_MS",
                    workers.consume_timeout.as_millis() as u64,
                )),
                metrics_report_interval: Duration::from_secs(env_or(
                    "METRICS_REPORT_INTERVAL_SECS",
                    workers.metrics_report_interval.as_secs(),
                )),
            },
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "NODE_ID cannot be empty".to_string(),
            ));
        }

        if matches!(self.storage.backend, StorageBackend::Gcs) && self.storage.gcs_bucket.is_none()
        {
            return Err(ConfigError::ValidationError(
                "GCS_BUCKET is required when STORAGE_BACKEND=gcs".to_string(),
            ));
        }

        if self.storage.signing_secret.len() < 16 {
            return Err(ConfigError::ValidationError(
                "STORAGE_SIGNING_SECRET must be at least 16 bytes".to_string(),
            ));
        }

        if self.storage.upload_url_ttl.is_zero() || self.storage.download_url_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "signed URL TTLs must be greater than 0".to_string(),
            ));
        }

        if self.outbox.topic.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "EVENTS_TOPIC cannot be empty".to_string(),
            ));
        }

        if self.outbox.batch_size == 0 || self.outbox.max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "OUTBOX_BATCH_SIZE and OUTBOX_MAX_RETRIES must be greater than 0".to_string(),
            ));
        }

        if self.outbox.interval.is_zero()
            || self.workers.file_check_interval.is_zero()
            || self.workers.metrics_report_interval.is_zero()
        {
            return Err(ConfigError::ValidationError(
                "worker intervals must be greater than 0".to_string(),
            ));
        }

        if self.workers.file_check_max_polls == 0 {
            return Err(ConfigError::ValidationError(
                "FILE_CHECK_MAX_POLLS must be greater than 0".to_string(),
            ));
        }

        if !(16..=2048).contains(&self.workers.thumbnail_size) {
            return Err(ConfigError::ValidationError(
                "PREVIEW_THUMBNAIL_SIZE must be between 16 and 2048".to_string(),
            ));
        }

        let polled_for = self.workers.file_check_interval * self.workers.file_check_max_polls;
        if polled_for < self.storage.upload_url_ttl {
            tracing::warn!(
                "Versions are failed after {:?} of polling, before their {:?} upload URL expires. \
                 Consider raising FILE_CHECK_MAX_POLLS.",
                polled_for,
                self.storage.upload_url_ttl
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            node: NodeConfig {
                bind_address: "127.0.0.1:0".to_string(),
                data_dir: "./data".to_string(),
                id: "node-1".to_string(),
                public_url: "http://localhost:8080".to_string(),
            },
            storage: StorageConfig::default(),
            outbox: OutboxConfig::default(),
            workers: WorkerConfig::default(),
            test_mode: false,
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn gcs_requires_bucket() {
        let mut config = valid();
        config.storage.backend = StorageBackend::Gcs;
        assert!(config.validate().is_err());

        config.storage.gcs_bucket = Some("bucket".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_batch_and_short_secret() {
        let mut config = valid();
        config.outbox.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.storage.signing_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_thumbnail() {
        let mut config = valid();
        config.workers.thumbnail_size = 4096;
        assert!(config.validate().is_err());
    }
}
