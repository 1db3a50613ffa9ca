mod admin;
mod files;
mod storage;
mod versions;

pub use admin::{admin_purge, event_metrics, health, outbox_status, requeue_event};
pub use files::{create_file, delete_file, download_file, get_file, list_files, rename_file};
pub use storage::{get_object, put_object};
pub use versions::{create_version, delete_version, list_versions, restore_version};
