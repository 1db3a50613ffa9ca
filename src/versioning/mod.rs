//! Files, their versions, and the commands that move them through the lifecycle.

mod error;
pub mod keys;
mod service;

pub use error::VersionError;
pub use keys::{FileName, FileSize, DEFAULT_PREVIEW_KEY, MAX_UPLOAD_SIZE};
pub use service::{DownloadLinks, UploadRequest, UploadTicket, VersionService};
