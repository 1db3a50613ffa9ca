//! Background loops: storage reconciliation and the two event consumers.

pub mod file_checker;
pub mod metrics;
pub mod preview;
mod thumbnail;

pub use file_checker::{CheckReport, FileChecker};
pub use metrics::{EventMetrics, MetricsSnapshot, MetricsWorker, METRICS_GROUP};
pub use preview::{ensure_placeholder, PreviewError, PreviewOutcome, PreviewWorker, PREVIEW_GROUP};
pub use thumbnail::ThumbnailError;
