use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::storage::models::FileVersionRecord;
use crate::versioning::{VersionError, VersionService};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub uploaded: usize,
    /// Still waiting for bytes
    pub waiting: usize,
    /// Gave up after too many empty checks
    pub failed: usize,
    pub errors: usize,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} uploaded={} waiting={} failed={} errors={}",
            self.checked, self.uploaded, self.waiting, self.failed, self.errors
        )
    }
}

enum CheckOutcome {
    Uploaded,
    Waiting(u32),
    Failed,
    /// The version left `processing` while we looked
    Moved,
}

/// Reconciles `processing` versions with object storage.
///
/// Clients upload straight to storage, so nobody tells us when bytes land.
/// Each pass looks for the object behind every processing version and marks
/// it uploaded once present, or failed after `max_polls` empty checks.
pub struct FileChecker {
    versions: Arc<VersionService>,
    interval: Duration,
    max_polls: u32,
}

impl FileChecker {
    pub fn new(versions: Arc<VersionService>, interval: Duration, max_polls: u32) -> Self {
        Self {
            versions,
            interval,
            max_polls,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            max_polls = self.max_polls,
            "File checker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(report) if report.checked > 0 => {
                            tracing::debug!(%report, "File check pass complete");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to list processing versions"),
                    }
                }
            }
        }

        tracing::info!("File checker stopped");
    }

    /// Run one pass. Failures on single versions are counted, never fatal.
    pub async fn check_once(&self) -> Result<CheckReport, VersionError> {
        let pending = self.versions.processing_versions()?;
        let mut report = CheckReport::default();

        for version in pending {
            report.checked += 1;
            match self.check_version(&version).await {
                Ok(CheckOutcome::Uploaded) => report.uploaded += 1,
                Ok(CheckOutcome::Waiting(attempts)) => {
                    report.waiting += 1;
                    tracing::trace!(version_id = %version.id, attempts, "Content not in storage yet");
                }
                Ok(CheckOutcome::Failed) => report.failed += 1,
                Ok(CheckOutcome::Moved) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        version_id = %version.id,
                        storage_key = %version.storage_key,
                        error = %e,
                        "File check failed"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn check_version(&self, version: &FileVersionRecord) -> Result<CheckOutcome, VersionError> {
        if self.versions.store().exists(&version.storage_key).await? {
            return match self.versions.mark_uploaded(&version.id) {
                Ok(_) => Ok(CheckOutcome::Uploaded),
                Err(VersionError::InvalidTransition(_)) => Ok(CheckOutcome::Moved),
                Err(e) => Err(e),
            };
        }

        let Some(attempts) = self.versions.record_missing_check(&version.id)? else {
            return Ok(CheckOutcome::Moved);
        };
        if attempts < self.max_polls {
            return Ok(CheckOutcome::Waiting(attempts));
        }

        let reason = format!("no content received after {attempts} checks");
        match self.versions.mark_failed(&version.id, &reason) {
            Ok(_) => Ok(CheckOutcome::Failed),
            Err(VersionError::InvalidTransition(_)) => Ok(CheckOutcome::Moved),
            Err(e) => Err(e),
        }
    }
}
