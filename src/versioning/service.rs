use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::error::VersionError;
use super::keys::{self, FileName, FileSize};
use crate::object_store::{ObjectStore, PresignedUrl};
use crate::outbox::{EventPayload, EventService};
use crate::state_machine::VersionStatus;
use crate::storage::models::{FileRecord, FileType, FileVersionRecord};
use crate::storage::{files, versions, Transaction, UnitOfWork};

/// What a client needs to start an upload: the rows that now exist and where
/// to send the bytes.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub file: FileRecord,
    pub version: FileVersionRecord,
    pub upload: PresignedUrl,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLinks {
    pub file: FileRecord,
    pub content: PresignedUrl,
    pub preview: Option<PresignedUrl>,
}

/// Parameters of an upload shared by new files and new versions.
#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub owner_id: &'a str,
    pub session_id: &'a str,
    pub name: &'a str,
    pub byte_size: u64,
    pub mime_type: Option<&'a str>,
}

/// Drives files and their versions through the lifecycle.
///
/// Each command runs in one unit of work together with the outbox event
/// describing it. Pre-signing happens before the transaction opens, so a
/// signing failure leaves nothing behind.
pub struct VersionService {
    uow: UnitOfWork,
    store: Arc<dyn ObjectStore>,
    events: Arc<EventService>,
    upload_url_ttl: Duration,
    download_url_ttl: Duration,
}

impl VersionService {
    pub fn new(
        uow: UnitOfWork,
        store: Arc<dyn ObjectStore>,
        events: Arc<EventService>,
        upload_url_ttl: Duration,
        download_url_ttl: Duration,
    ) -> Self {
        Self {
            uow,
            store,
            events,
            upload_url_ttl,
            download_url_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Create a file and its first version in `processing`.
    pub async fn upload_new_file(
        &self,
        request: UploadRequest<'_>,
    ) -> Result<UploadTicket, VersionError> {
        let name = FileName::parse(request.name)?;
        let size = FileSize::new(request.byte_size)?;
        let mime_type = keys::resolve_mime(request.mime_type, &name);

        let file_id = Uuid::new_v4().to_string();
        let storage_key = keys::storage_key(request.owner_id, &file_id, 1, &name);
        let upload = self
            .store
            .upload_url(&storage_key, self.upload_url_ttl)
            .await?;

        let now = Utc::now();
        let version = FileVersionRecord {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.clone(),
            uploaded_by_session_id: request.session_id.to_string(),
            storage_key,
            mime_type: mime_type.clone(),
            byte_size: size.bytes(),
            version_num: 1,
            preview_key: None,
            status: VersionStatus::Processing,
            check_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        let file = FileRecord {
            id: file_id,
            owner_id: request.owner_id.to_string(),
            uploaded_by_session_id: request.session_id.to_string(),
            name: name.to_string(),
            file_type: FileType::from_mime(&mime_type),
            mime_type,
            byte_size: size.bytes(),
            status: VersionStatus::Processing,
            version_num: 1,
            max_version_num: 1,
            preview_key: None,
            created_at: now,
            updated_at: now,
        };

        self.uow.run(|tx| {
            files::save(tx, &file)?;
            versions::save(tx, &version)?;
            self.events.create(
                tx,
                &EventPayload::FileCreated {
                    file_id: file.id.clone(),
                    owner_id: file.owner_id.clone(),
                    version_id: version.id.clone(),
                    name: file.name.clone(),
                },
            )?;
            Ok::<_, VersionError>(())
        })?;

        tracing::info!(
            file_id = %file.id,
            version_id = %version.id,
            owner_id = %file.owner_id,
            size = file.byte_size,
            "Created file"
        );

        Ok(UploadTicket {
            file,
            version,
            upload,
        })
    }

    /// Add version `version_num` to an existing file and point the file at it.
    ///
    /// Fails with [`VersionError::VersionConflict`] unless the number is above
    /// every number the file has ever used; callers retry with
    /// [`Self::next_version_num`].
    pub async fn upload_new_version(
        &self,
        file_id: &str,
        version_num: u32,
        request: UploadRequest<'_>,
    ) -> Result<UploadTicket, VersionError> {
        let name = FileName::parse(request.name)?;
        let size = FileSize::new(request.byte_size)?;
        let mime_type = keys::resolve_mime(request.mime_type, &name);
        if version_num == 0 {
            return Err(VersionError::Validation(
                "version number must be at least 1".to_string(),
            ));
        }

        // Fail fast on unknown files before signing anything
        self.get_file(file_id, request.owner_id)?;

        let storage_key = keys::storage_key(request.owner_id, file_id, version_num, &name);
        let upload = self
            .store
            .upload_url(&storage_key, self.upload_url_ttl)
            .await?;

        let now = Utc::now();
        let version = FileVersionRecord {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            uploaded_by_session_id: request.session_id.to_string(),
            storage_key,
            mime_type,
            byte_size: size.bytes(),
            version_num,
            preview_key: None,
            status: VersionStatus::Processing,
            check_attempts: 0,
            created_at: now,
            updated_at: now,
        };

        let file = self.uow.run(|tx| {
            let mut file = load_owned_file(tx, file_id, request.owner_id)?;
            if version_num <= high_water_mark(tx, &file)?
                || versions::number_taken(tx, file_id, version_num)?
            {
                return Err(VersionError::VersionConflict {
                    file_id: file_id.to_string(),
                    version_num,
                });
            }

            versions::save(tx, &version)?;
            file.name = name.to_string();
            file.max_version_num = version_num;
            file.mirror(&version);
            files::save(tx, &file)?;

            self.events.create(
                tx,
                &EventPayload::FileVersionCreated {
                    file_id: file.id.clone(),
                    version_id: version.id.clone(),
                    version_num,
                    storage_key: version.storage_key.clone(),
                },
            )?;
            Ok(file)
        })?;

        tracing::info!(
            file_id = %file.id,
            version_id = %version.id,
            version_num,
            "Created file version"
        );

        Ok(UploadTicket {
            file,
            version,
            upload,
        })
    }

    // ========================================================================
    // Version management
    // ========================================================================

    /// Point the file back at an older, ready version.
    pub fn restore_version(
        &self,
        file_id: &str,
        version_id: &str,
    ) -> Result<FileRecord, VersionError> {
        let file = self.uow.run(|tx| {
            let mut file =
                files::get(tx, file_id)?.ok_or_else(|| VersionError::FileNotFound(file_id.into()))?;
            let version = load_version_of(tx, file_id, version_id)?;
            if version.status != VersionStatus::Ready {
                return Err(VersionError::VersionNotReady(version_id.to_string()));
            }

            file.mirror(&version);
            files::save(tx, &file)?;
            self.events.create(
                tx,
                &EventPayload::FileVersionRestored {
                    file_id: file_id.to_string(),
                    version_id: version_id.to_string(),
                    version_num: version.version_num,
                },
            )?;
            Ok(file)
        })?;

        tracing::info!(file_id, version_id, version_num = file.version_num, "Restored version");
        Ok(file)
    }

    /// Remove a non-current, settled version.
    ///
    /// The row goes first; stored bytes are removed after commit and failures
    /// there only leave orphaned objects behind. An orphan is never picked up
    /// by a later version because version numbers, and with them storage
    /// keys, are not reused (see [`FileRecord::max_version_num`]).
    pub async fn delete_version(
        &self,
        file_id: &str,
        version_id: &str,
    ) -> Result<FileVersionRecord, VersionError> {
        let version = self.uow.run(|tx| {
            let file =
                files::get(tx, file_id)?.ok_or_else(|| VersionError::FileNotFound(file_id.into()))?;
            let version = load_version_of(tx, file_id, version_id)?;
            if file.is_current(&version) {
                return Err(VersionError::CannotDeleteCurrent);
            }
            if version.status == VersionStatus::Processing {
                return Err(VersionError::VersionProcessing);
            }

            versions::delete(tx, version_id)?;
            self.events.create(
                tx,
                &EventPayload::FileVersionDeleted {
                    file_id: file_id.to_string(),
                    version_id: version_id.to_string(),
                    version_num: version.version_num,
                },
            )?;
            Ok(version)
        })?;

        self.remove_objects(std::slice::from_ref(&version)).await;
        tracing::info!(file_id, version_id, version_num = version.version_num, "Deleted version");
        Ok(version)
    }

    /// Attach a preview and move the version to `ready`.
    ///
    /// On a version that is already `ready` the key is only re-set (a no-op
    /// for the same key) and no second event is recorded, so redelivered
    /// messages are harmless.
    pub fn update_preview(
        &self,
        version_id: &str,
        preview_key: &str,
    ) -> Result<FileVersionRecord, VersionError> {
        self.uow.run(|tx| {
            let mut version = load_version(tx, version_id)?;
            if version.status == VersionStatus::Ready {
                if version.preview_key.as_deref() != Some(preview_key) {
                    version.preview_key = Some(preview_key.to_string());
                    version.updated_at = Utc::now();
                    versions::save(tx, &version)?;
                    mirror_if_current(tx, &version)?;
                    tracing::info!(version_id, preview_key, "Replaced preview of ready version");
                }
                return Ok(version);
            }

            version.status = version.status.transition(VersionStatus::Ready)?;
            version.preview_key = Some(preview_key.to_string());
            version.updated_at = Utc::now();
            versions::save(tx, &version)?;
            mirror_if_current(tx, &version)?;

            self.events.create(
                tx,
                &EventPayload::FileVersionReady {
                    file_id: version.file_id.clone(),
                    version_id: version.id.clone(),
                    preview_key: preview_key.to_string(),
                },
            )?;

            tracing::info!(version_id, preview_key, "Version ready");
            Ok(version)
        })
    }

    /// Record that the bytes of a `processing` version reached storage.
    pub fn mark_uploaded(&self, version_id: &str) -> Result<FileVersionRecord, VersionError> {
        self.uow.run(|tx| {
            let mut version = load_version(tx, version_id)?;
            version.status = version.status.transition(VersionStatus::Uploaded)?;
            version.updated_at = Utc::now();
            versions::save(tx, &version)?;
            mirror_if_current(tx, &version)?;

            self.events.create(
                tx,
                &EventPayload::FileVersionUploaded {
                    file_id: version.file_id.clone(),
                    version_id: version.id.clone(),
                    version_num: version.version_num,
                    storage_key: version.storage_key.clone(),
                },
            )?;

            tracing::info!(version_id, file_id = %version.file_id, "Version uploaded");
            Ok(version)
        })
    }

    pub fn mark_failed(
        &self,
        version_id: &str,
        reason: &str,
    ) -> Result<FileVersionRecord, VersionError> {
        self.uow.run(|tx| {
            let mut version = load_version(tx, version_id)?;
            version.status = version.status.transition(VersionStatus::Failed)?;
            version.updated_at = Utc::now();
            versions::save(tx, &version)?;
            mirror_if_current(tx, &version)?;

            self.events.create(
                tx,
                &EventPayload::FileVersionFailed {
                    file_id: version.file_id.clone(),
                    version_id: version.id.clone(),
                    reason: reason.to_string(),
                },
            )?;

            tracing::warn!(version_id, file_id = %version.file_id, reason, "Version failed");
            Ok(version)
        })
    }

    /// Count one storage check that found no bytes. Returns the new total, or
    /// `None` when the version has left `processing` in the meantime.
    pub fn record_missing_check(&self, version_id: &str) -> Result<Option<u32>, VersionError> {
        self.uow.run(|tx| {
            let mut version = load_version(tx, version_id)?;
            if version.status != VersionStatus::Processing {
                return Ok(None);
            }
            version.check_attempts += 1;
            versions::save(tx, &version)?;
            Ok(Some(version.check_attempts))
        })
    }

    // ========================================================================
    // File management
    // ========================================================================

    pub fn rename_file(
        &self,
        file_id: &str,
        owner_id: &str,
        name: &str,
    ) -> Result<FileRecord, VersionError> {
        let name = FileName::parse(name)?;
        self.uow.run(|tx| {
            let mut file = load_owned_file(tx, file_id, owner_id)?;
            if file.name == name.as_str() {
                return Ok(file);
            }

            let old_name = std::mem::replace(&mut file.name, name.to_string());
            file.updated_at = Utc::now();
            files::save(tx, &file)?;
            self.events.create(
                tx,
                &EventPayload::FileRenamed {
                    file_id: file.id.clone(),
                    owner_id: file.owner_id.clone(),
                    old_name,
                    new_name: file.name.clone(),
                },
            )?;
            Ok(file)
        })
    }

    /// Delete a file with every version, then clean up their objects.
    pub async fn delete_file(&self, file_id: &str, owner_id: &str) -> Result<u32, VersionError> {
        let removed = self.uow.run(|tx| {
            let file = load_owned_file(tx, file_id, owner_id)?;
            let all = versions::list_by_file(tx, file_id)?;
            for version in &all {
                versions::delete(tx, &version.id)?;
            }
            files::delete(tx, file_id)?;

            self.events.create(
                tx,
                &EventPayload::FileDeleted {
                    file_id: file.id.clone(),
                    owner_id: file.owner_id.clone(),
                    versions: all.len() as u32,
                },
            )?;
            Ok::<_, VersionError>(all)
        })?;

        self.remove_objects(&removed).await;
        tracing::info!(file_id, versions = removed.len(), "Deleted file");
        Ok(removed.len() as u32)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_file(&self, file_id: &str, owner_id: &str) -> Result<FileRecord, VersionError> {
        let snapshot = self.uow.db().read()?;
        load_owned_file(&snapshot, file_id, owner_id)
    }

    /// Files of one owner, most recently updated first.
    pub fn list_files(&self, owner_id: &str) -> Result<Vec<FileRecord>, VersionError> {
        let mut out = files::list_by_owner(&self.uow.db().read()?, owner_id)?;
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    pub fn get_version(&self, version_id: &str) -> Result<FileVersionRecord, VersionError> {
        load_version(&self.uow.db().read()?, version_id)
    }

    pub fn list_versions(
        &self,
        file_id: &str,
        owner_id: &str,
    ) -> Result<Vec<FileVersionRecord>, VersionError> {
        let snapshot = self.uow.db().read()?;
        load_owned_file(&snapshot, file_id, owner_id)?;
        Ok(versions::list_by_file(&snapshot, file_id)?)
    }

    /// One past the highest version number ever allocated for the file,
    /// including numbers of versions deleted since.
    pub fn next_version_num(&self, file_id: &str) -> Result<u32, VersionError> {
        let snapshot = self.uow.db().read()?;
        let file = files::get(&snapshot, file_id)?
            .ok_or_else(|| VersionError::FileNotFound(file_id.to_string()))?;
        Ok(high_water_mark(&snapshot, &file)? + 1)
    }

    /// Versions still waiting for their bytes, oldest first.
    pub fn processing_versions(&self) -> Result<Vec<FileVersionRecord>, VersionError> {
        let mut out =
            versions::list_by_status(&self.uow.db().read()?, VersionStatus::Processing)?;
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    /// Signed links to the current version's bytes and preview.
    pub async fn download_urls(
        &self,
        file_id: &str,
        owner_id: &str,
    ) -> Result<DownloadLinks, VersionError> {
        let file = self.get_file(file_id, owner_id)?;
        let version = {
            let snapshot = self.uow.db().read()?;
            versions::get_by_number(&snapshot, file_id, file.version_num)?
                .ok_or_else(|| VersionError::VersionNotFound(format!("{file_id}/v{}", file.version_num)))?
        };

        match version.status {
            VersionStatus::Processing => return Err(VersionError::VersionProcessing),
            VersionStatus::Failed => return Err(VersionError::VersionNotReady(version.id)),
            VersionStatus::Uploaded | VersionStatus::Ready => {}
        }

        let content = self
            .store
            .download_url(&version.storage_key, self.download_url_ttl)
            .await?;
        let preview = match version.preview_key.as_deref() {
            Some(key) => Some(self.store.download_url(key, self.download_url_ttl).await?),
            None => None,
        };

        Ok(DownloadLinks {
            file,
            content,
            preview,
        })
    }

    /// Best-effort removal of version bytes and owned previews.
    async fn remove_objects(&self, removed: &[FileVersionRecord]) {
        for version in removed {
            let owned = keys::owned_preview(version.preview_key.as_deref());
            for key in std::iter::once(version.storage_key.as_str()).chain(owned) {
                if let Err(e) = self.store.delete(key).await {
                    tracing::warn!(
                        version_id = %version.id,
                        key,
                        error = %e,
                        "Failed to delete stored object, leaving it orphaned"
                    );
                }
            }
        }
    }
}

fn load_owned_file<R: crate::storage::Reader>(
    r: &R,
    file_id: &str,
    owner_id: &str,
) -> Result<FileRecord, VersionError> {
    match files::get(r, file_id)? {
        Some(file) if file.owner_id == owner_id => Ok(file),
        _ => Err(VersionError::FileNotFound(file_id.to_string())),
    }
}

fn load_version<R: crate::storage::Reader>(
    r: &R,
    version_id: &str,
) -> Result<FileVersionRecord, VersionError> {
    versions::get(r, version_id)?.ok_or_else(|| VersionError::VersionNotFound(version_id.into()))
}

fn load_version_of<R: crate::storage::Reader>(
    r: &R,
    file_id: &str,
    version_id: &str,
) -> Result<FileVersionRecord, VersionError> {
    match versions::get(r, version_id)? {
        Some(version) if version.file_id == file_id => Ok(version),
        _ => Err(VersionError::VersionNotFound(version_id.to_string())),
    }
}

/// Highest number the file has used. Records written before the mark existed
/// fall back to the highest stored version.
fn high_water_mark<R: crate::storage::Reader>(
    r: &R,
    file: &FileRecord,
) -> Result<u32, VersionError> {
    Ok(file.max_version_num.max(versions::latest_number(r, &file.id)?))
}

/// Keep the file's denormalized fields in step with its current version.
fn mirror_if_current(tx: &Transaction, version: &FileVersionRecord) -> Result<(), VersionError> {
    if let Some(mut file) = files::get(tx, &version.file_id)? {
        if file.is_current(version) {
            file.mirror(version);
            files::save(tx, &file)?;
        }
    }
    Ok(())
}
