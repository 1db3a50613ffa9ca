use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::identity::Caller;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend, JSendPaginated, Pagination};
use crate::object_store::PresignedUrl;
use crate::state_machine::VersionStatus;
use crate::storage::models::{FileRecord, FileType, FileVersionRecord};
use crate::versioning::{UploadRequest, UploadTicket};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub byte_size: u64,
    pub created_at: String,
    pub file_type: FileType,
    pub id: String,
    pub mime_type: String,
    pub name: String,
    pub owner_id: String,
    pub preview_key: Option<String>,
    pub status: VersionStatus,
    pub updated_at: String,
    pub version_num: u32,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub byte_size: u64,
    pub created_at: String,
    pub file_id: String,
    pub id: String,
    pub mime_type: String,
    pub preview_key: Option<String>,
    pub status: VersionStatus,
    pub storage_key: String,
    pub updated_at: String,
    pub version_num: u32,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file: FileResponse,
    pub version: VersionResponse,
    pub upload: PresignedUrl,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub file: FileResponse,
    pub content: PresignedUrl,
    pub preview: Option<PresignedUrl>,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub versions_deleted: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateFileRequest {
    pub name: String,
    pub byte_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub status: Option<VersionStatus>,
}

fn default_limit() -> u32 {
    20
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<CreateFileRequest>,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let ticket = state
        .versions
        .upload_new_file(UploadRequest {
            owner_id: &caller.user_id,
            session_id: &caller.session_id,
            name: &req.name,
            byte_size: req.byte_size,
            mime_type: req.mime_type.as_deref(),
        })
        .await?;

    Ok(JSend::success(ticket_to_response(ticket)))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state.versions.get_file(&id, &caller.user_id)?;
    Ok(JSend::success(file_to_response(&file)))
}

pub async fn rename_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    AppJson(req): AppJson<RenameFileRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state.versions.rename_file(&id, &caller.user_id, &req.name)?;
    tracing::debug!(file_id = %id, "Renamed file");
    Ok(JSend::success(file_to_response(&file)))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<DeleteFileResponse>>, ApiError> {
    let versions_deleted = state.versions.delete_file(&id, &caller.user_id).await?;
    Ok(JSend::success(DeleteFileResponse { versions_deleted }))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSendPaginated<FileResponse>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let files: Vec<FileRecord> = state
        .versions
        .list_files(&caller.user_id)?
        .into_iter()
        .filter(|f| params.status.map_or(true, |s| f.status == s))
        .collect();

    let total = files.len() as u64;
    let items: Vec<FileResponse> = files
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(file_to_response)
        .collect();

    Ok(JSend::page(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

pub async fn download_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<DownloadResponse>>, ApiError> {
    let links = state.versions.download_urls(&id, &caller.user_id).await?;
    Ok(JSend::success(DownloadResponse {
        file: file_to_response(&links.file),
        content: links.content,
        preview: links.preview,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

pub(super) fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        byte_size: file.byte_size,
        created_at: file.created_at.to_rfc3339(),
        file_type: file.file_type,
        id: file.id.clone(),
        mime_type: file.mime_type.clone(),
        name: file.name.clone(),
        owner_id: file.owner_id.clone(),
        preview_key: file.preview_key.clone(),
        status: file.status,
        updated_at: file.updated_at.to_rfc3339(),
        version_num: file.version_num,
    }
}

pub(super) fn version_to_response(version: &FileVersionRecord) -> VersionResponse {
    VersionResponse {
        byte_size: version.byte_size,
        created_at: version.created_at.to_rfc3339(),
        file_id: version.file_id.clone(),
        id: version.id.clone(),
        mime_type: version.mime_type.clone(),
        preview_key: version.preview_key.clone(),
        status: version.status,
        storage_key: version.storage_key.clone(),
        updated_at: version.updated_at.to_rfc3339(),
        version_num: version.version_num,
    }
}

pub(super) fn ticket_to_response(ticket: UploadTicket) -> UploadResponse {
    UploadResponse {
        file: file_to_response(&ticket.file),
        version: version_to_response(&ticket.version),
        upload: ticket.upload,
    }
}
