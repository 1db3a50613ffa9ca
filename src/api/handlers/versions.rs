use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use super::files::{file_to_response, ticket_to_response, version_to_response};
use super::files::{FileResponse, UploadResponse, VersionResponse};
use crate::api::identity::Caller;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::versioning::{UploadRequest, VersionError};
use crate::AppState;

/// Attempts at picking a free version number when the client lets us choose.
const NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Deserialize)]
pub struct CreateVersionRequest {
    pub name: String,
    pub byte_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Explicit number; omitted means the next free one.
    #[serde(default)]
    pub version_num: Option<u32>,
}

pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(file_id): Path<String>,
) -> Result<Json<JSend<Vec<VersionResponse>>>, ApiError> {
    let versions = state.versions.list_versions(&file_id, &caller.user_id)?;
    Ok(JSend::success(
        versions.iter().map(version_to_response).collect(),
    ))
}

pub async fn create_version(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(file_id): Path<String>,
    AppJson(req): AppJson<CreateVersionRequest>,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let request = UploadRequest {
        owner_id: &caller.user_id,
        session_id: &caller.session_id,
        name: &req.name,
        byte_size: req.byte_size,
        mime_type: req.mime_type.as_deref(),
    };

    if let Some(version_num) = req.version_num {
        let ticket = state
            .versions
            .upload_new_version(&file_id, version_num, request)
            .await?;
        return Ok(JSend::success(ticket_to_response(ticket)));
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let version_num = state.versions.next_version_num(&file_id)?;
        match state
            .versions
            .upload_new_version(&file_id, version_num, request.clone())
            .await
        {
            Ok(ticket) => return Ok(JSend::success(ticket_to_response(ticket))),
            Err(VersionError::VersionConflict { .. }) if attempt < NUMBER_ATTEMPTS => {
                tracing::debug!(file_id = %file_id, version_num, "Version number taken, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub async fn restore_version(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((file_id, version_id)): Path<(String, String)>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    state.versions.get_file(&file_id, &caller.user_id)?;
    let file = state.versions.restore_version(&file_id, &version_id)?;
    Ok(JSend::success(file_to_response(&file)))
}

pub async fn delete_version(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path((file_id, version_id)): Path<(String, String)>,
) -> Result<Json<JSend<VersionResponse>>, ApiError> {
    state.versions.get_file(&file_id, &caller.user_id)?;
    let version = state.versions.delete_version(&file_id, &version_id).await?;
    Ok(JSend::success(version_to_response(&version)))
}
