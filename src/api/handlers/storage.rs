use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery};
use crate::object_store::signing::SignatureError;
use crate::object_store::{LocalStore, ObjectStore, ObjectStoreError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub expires: i64,
    pub signature: String,
}

/// Receive bytes for a pre-signed upload URL.
/// Route: PUT /storage/*key
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(params): AppQuery<SignedParams>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let store = authorize(&state, "PUT", &key, &params)?;
    let size = body.len();

    store.put(&key, body).await.map_err(storage_error)?;

    tracing::debug!(key = %key, size, "Stored object via signed URL");
    Ok(StatusCode::OK)
}

/// Serve bytes for a pre-signed download URL.
/// Route: GET /storage/*key
pub async fn get_object(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    AppQuery(params): AppQuery<SignedParams>,
) -> Result<Response, ApiError> {
    let store = authorize(&state, "GET", &key, &params)?;
    let data = store.get(&key).await.map_err(storage_error)?;
    let length = data.len() as u64;

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    let mime_type = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .to_string();
    headers.insert(
        header::CONTENT_TYPE,
        mime_type
            .parse()
            .unwrap_or(header::HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, header::HeaderValue::from(length));

    let filename = key.rsplit('/').next().unwrap_or(&key);
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Version content under a key never changes
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("private, max-age=3600"),
    );

    Ok(response)
}

fn authorize<'a>(
    state: &'a AppState,
    method: &str,
    key: &str,
    params: &SignedParams,
) -> Result<&'a LocalStore, ApiError> {
    let store = state
        .local_store
        .as_deref()
        .ok_or_else(|| ApiError::not_found("Storage is not served by this instance"))?;

    store
        .signer()
        .verify(method, key, params.expires, &params.signature, Utc::now())
        .map_err(|e| match e {
            SignatureError::Expired => ApiError::forbidden("Signed URL has expired"),
            SignatureError::Malformed | SignatureError::Mismatch => {
                ApiError::forbidden("Invalid signature")
            }
        })?;

    Ok(store)
}

fn storage_error(e: ObjectStoreError) -> ApiError {
    match e {
        ObjectStoreError::NotFound(_) => ApiError::not_found("Object not found"),
        ObjectStoreError::InvalidKey(_) => ApiError::bad_request(e.to_string()),
        _ => ApiError::internal(format!("Storage error: {e}")),
    }
}
