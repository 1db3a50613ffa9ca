//! JSend response envelopes and the error type every handler returns.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::outbox::OutboxError;
use crate::versioning::VersionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
    Success,
    Fail,
    Error,
}

/// `{"status": "success", "data": ...}`
#[derive(Debug, Serialize, Deserialize)]
pub struct JSend<T> {
    pub status: JSendStatus,
    pub data: T,
}

impl<T: Serialize> JSend<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(JSend {
            status: JSendStatus::Success,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

pub type JSendPaginated<T> = JSend<Page<T>>;

impl<T: Serialize> JSend<Page<T>> {
    pub fn page(items: Vec<T>, pagination: Pagination) -> Json<Self> {
        JSend::success(Page { items, pagination })
    }
}

/// Client mistakes render as JSend `fail` with the message under `data`;
/// server faults render as JSend `error` with a top-level message.
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Fail(code, message) => (
                code,
                Json(serde_json::json!({
                    "status": JSendStatus::Fail,
                    "data": { "message": message },
                })),
            )
                .into_response(),
            ApiError::Error(code, message) => (
                code,
                Json(serde_json::json!({
                    "status": JSendStatus::Error,
                    "message": message,
                })),
            )
                .into_response(),
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::UNAUTHORIZED, message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::FORBIDDEN, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::NOT_FOUND, message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::PAYLOAD_TOO_LARGE, message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::CONFLICT, message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::SERVICE_UNAVAILABLE, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl From<VersionError> for ApiError {
    fn from(e: VersionError) -> Self {
        match e {
            VersionError::FileNotFound(_) => ApiError::not_found("File not found"),
            VersionError::VersionNotFound(_) => ApiError::not_found("File version not found"),
            VersionError::CannotDeleteCurrent
            | VersionError::VersionProcessing
            | VersionError::VersionNotReady(_)
            | VersionError::VersionConflict { .. }
            | VersionError::InvalidTransition(_) => ApiError::conflict(e.to_string()),
            VersionError::SizeExceeded { .. } => ApiError::payload_too_large(e.to_string()),
            VersionError::Validation(message) => ApiError::bad_request(message),
            VersionError::Storage(_) => {
                tracing::error!(error = %e, "Object storage request failed");
                ApiError::unavailable("Object storage unavailable")
            }
            VersionError::Database(_) | VersionError::Outbox(_) => {
                tracing::error!(error = %e, "Request failed");
                ApiError::internal(e.to_string())
            }
        }
    }
}

impl From<OutboxError> for ApiError {
    fn from(e: OutboxError) -> Self {
        match e {
            OutboxError::NotFound(_) => ApiError::not_found("Event not found"),
            OutboxError::NotParked(_) => ApiError::conflict(e.to_string()),
            _ => {
                tracing::error!(error = %e, "Outbox request failed");
                ApiError::internal(e.to_string())
            }
        }
    }
}

/// Drop-in replacement for `axum::Json` that rejects with JSend errors.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = match rejection {
                    JsonRejection::JsonDataError(err) => {
                        format!("Invalid request body: {}", err.body_text())
                    }
                    JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".into(),
                    JsonRejection::MissingJsonContentType(_) => {
                        "Missing Content-Type: application/json header".into()
                    }
                    _ => "Failed to read request body".into(),
                };
                Err(ApiError::bad_request(message))
            }
        }
    }
}

/// Drop-in replacement for `axum::extract::Query` that rejects with JSend errors.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, ApiError> {
        let query = parts.uri.query().unwrap_or_default();
        serde_qs::from_str(query)
            .map(AppQuery)
            .map_err(|e| ApiError::bad_request(friendly_query_error(&e.to_string())))
    }
}

/// Translate serde/serde_qs error messages into human-friendly descriptions.
fn friendly_query_error(raw: &str) -> String {
    let cleaned = raw
        .replace("u32", "non-negative integer")
        .replace("u64", "non-negative integer")
        .replace("i32", "integer")
        .replace("i64", "integer");

    format!("Invalid query parameter: {cleaned}")
}
