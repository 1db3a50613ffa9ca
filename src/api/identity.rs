use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::response::ApiError;

pub const USER_HEADER: &str = "x-user-id";
pub const SESSION_HEADER: &str = "x-session-id";

/// The authenticated caller, as asserted by the gateway in front of us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub session_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let user_id = header(&parts.headers, USER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing X-User-Id header"))?;
        // User ids become the first segment of storage keys
        if user_id.contains('/') || user_id == "." || user_id == ".." {
            return Err(ApiError::bad_request("Invalid X-User-Id header"));
        }
        let session_id = header(&parts.headers, SESSION_HEADER).unwrap_or_else(|| "none".into());

        Ok(Caller {
            user_id,
            session_id,
        })
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
