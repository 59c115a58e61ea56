use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use serde_json::json;

/// Opaque session identifier taken from the `X-Session-Id` header.
///
/// Token issuance and validation live outside this service; the broker only
/// needs a stable identifier to scope seat locks to.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_id = parts
            .headers
            .get("X-Session-Id")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match session_id {
            Some(session_id) => Ok(SessionId(session_id.to_string())),
            None => Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing X-Session-Id" })),
            )),
        }
    }
}
