use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::middleware::SessionId;
use crate::services::purchase::{BlockOutcome, BuyerInfo, PurchaseOutcome};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/asientos/{evento_id}", get(get_asientos))
        .route("/asientos/{evento_id}/{seat_id}/block", post(block_seat))
        .route("/asientos/{evento_id}/{seat_id}/unlock", post(unlock_seat))
        .route("/asientos/{evento_id}/{seat_id}/purchase", post(purchase_seat))
        .route("/asientos/{evento_id}/{seat_id}/state", get(seat_state))
}

fn internal_error<E: std::fmt::Display>(e: E) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("Storage error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal" })),
    )
}

// GET /asientos/{evento_id}
async fn get_asientos(
    State(state): State<Arc<AppState>>,
    Path(evento_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let seats = state
        .coordinator
        .seats(&evento_id)
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::OK, Json(seats)))
}

// POST /asientos/{evento_id}/{seat_id}/block
async fn block_seat(
    State(state): State<Arc<AppState>>,
    Path((evento_id, seat_id)): Path<(String, String)>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state
        .coordinator
        .block(&evento_id, &seat_id, &session_id)
        .await
        .map_err(internal_error)?;

    let response = match outcome {
        BlockOutcome::Locked { owner } | BlockOutcome::AlreadyLockedByMe { owner } => (
            StatusCode::OK,
            Json(json!({ "result": "locked", "owner": owner })),
        ),
        BlockOutcome::LockedByOther { owner } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "LOCKED_BY_OTHER", "owner": owner })),
        ),
        BlockOutcome::Sold => (StatusCode::CONFLICT, Json(json!({ "error": "SOLD" }))),
    };
    Ok(response)
}

// POST /asientos/{evento_id}/{seat_id}/unlock
async fn unlock_seat(
    State(state): State<Arc<AppState>>,
    Path((evento_id, seat_id)): Path<(String, String)>,
    SessionId(session_id): SessionId,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let unlocked = state
        .coordinator
        .unlock(&evento_id, &seat_id, &session_id)
        .await
        .map_err(internal_error)?;

    let response = if unlocked {
        (StatusCode::OK, Json(json!({ "result": "unlocked" })))
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "NOT_OWNER_OR_NOT_LOCKED" })),
        )
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
struct PurchaseRequest {
    persona: Option<String>,
}

// POST /asientos/{evento_id}/{seat_id}/purchase
async fn purchase_seat(
    State(state): State<Arc<AppState>>,
    Path((evento_id, seat_id)): Path<(String, String)>,
    SessionId(session_id): SessionId,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    // the buyer payload is optional; an empty body means an anonymous sale
    let persona = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<PurchaseRequest>(&body) {
            Ok(req) => req.persona,
            Err(_) => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid request body" })),
                ))
            }
        }
    };
    let persona = persona.unwrap_or_else(|| "Sin nombre".to_string());

    let outcome = state
        .coordinator
        .purchase(&evento_id, &seat_id, &session_id, BuyerInfo { persona })
        .await
        .map_err(internal_error)?;

    let response = match outcome {
        PurchaseOutcome::Purchased => {
            (StatusCode::OK, Json(json!({ "result": "purchased" })))
        }
        PurchaseOutcome::SeatNotBlocked => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "SEAT_NOT_BLOCKED" })),
        ),
        PurchaseOutcome::BlockedByOther { owner } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "BLOCKED_BY_OTHER", "owner": owner })),
        ),
        PurchaseOutcome::SeatNotAvailable => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "SEAT_NOT_AVAILABLE" })),
        ),
    };
    Ok(response)
}

// GET /asientos/{evento_id}/{seat_id}/state
async fn seat_state(
    State(state): State<Arc<AppState>>,
    Path((evento_id, seat_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // session header optional here: with it we can answer "blocked by me"
    let session_id = headers
        .get("X-Session-Id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty());

    let sold = state.locks.is_sold(&evento_id, &seat_id);
    let owner = state.locks.get_lock_owner(&evento_id, &seat_id);

    let seat_state = if sold {
        "VENDIDO"
    } else {
        match (&owner, session_id) {
            (None, _) => "LIBRE",
            (Some(owner), Some(session)) if owner == session => "BLOQUEADO_POR_MI",
            (Some(_), _) => "BLOQUEADO_POR_OTRO",
        }
    };

    let mut body = json!({ "state": seat_state });
    if let Some(owner) = owner {
        body["owner"] = json!(owner);
    }
    (StatusCode::OK, Json(body))
}
