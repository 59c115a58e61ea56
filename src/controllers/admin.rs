use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::services::reconcile::ReconcileError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/internal/reconciliation/{evento_id}",
            post(run_reconciliation),
        )
        .route("/internal/reconciliation/audit", get(audit_tail))
        .route("/internal/retry/stats", get(retry_stats))
}

#[derive(Debug, Deserialize)]
struct ReconcileParams {
    #[serde(rename = "dryRun", default)]
    dry_run: Option<bool>,
    #[serde(default)]
    apply: Option<bool>,
}

// POST /internal/reconciliation/{evento_id}?dryRun=true&apply=false
async fn run_reconciliation(
    State(state): State<Arc<AppState>>,
    Path(evento_id): Path<String>,
    Query(params): Query<ReconcileParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let dry_run = params.dry_run.unwrap_or(true);
    let apply = params.apply.unwrap_or(false);

    let report = state
        .reconciler
        .reconcile(&evento_id, dry_run, apply)
        .await
        .map_err(|e| match e {
            ReconcileError::Upstream(e) => {
                tracing::warn!(evento_id, "Reconciliation upstream fetch failed: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "upstream_unavailable", "detail": e.to_string() })),
                )
            }
            ReconcileError::Storage(e) => {
                tracing::error!(evento_id, "Reconciliation storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal" })),
                )
            }
        })?;

    Ok((StatusCode::OK, Json(report)))
}

#[derive(Debug, Deserialize)]
struct AuditParams {
    limit: Option<usize>,
}

// GET /internal/reconciliation/audit?limit=50
async fn audit_tail(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let entries = state.reconciler.audit_tail(limit).await.map_err(|e| {
        tracing::error!("Failed to read audit log: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal" })),
        )
    })?;
    Ok((StatusCode::OK, Json(entries)))
}

// GET /internal/retry/stats
async fn retry_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let pending = state.notifier.retry_queue_len().await.map_err(|e| {
        tracing::error!("Failed to read retry queue length: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal" })),
        )
    })?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "pending": pending,
            "circuit_breaker": format!("{:?}", state.upstream.breaker_state()),
        })),
    ))
}
