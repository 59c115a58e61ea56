//! Detects and repairs divergence between the local seat cache and the
//! upstream authoritative system.
//!
//! Policy is last-write-wins on `updatedAt`; a record with a timestamp beats
//! one without, and when neither side carries a timestamp the upstream side
//! wins. Repairs go through each side's normal update channel, and every
//! applied repair leaves one entry in the append-only audit log.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::Seat;
use crate::services::store::SeatStateStore;
use crate::storage::{StorageBackend, StorageError};
use crate::upstream::{UpstreamClient, UpstreamError};

const AUDIT_LOG: &str = "reconciliation:applied";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Which copy of a diverged record is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Upstream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(rename = "seatId")]
    pub seat_id: String,
    pub local: Option<Seat>,
    pub upstream: Option<Seat>,
    pub winner: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRepair {
    pub id: Uuid,
    #[serde(rename = "seatId")]
    pub seat_id: String,
    pub winner: Side,
    pub payload: Seat,
    #[serde(rename = "appliedAt")]
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(rename = "eventoId")]
    pub evento_id: String,
    #[serde(rename = "diffCount")]
    pub diff_count: usize,
    pub diffs: Vec<Diff>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<AppliedRepair>,
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: SeatStateStore,
    upstream: UpstreamClient,
    backend: Arc<dyn StorageBackend>,
}

impl ReconciliationEngine {
    pub fn new(
        store: SeatStateStore,
        upstream: UpstreamClient,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            store,
            upstream,
            backend,
        }
    }

    /// Diff both sides of an event and, unless `dry_run`, apply the winning
    /// record of every diff to the losing side when `apply` is set.
    pub async fn reconcile(
        &self,
        evento_id: &str,
        dry_run: bool,
        apply: bool,
    ) -> Result<Report, ReconcileError> {
        let local = self.store.get_seats(evento_id).await?;
        let upstream = self.upstream.fetch_seats(evento_id).await?;

        let diffs = compute_diffs(&local, &upstream);
        info!(
            evento_id,
            diff_count = diffs.len(),
            dry_run,
            apply,
            "Reconciliation computed"
        );

        let mut applied = Vec::new();
        if apply && !dry_run {
            for diff in &diffs {
                if let Some(entry) = self.apply_diff(evento_id, diff).await {
                    applied.push(entry);
                }
            }
        }

        Ok(Report {
            evento_id: evento_id.to_string(),
            diff_count: diffs.len(),
            diffs,
            applied,
        })
    }

    /// Push the winner's record to the losing side. Returns the audit entry,
    /// or `None` when the winning side has no record to push.
    async fn apply_diff(&self, evento_id: &str, diff: &Diff) -> Option<AppliedRepair> {
        let payload = match diff.winner {
            Side::Local => diff.local.as_ref(),
            Side::Upstream => diff.upstream.as_ref(),
        };
        let Some(payload) = payload else {
            warn!(
                evento_id,
                seat_id = %diff.seat_id,
                "Winning side has no record, skipping repair"
            );
            return None;
        };

        let push_result = match diff.winner {
            Side::Local => self
                .upstream
                .push_seat_update(evento_id, payload)
                .await
                .map_err(|e| e.to_string()),
            Side::Upstream => self
                .store
                .upsert_with_timestamp(evento_id, payload.clone())
                .await
                .map_err(|e| e.to_string())
                .and_then(|outcome| {
                    if outcome.accepted() {
                        Ok(())
                    } else {
                        Err(format!("local store refused repair: {outcome:?}"))
                    }
                }),
        };

        if let Err(e) = &push_result {
            warn!(
                evento_id,
                seat_id = %diff.seat_id,
                "Failed to apply reconciliation repair: {}",
                e
            );
        }

        let entry = AppliedRepair {
            id: Uuid::new_v4(),
            seat_id: diff.seat_id.clone(),
            winner: diff.winner,
            payload: payload.clone(),
            applied_at: Utc::now(),
            error: push_result.err(),
        };

        // auditing must not block the apply loop
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = self.backend.log_append(AUDIT_LOG, &json).await {
                    warn!(seat_id = %entry.seat_id, "Failed to persist audit entry: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize audit entry: {}", e),
        }

        Some(entry)
    }

    /// Most recent audit entries, newest first.
    pub async fn audit_tail(&self, limit: usize) -> Result<Vec<AppliedRepair>, StorageError> {
        let raw = self.backend.log_tail(AUDIT_LOG, limit).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect())
    }
}

/// Union-compare both seat lists, producing one diff per unequal pair.
fn compute_diffs(local: &[Seat], upstream: &[Seat]) -> Vec<Diff> {
    let index = |seats: &[Seat]| -> BTreeMap<String, Seat> {
        seats
            .iter()
            .filter(|s| !s.seat_id.is_empty())
            .map(|s| (s.seat_id.clone(), s.clone()))
            .collect()
    };
    let local_by_seat = index(local);
    let upstream_by_seat = index(upstream);

    let mut seat_ids: Vec<&String> = local_by_seat.keys().collect();
    for seat_id in upstream_by_seat.keys() {
        if !local_by_seat.contains_key(seat_id) {
            seat_ids.push(seat_id);
        }
    }
    seat_ids.sort();

    seat_ids
        .into_iter()
        .filter_map(|seat_id| {
            let local = local_by_seat.get(seat_id);
            let upstream = upstream_by_seat.get(seat_id);
            if local == upstream {
                return None;
            }
            Some(Diff {
                seat_id: seat_id.clone(),
                winner: pick_winner(local, upstream),
                local: local.cloned(),
                upstream: upstream.cloned(),
            })
        })
        .collect()
}

/// Later `updatedAt` wins; a timestamped record beats an untimestamped one;
/// with no timestamps at all the upstream side wins.
fn pick_winner(local: Option<&Seat>, upstream: Option<&Seat>) -> Side {
    let local_ts = local.and_then(|s| s.updated_at);
    let upstream_ts = upstream.and_then(|s| s.updated_at);
    match (local_ts, upstream_ts) {
        (Some(l), Some(u)) => {
            if l > u {
                Side::Local
            } else {
                Side::Upstream
            }
        }
        (Some(_), None) => Side::Local,
        (None, Some(_)) => Side::Upstream,
        (None, None) => Side::Upstream,
    }
}
