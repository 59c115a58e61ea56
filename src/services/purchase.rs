//! Orchestrates block → persist → confirm transitions.
//!
//! Local durability comes first: the lock manager and the seat state store
//! decide every outcome, and the upstream mirror is strictly best-effort — a
//! slow or unavailable upstream never rolls back a local commit.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::coords::SeatCoord;
use crate::models::{Buyer, Seat, SeatStatus};
use crate::services::locks::{BlockResult, LockPurchaseResult, SeatLockManager};
use crate::services::notify::{NotificationQueue, SeatChangeNotification};
use crate::services::store::SeatStateStore;
use crate::storage::StorageError;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Locked { owner: String },
    AlreadyLockedByMe { owner: String },
    LockedByOther { owner: String },
    Sold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Purchased,
    /// No active block exists for this seat.
    SeatNotBlocked,
    /// The active block belongs to a different session.
    BlockedByOther { owner: String },
    /// Already sold.
    SeatNotAvailable,
}

#[derive(Debug, Clone)]
pub struct BuyerInfo {
    pub persona: String,
}

#[derive(Clone)]
pub struct PurchaseCoordinator {
    locks: Arc<SeatLockManager>,
    store: SeatStateStore,
    upstream: UpstreamClient,
    notifier: NotificationQueue,
    precio_venta: f64,
}

impl PurchaseCoordinator {
    pub fn new(
        locks: Arc<SeatLockManager>,
        store: SeatStateStore,
        upstream: UpstreamClient,
        notifier: NotificationQueue,
        precio_venta: f64,
    ) -> Self {
        Self {
            locks,
            store,
            upstream,
            notifier,
            precio_venta,
        }
    }

    /// Take an exclusive block on a seat for `session_id` and persist it.
    pub async fn block(
        &self,
        evento_id: &str,
        seat_id: &str,
        session_id: &str,
    ) -> Result<BlockOutcome, StorageError> {
        // the persisted record knows about sales the in-memory table may have
        // missed (restarts, reconciliation repairs)
        if let Some(seat) = self.store.get_seat(evento_id, seat_id).await? {
            if seat.estado == SeatStatus::Vendido {
                return Ok(BlockOutcome::Sold);
            }
        }

        let result = self.locks.try_block(evento_id, seat_id, session_id);
        let outcome = match result {
            BlockResult::Sold => return Ok(BlockOutcome::Sold),
            BlockResult::LockedByOther { owner } => {
                return Ok(BlockOutcome::LockedByOther { owner })
            }
            BlockResult::Success { owner } => BlockOutcome::Locked { owner },
            BlockResult::AlreadyLockedByMe { owner } => BlockOutcome::AlreadyLockedByMe { owner },
        };

        let now = Utc::now();
        self.store
            .upsert_with_timestamp(evento_id, Seat::bloqueado(seat_id, session_id, now))
            .await?;
        info!(evento_id, seat_id, session_id, "Seat blocked");

        self.mirror_block(evento_id, seat_id).await;
        Ok(outcome)
    }

    /// Release a block if `session_id` owns it; persists the free state.
    pub async fn unlock(
        &self,
        evento_id: &str,
        seat_id: &str,
        session_id: &str,
    ) -> Result<bool, StorageError> {
        if !self.locks.unlock_if_owner(evento_id, seat_id, session_id) {
            return Ok(false);
        }
        let now = Utc::now();
        self.store
            .upsert_with_timestamp(evento_id, Seat::libre(seat_id, now))
            .await?;
        info!(evento_id, seat_id, session_id, "Seat unlocked");
        Ok(true)
    }

    /// Confirm the sale of a blocked seat.
    ///
    /// Ownership is re-validated against the persisted record, not only the
    /// in-memory lock table: after a restart the table is empty, but a stored
    /// BLOQUEADO record with a future expiry is still an authoritative claim.
    pub async fn purchase(
        &self,
        evento_id: &str,
        seat_id: &str,
        session_id: &str,
        buyer: BuyerInfo,
    ) -> Result<PurchaseOutcome, StorageError> {
        let now = Utc::now();

        let seat = self.store.get_seat(evento_id, seat_id).await?;
        match &seat {
            Some(seat) if seat.estado == SeatStatus::Vendido => {
                return Ok(PurchaseOutcome::SeatNotAvailable);
            }
            Some(seat) if seat.lock_active(now) => {
                let holder = seat.holder.as_deref().unwrap_or_default();
                if holder != session_id {
                    return Ok(PurchaseOutcome::BlockedByOther {
                        owner: holder.to_string(),
                    });
                }
            }
            // Libre, expired block, or never materialized: nothing to confirm
            _ => return Ok(PurchaseOutcome::SeatNotBlocked),
        }

        match self.locks.purchase(evento_id, seat_id, session_id) {
            LockPurchaseResult::Sold => return Ok(PurchaseOutcome::SeatNotAvailable),
            LockPurchaseResult::LockedByOther { owner } => {
                return Ok(PurchaseOutcome::BlockedByOther { owner })
            }
            LockPurchaseResult::Success => {}
        }

        let comprador = Buyer {
            persona: buyer.persona,
            fecha_venta: now,
        };
        self.store
            .upsert_with_timestamp(evento_id, Seat::vendido(seat_id, comprador, now))
            .await?;
        info!(evento_id, seat_id, session_id, "Seat sold");

        self.mirror_sale(evento_id, seat_id).await;

        let notification = SeatChangeNotification {
            evento_id: evento_id.to_string(),
            seat_id: seat_id.to_string(),
            status: SeatStatus::Vendido,
            holder: None,
            updated_at: now,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            // the sale is committed; delivery is the retry queue's problem
            warn!(evento_id, seat_id, "Failed to enqueue sale notification: {}", e);
        }

        Ok(PurchaseOutcome::Purchased)
    }

    /// Seat list for an event, enriched with live lock state.
    pub async fn seats(&self, evento_id: &str) -> Result<Vec<Seat>, StorageError> {
        let mut seats = self.store.get_seats(evento_id).await?;
        for seat in &mut seats {
            if self.locks.is_sold(evento_id, &seat.seat_id) {
                seat.estado = SeatStatus::Vendido;
                seat.holder = None;
                seat.expira = None;
            } else if let Some(owner) = self.locks.get_lock_owner(evento_id, &seat.seat_id) {
                seat.estado = SeatStatus::Bloqueado;
                seat.holder = Some(owner);
            }
        }
        Ok(seats)
    }

    async fn mirror_block(&self, evento_id: &str, seat_id: &str) {
        if !self.upstream.is_enabled() {
            return;
        }
        let Ok(coord) = seat_id.parse::<SeatCoord>() else {
            debug!(seat_id, "Seat id has no coordinates, skipping upstream mirror");
            return;
        };
        if let Err(e) = self.upstream.mirror_block(evento_id, coord).await {
            log_mirror_failure("block", evento_id, seat_id, &e);
        }
    }

    async fn mirror_sale(&self, evento_id: &str, seat_id: &str) {
        if !self.upstream.is_enabled() {
            return;
        }
        let Ok(coord) = seat_id.parse::<SeatCoord>() else {
            debug!(seat_id, "Seat id has no coordinates, skipping upstream mirror");
            return;
        };
        if let Err(e) = self
            .upstream
            .mirror_sale(evento_id, coord, self.precio_venta)
            .await
        {
            log_mirror_failure("sale", evento_id, seat_id, &e);
        }
    }
}

fn log_mirror_failure(
    operation: &str,
    evento_id: &str,
    seat_id: &str,
    error: &crate::upstream::UpstreamError,
) {
    if error.is_retryable() {
        warn!(
            evento_id,
            seat_id, "Best-effort {} mirror failed, reconciliation will repair: {}", operation, error
        );
    } else {
        warn!(
            evento_id,
            seat_id, "Upstream rejected {} mirror: {}", operation, error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, UpstreamConfig, WebhookConfig};
    use crate::storage::{MemoryStorage, StorageBackend};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TTL: Duration = Duration::from_secs(300);

    fn upstream(base_url: &str) -> UpstreamClient {
        UpstreamClient::from_config(
            &UpstreamConfig {
                base_url: base_url.to_string(),
                timeout_ms: 2000,
                bearer_token: None,
                precio_venta: 1000.0,
            },
            &CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
        )
    }

    fn coordinator_with(
        backend: Arc<MemoryStorage>,
        upstream_url: &str,
    ) -> (PurchaseCoordinator, Arc<SeatLockManager>) {
        let locks = Arc::new(SeatLockManager::new(TTL));
        let store = SeatStateStore::new(backend.clone(), TTL);
        let notifier = NotificationQueue::from_config(
            &WebhookConfig {
                url: String::new(),
                timeout_ms: 2000,
            },
            backend,
        );
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&locks),
            store,
            upstream(upstream_url),
            notifier,
            1000.0,
        );
        (coordinator, locks)
    }

    fn coordinator() -> (PurchaseCoordinator, Arc<SeatLockManager>) {
        coordinator_with(Arc::new(MemoryStorage::new()), "")
    }

    fn ana() -> BuyerInfo {
        BuyerInfo {
            persona: "Ana".into(),
        }
    }

    #[tokio::test]
    async fn block_purchase_scenario() {
        let (coordinator, _) = coordinator();

        assert_eq!(
            coordinator.block("1", "r2c5", "A").await.unwrap(),
            BlockOutcome::Locked { owner: "A".into() }
        );
        assert_eq!(
            coordinator.block("1", "r2c5", "B").await.unwrap(),
            BlockOutcome::LockedByOther { owner: "A".into() }
        );
        assert_eq!(
            coordinator.purchase("1", "r2c5", "B", ana()).await.unwrap(),
            PurchaseOutcome::BlockedByOther { owner: "A".into() }
        );
        assert_eq!(
            coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap(),
            PurchaseOutcome::Purchased
        );
        assert_eq!(
            coordinator.block("1", "r2c5", "C").await.unwrap(),
            BlockOutcome::Sold
        );

        let seats = coordinator.seats("1").await.unwrap();
        assert_eq!(seats.len(), 1);
        assert_eq!(seats[0].estado, SeatStatus::Vendido);
        assert_eq!(seats[0].comprador.as_ref().unwrap().persona, "Ana");
    }

    #[tokio::test]
    async fn block_persists_bloqueado_record() {
        let (coordinator, _) = coordinator();
        coordinator.block("1", "r2c5", "A").await.unwrap();

        let seats = coordinator.seats("1").await.unwrap();
        assert_eq!(seats[0].estado, SeatStatus::Bloqueado);
        assert_eq!(seats[0].holder.as_deref(), Some("A"));
        assert!(seats[0].expira.is_some());
    }

    #[tokio::test]
    async fn purchase_without_block_is_rejected() {
        let (coordinator, _) = coordinator();
        assert_eq!(
            coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap(),
            PurchaseOutcome::SeatNotBlocked
        );
    }

    #[tokio::test]
    async fn purchase_survives_lock_table_loss() {
        let backend = Arc::new(MemoryStorage::new());
        let (coordinator, _) = coordinator_with(backend.clone(), "");
        coordinator.block("1", "r2c5", "A").await.unwrap();

        // simulate a restart: same persisted state, fresh lock table
        let (restarted, _) = coordinator_with(backend, "");
        assert_eq!(
            restarted.purchase("1", "r2c5", "A", ana()).await.unwrap(),
            PurchaseOutcome::Purchased
        );
    }

    #[tokio::test]
    async fn purchase_after_restart_still_honors_other_owner() {
        let backend = Arc::new(MemoryStorage::new());
        let (coordinator, _) = coordinator_with(backend.clone(), "");
        coordinator.block("1", "r2c5", "A").await.unwrap();

        let (restarted, _) = coordinator_with(backend, "");
        assert_eq!(
            restarted.purchase("1", "r2c5", "B", ana()).await.unwrap(),
            PurchaseOutcome::BlockedByOther { owner: "A".into() }
        );
    }

    #[tokio::test]
    async fn unlock_returns_seat_to_libre() {
        let (coordinator, locks) = coordinator();
        coordinator.block("1", "r2c5", "A").await.unwrap();

        assert!(!coordinator.unlock("1", "r2c5", "B").await.unwrap());
        assert!(coordinator.unlock("1", "r2c5", "A").await.unwrap());
        assert_eq!(locks.get_lock_owner("1", "r2c5"), None);

        let seats = coordinator.seats("1").await.unwrap();
        assert_eq!(seats[0].estado, SeatStatus::Libre);
        assert_eq!(seats[0].holder, None);

        // the seat is immediately blockable again
        assert_eq!(
            coordinator.block("1", "r2c5", "B").await.unwrap(),
            BlockOutcome::Locked { owner: "B".into() }
        );
    }

    #[tokio::test]
    async fn sold_seat_never_downgrades() {
        let (coordinator, _) = coordinator();
        coordinator.block("1", "r2c5", "A").await.unwrap();
        coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap();

        assert_eq!(
            coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap(),
            PurchaseOutcome::SeatNotAvailable
        );
        assert!(!coordinator.unlock("1", "r2c5", "A").await.unwrap());

        let seats = coordinator.seats("1").await.unwrap();
        assert_eq!(seats[0].estado, SeatStatus::Vendido);
    }

    #[tokio::test]
    async fn block_detects_sale_known_only_to_the_store() {
        let backend = Arc::new(MemoryStorage::new());
        let (coordinator, _) = coordinator_with(backend.clone(), "");
        coordinator.block("1", "r2c5", "A").await.unwrap();
        coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap();

        // fresh process: the in-memory sold set is gone, the record remains
        let (restarted, _) = coordinator_with(backend, "");
        assert_eq!(
            restarted.block("1", "r2c5", "B").await.unwrap(),
            BlockOutcome::Sold
        );
    }

    #[tokio::test]
    async fn upstream_failure_does_not_roll_back_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let backend = Arc::new(MemoryStorage::new());
        let (coordinator, _) = coordinator_with(backend, &server.uri());
        assert_eq!(
            coordinator.block("1", "r2c5", "A").await.unwrap(),
            BlockOutcome::Locked { owner: "A".into() }
        );

        let seats = coordinator.seats("1").await.unwrap();
        assert_eq!(seats[0].estado, SeatStatus::Bloqueado);
    }

    #[tokio::test]
    async fn purchase_mirrors_sale_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/endpoints/v1/bloquear-asientos"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/endpoints/v1/realizar-venta"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let backend = Arc::new(MemoryStorage::new());
        let (coordinator, _) = coordinator_with(backend, &server.uri());
        coordinator.block("1", "r2c5", "A").await.unwrap();
        assert_eq!(
            coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap(),
            PurchaseOutcome::Purchased
        );
    }

    #[tokio::test]
    async fn purchase_enqueues_notification_when_consumer_down() {
        let webhook = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&webhook)
            .await;

        let backend = Arc::new(MemoryStorage::new());
        let locks = Arc::new(SeatLockManager::new(TTL));
        let store = SeatStateStore::new(backend.clone(), TTL);
        let notifier = NotificationQueue::from_config(
            &WebhookConfig {
                url: webhook.uri(),
                timeout_ms: 2000,
            },
            backend.clone(),
        );
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&locks),
            store,
            upstream(""),
            notifier.clone(),
            1000.0,
        );

        coordinator.block("1", "r2c5", "A").await.unwrap();
        coordinator.purchase("1", "r2c5", "A", ana()).await.unwrap();
        assert_eq!(notifier.retry_queue_len().await.unwrap(), 1);
    }
}
