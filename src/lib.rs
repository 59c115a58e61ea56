pub mod config;
pub mod controllers;
pub mod coords;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod upstream;

use std::sync::Arc;
use std::time::Duration;

use services::locks::SeatLockManager;
use services::notify::NotificationQueue;
use services::purchase::PurchaseCoordinator;
use services::reconcile::ReconciliationEngine;
use services::store::SeatStateStore;
use storage::{RedisStorage, StorageBackend};
use upstream::UpstreamClient;

// Shared state for the whole application
pub struct AppState {
    pub config: config::Config,
    pub locks: Arc<SeatLockManager>,
    pub store: SeatStateStore,
    pub upstream: UpstreamClient,
    pub notifier: NotificationQueue,
    pub coordinator: PurchaseCoordinator,
    pub reconciler: ReconciliationEngine,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let storage = RedisStorage::connect(&config.redis.url).await?;
        let backend: Arc<dyn StorageBackend> = Arc::new(storage);
        Ok(Self::with_backend(config, backend))
    }

    /// Assemble the service graph on any storage backend. Production uses
    /// Redis; tests and local development can use [`storage::MemoryStorage`].
    pub fn with_backend(config: config::Config, backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        let lock_ttl = Duration::from_secs(config.locks.ttl_seconds);
        let locks = Arc::new(SeatLockManager::new(lock_ttl));
        let store = SeatStateStore::new(backend.clone(), lock_ttl);
        let upstream = UpstreamClient::from_config(&config.upstream, &config.circuit_breaker);
        let notifier = NotificationQueue::from_config(&config.webhook, backend.clone());
        let coordinator = PurchaseCoordinator::new(
            Arc::clone(&locks),
            store.clone(),
            upstream.clone(),
            notifier.clone(),
            config.upstream.precio_venta,
        );
        let reconciler = ReconciliationEngine::new(store.clone(), upstream.clone(), backend);

        Arc::new(Self {
            config,
            locks,
            store,
            upstream,
            notifier,
            coordinator,
            reconciler,
        })
    }
}
