use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_broker::{config::Config, controllers, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting seat broker");

    let state = AppState::new(config.clone())
        .await
        .expect("Failed to connect to Redis");
    info!("Redis connected");

    // --- Start background tasks ---

    // Periodic sweep of expired seat locks
    let sweep_handle = state
        .locks
        .start_sweep(Duration::from_secs(config.locks.sweep_interval_seconds));

    // Worker draining the durable notification retry queue
    let worker_handle = state.notifier.start_worker();

    // --- Start the web server ---

    let app = Router::new()
        .route("/", get(|| async { "Seat Broker API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .merge(controllers::routes())
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for shutdown signal");
            info!("Shutdown signal received");
        })
        .await
        .unwrap();

    // stop the background tasks with the server
    sweep_handle.abort();
    worker_handle.abort();
    info!("Seat broker stopped");
}
