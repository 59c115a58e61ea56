pub mod admin;
pub mod asientos;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(asientos::routes())
        .merge(admin::routes())
}
