//! Route definitions for the batch ledger API

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest(
            "/ledgers/:organization_id/:site_id/:product_id",
            ledger_routes(),
        )
        .route("/transfers", post(handlers::create_transfer))
}

/// Routes for one ledger
fn ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::get_snapshot))
        .route("/events", get(handlers::list_events))
        .route("/receipts", post(handlers::receive_batch))
        .route("/consumptions", post(handlers::consume))
        .route("/write-offs", post(handlers::write_off))
        .route("/adjustments", post(handlers::adjust))
        .route("/expirations", post(handlers::expire_batches))
        .route("/batches/:batch_id/write-off", post(handlers::write_off_batch))
}
