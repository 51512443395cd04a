//! Router configuration.

use crate::handlers::{cards, health, loans, readers, reservations, titles};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Health, readiness and metrics sit at the root; everything else is nested
/// under `/api`. Every request passes through the correlation id layer and
/// `tower-http`'s trace layer.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Catalog
        .route("/titles", post(titles::register_title))
        .route("/titles/:id/copies", post(titles::add_copy))
        .route("/titles/:id/availability", get(titles::availability))
        .route("/titles/:id/queue", get(titles::queue_snapshot))
        .route("/copies/:id/status", put(titles::mark_copy_status))
        // Reservations
        .route("/reservations", post(reservations::reserve))
        .route("/reservations/sweep", post(reservations::sweep))
        .route("/reservations/:id", get(reservations::get_reservation))
        .route("/reservations/:id/hold", get(reservations::get_hold))
        .route("/reservations/:id/cancel", post(reservations::cancel))
        .route("/reservations/:id/fulfill", post(reservations::fulfill))
        // Loans
        .route("/loans", post(loans::lend))
        .route("/returns", post(loans::return_copy))
        // Readers
        .route("/cards", post(cards::register_card))
        .route("/cards/:card_id", get(cards::get_card))
        .route(
            "/readers/:card_id/reservations",
            get(readers::reader_summary),
        );

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
