//! Reservation endpoints.
//!
//! - `POST /api/reservations` - reserve a title for a card
//! - `GET /api/reservations/:id` - reservation status
//! - `GET /api/reservations/:id/hold` - held copy and pickup deadline
//! - `POST /api/reservations/:id/cancel` - cancel, promoting the next waiter
//! - `POST /api/reservations/:id/fulfill` - mark picked up
//! - `POST /api/reservations/sweep` - expire stale holds now
//!
//! # Reservation Flow
//!
//! ```text
//! reserve ──copy free──▶ Ready (hold) ──pickup──▶ Fulfilled
//!    │                     │  ▲
//!    │                     │  └──promote── Pending (queue)
//!    └──no copy free──▶ Pending
//! ```

use crate::error::AppError;
use crate::middleware::CorrelationId;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use circulation_core::{
    AllocationOutcome, BookTitleId, CardId, ExpiredHold, HoldView, Promotion, Reservation,
    ReservationId, validate_hold_hours,
};
use circulation_engine::retry_transient;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to reserve a title.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Requesting card
    pub card_id: CardId,
    /// Requested title
    pub book_title_id: BookTitleId,
}

/// Response after cancelling a reservation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    /// Always `true`
    pub ok: bool,
    /// Reservation promoted onto the freed copy, if any
    pub promoted: Option<ReservationId>,
}

/// Optional body of a manual sweep.
#[derive(Debug, Default, Deserialize)]
pub struct SweepRequest {
    /// Pickup window for holds created by promotions, `1..=MAX_HOLD_HOURS`;
    /// engine default if absent
    pub hold_hours: Option<u32>,
}

/// Result of a manual sweep.
#[derive(Debug, Serialize, Deserialize)]
pub struct SweepResponse {
    /// Number of holds that expired
    pub expired_count: usize,
    /// Holds that expired
    pub expired: Vec<ExpiredHold>,
    /// Waiters promoted as a consequence
    pub promoted: Vec<Promotion>,
    /// Titles whose lock could not be taken
    pub failed_titles: Vec<BookTitleId>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Reserve a title: an immediate hold if a copy is free, otherwise a queue
/// position.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/reservations \
///   -H "Content-Type: application/json" \
///   -d '{"card_id": 7, "book_title_id": 1}'
/// ```
///
/// Response:
/// ```json
/// {"mode": "queue", "reservation_id": 12, "position": 2}
/// ```
///
/// # Errors
///
/// 404 unknown title, 409 duplicate, 422 limit reached or no copies,
/// 503 if the title stayed locked through every retry.
pub async fn reserve(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<AllocationOutcome>), AppError> {
    let outcome = retry_transient(&state.retry, || {
        state.engine.reserve(request.card_id, request.book_title_id)
    })
    .await?;
    info!(
        correlation_id = %correlation_id.0,
        card_id = %request.card_id,
        reservation_id = %outcome.reservation_id(),
        "reservation accepted"
    );
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// A reservation in its current status.
///
/// # Errors
///
/// 404 for an unknown reservation.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<u64>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state
        .engine
        .reservation(ReservationId::new(reservation_id))
        .await?;
    Ok(Json(reservation))
}

/// The held copy of a `Ready` reservation.
///
/// # Errors
///
/// 404 for an unknown reservation or one without a hold.
pub async fn get_hold(
    State(state): State<AppState>,
    Path(reservation_id): Path<u64>,
) -> Result<Json<HoldView>, AppError> {
    state
        .engine
        .hold_for(ReservationId::new(reservation_id))
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("hold for reservation", reservation_id))
}

/// Cancel a `Pending` or `Ready` reservation.
///
/// # Errors
///
/// 404 unknown reservation, 422 already terminal, 503 lock timeout.
pub async fn cancel(
    State(state): State<AppState>,
    Path(reservation_id): Path<u64>,
) -> Result<Json<CancelResponse>, AppError> {
    let reservation_id = ReservationId::new(reservation_id);
    let promoted = retry_transient(&state.retry, || {
        state.engine.cancel_reservation(reservation_id)
    })
    .await?;
    Ok(Json(CancelResponse {
        ok: true,
        promoted: promoted.map(|p| p.reservation_id),
    }))
}

/// Mark a reservation picked up.
///
/// # Errors
///
/// 404 unknown reservation, 422 already terminal.
pub async fn fulfill(
    State(state): State<AppState>,
    Path(reservation_id): Path<u64>,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state
        .engine
        .fulfill_reservation(ReservationId::new(reservation_id))
        .await?;
    Ok(Json(reservation))
}

/// Expire stale holds across all titles now.
///
/// # Errors
///
/// 400 if `hold_hours` is zero or longer than the engine accepts.
pub async fn sweep(
    State(state): State<AppState>,
    request: Option<Json<SweepRequest>>,
) -> Result<Json<SweepResponse>, AppError> {
    let request = request.map(|Json(body)| body).unwrap_or_default();
    let hold_hours = match request.hold_hours {
        Some(hours) => {
            validate_hold_hours(hours).map_err(|err| AppError::bad_request(err.to_string()))?
        }
        None => state.engine.config().hold_hours,
    };
    let report = state
        .engine
        .expire_stale_reservations(state.engine.now(), hold_hours)
        .await?;
    Ok(Json(SweepResponse {
        expired_count: report.expired_count(),
        expired: report.expired,
        promoted: report.promoted,
        failed_titles: report.failed_titles,
    }))
}
