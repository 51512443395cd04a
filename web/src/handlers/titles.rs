//! Catalog endpoints: titles, copies and copy status.
//!
//! - `POST /api/titles` - register a title
//! - `POST /api/titles/:id/copies` - add a copy
//! - `GET /api/titles/:id/availability` - copy counts
//! - `GET /api/titles/:id/queue` - wait list in position order
//! - `PUT /api/copies/:id/status` - change a copy's stored status

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use circulation_core::{
    Availability, AvailabilityStatus, BookTitle, BookTitleId, CopyId, Price, Promotion,
    QueueSnapshotEntry,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to register a title.
#[derive(Debug, Deserialize)]
pub struct RegisterTitleRequest {
    /// Title identifier chosen by the catalog
    pub book_title_id: BookTitleId,
    /// Display name
    pub title_name: String,
}

/// Request to add a copy.
#[derive(Debug, Deserialize)]
pub struct AddCopyRequest {
    /// Copy identifier
    pub copy_id: CopyId,
    /// Condition label
    #[serde(default = "default_condition")]
    pub condition: String,
    /// Replacement price in cents
    #[serde(default)]
    pub price_cents: u64,
}

fn default_condition() -> String {
    "Good".to_string()
}

/// Response after adding a copy or changing its status.
#[derive(Debug, Serialize)]
pub struct CopyChangeResponse {
    /// Affected copy
    pub copy_id: CopyId,
    /// Waiter promoted onto a freed copy, if any
    pub promoted: Option<Promotion>,
}

/// Request to change a copy's status.
#[derive(Debug, Deserialize)]
pub struct CopyStatusRequest {
    /// New status
    pub status: AvailabilityStatus,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a title.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/titles \
///   -H "Content-Type: application/json" \
///   -d '{"book_title_id": 1, "title_name": "Dune"}'
/// ```
///
/// # Errors
///
/// 409 if the title already exists.
pub async fn register_title(
    State(state): State<AppState>,
    Json(request): Json<RegisterTitleRequest>,
) -> Result<(StatusCode, Json<BookTitle>), AppError> {
    let title = state
        .engine
        .register_title(request.book_title_id, request.title_name)
        .await?;
    Ok((StatusCode::CREATED, Json(title)))
}

/// Add a newly acquired copy; the head of the queue may be promoted onto it.
///
/// # Errors
///
/// 404 for an unknown title, 409 for a copy id already in use.
pub async fn add_copy(
    State(state): State<AppState>,
    Path(book_title_id): Path<u64>,
    Json(request): Json<AddCopyRequest>,
) -> Result<(StatusCode, Json<CopyChangeResponse>), AppError> {
    let promoted = state
        .engine
        .add_copy(
            BookTitleId::new(book_title_id),
            request.copy_id,
            request.condition,
            Price::from_cents(request.price_cents),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CopyChangeResponse {
            copy_id: request.copy_id,
            promoted,
        }),
    ))
}

/// Copy counts of a title.
///
/// # Errors
///
/// 404 for an unknown title.
pub async fn availability(
    State(state): State<AppState>,
    Path(book_title_id): Path<u64>,
) -> Result<Json<Availability>, AppError> {
    let availability = state
        .engine
        .availability(BookTitleId::new(book_title_id))
        .await?;
    Ok(Json(availability))
}

/// The title's wait list.
///
/// # Errors
///
/// 404 for an unknown title.
pub async fn queue_snapshot(
    State(state): State<AppState>,
    Path(book_title_id): Path<u64>,
) -> Result<Json<Vec<QueueSnapshotEntry>>, AppError> {
    let snapshot = state
        .engine
        .queue_snapshot(BookTitleId::new(book_title_id))
        .await?;
    Ok(Json(snapshot))
}

/// Change a copy's stored status.
///
/// `Damaged`/`Lost` on a held copy sends its reservation back to the head of
/// the queue; `Available` may promote a waiter.
///
/// # Errors
///
/// 404 for an unknown copy, 409 when marking a held copy `OnLoan`.
pub async fn mark_copy_status(
    State(state): State<AppState>,
    Path(copy_id): Path<u64>,
    Json(request): Json<CopyStatusRequest>,
) -> Result<Json<CopyChangeResponse>, AppError> {
    let copy_id = CopyId::new(copy_id);
    let promoted = state
        .engine
        .mark_copy_status(copy_id, request.status)
        .await?;
    Ok(Json(CopyChangeResponse { copy_id, promoted }))
}
