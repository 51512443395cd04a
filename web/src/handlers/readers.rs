//! Reader endpoints.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use circulation_core::{CardId, ReaderSummary};

/// Active reservations of a card and whether it may reserve more.
///
/// # Errors
///
/// 503 if a title lock timed out while collecting the summary.
pub async fn reader_summary(
    State(state): State<AppState>,
    Path(card_id): Path<u64>,
) -> Result<Json<ReaderSummary>, AppError> {
    let summary = state.engine.reader_summary(CardId::new(card_id)).await?;
    Ok(Json(summary))
}
