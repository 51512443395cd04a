//! Card registry endpoints.
//!
//! - `POST /api/cards` - link a library card to its reader
//! - `GET /api/cards/:card_id` - reader a card belongs to
//!
//! Both answer 404 when the server was built without a card registry.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use circulation_core::{CardId, InMemoryPatronDirectory, PatronDirectory, ReaderId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A card and the reader who owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRegistration {
    /// Library card
    pub card_id: CardId,
    /// Owner of the card
    pub reader_id: ReaderId,
}

fn registry(state: &AppState) -> Result<&Arc<InMemoryPatronDirectory>, AppError> {
    state.cards.as_ref().ok_or_else(|| {
        AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "card registry is disabled")
    })
}

/// Link a card to a reader, replacing any previous owner.
///
/// # Errors
///
/// 404 when the card registry is disabled.
#[allow(clippy::unused_async)]
pub async fn register_card(
    State(state): State<AppState>,
    Json(request): Json<CardRegistration>,
) -> Result<(StatusCode, Json<CardRegistration>), AppError> {
    registry(&state)?.register(request.card_id, request.reader_id);
    info!(card_id = %request.card_id, reader_id = %request.reader_id, "card registered");
    Ok((StatusCode::CREATED, Json(request)))
}

/// Reader a card belongs to.
///
/// # Errors
///
/// 404 for an unknown card or when the card registry is disabled.
#[allow(clippy::unused_async)]
pub async fn get_card(
    State(state): State<AppState>,
    Path(card_id): Path<u64>,
) -> Result<Json<CardRegistration>, AppError> {
    let card_id = CardId::new(card_id);
    let reader_id = registry(&state)?
        .reader_for_card(card_id)
        .ok_or_else(|| AppError::not_found("card", card_id))?;
    Ok(Json(CardRegistration { card_id, reader_id }))
}
