//! Loan and return endpoints.
//!
//! - `POST /api/loans` - lend a copy to a card
//! - `POST /api/returns` - return a copy by copy id or loan id

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use circulation_core::{CardId, CopyId, LoanId, LoanReceipt, ReservationId, ReturnTarget};
use serde::{Deserialize, Serialize};

/// Request to lend a copy.
#[derive(Debug, Deserialize)]
pub struct LendRequest {
    /// Copy handed over
    pub copy_id: CopyId,
    /// Borrowing card
    pub card_id: CardId,
}

/// Request to return a copy. Exactly one of the fields must be set.
#[derive(Debug, Default, Deserialize)]
pub struct ReturnRequest {
    /// Returned copy
    pub copy_id: Option<CopyId>,
    /// Loan line being closed
    pub loan_id: Option<LoanId>,
}

impl ReturnRequest {
    fn target(&self) -> Result<ReturnTarget, AppError> {
        match (self.copy_id, self.loan_id) {
            (Some(copy_id), None) => Ok(ReturnTarget::Copy(copy_id)),
            (None, Some(loan_id)) => Ok(ReturnTarget::Loan(loan_id)),
            _ => Err(AppError::bad_request(
                "exactly one of copy_id or loan_id is required",
            )),
        }
    }
}

/// Response after a return.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReturnResponse {
    /// Whether a waiter received the returned copy
    pub promoted: bool,
    /// The promoted reservation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<ReservationId>,
}

/// Lend a copy. The card's active reservation for the title is fulfilled.
///
/// # Errors
///
/// 404 unknown copy, 409 copy not on the shelf or held for someone else.
pub async fn lend(
    State(state): State<AppState>,
    Json(request): Json<LendRequest>,
) -> Result<(StatusCode, Json<LoanReceipt>), AppError> {
    let receipt = state
        .engine
        .lend_copy(request.copy_id, request.card_id)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Return a copy and promote the next waiter.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/returns \
///   -H "Content-Type: application/json" \
///   -d '{"loan_id": 3}'
/// ```
///
/// # Errors
///
/// 400 without exactly one target, 404 unknown copy or loan.
pub async fn return_copy(
    State(state): State<AppState>,
    Json(request): Json<ReturnRequest>,
) -> Result<Json<ReturnResponse>, AppError> {
    let outcome = state.engine.return_copy(request.target()?).await?;
    Ok(Json(ReturnResponse {
        promoted: outcome.promoted.is_some(),
        reservation_id: outcome.promoted.map(|p| p.reservation_id),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_return_target_requires_exactly_one_id() {
        let neither = ReturnRequest::default();
        assert!(neither.target().is_err());

        let both = ReturnRequest {
            copy_id: Some(CopyId::new(1)),
            loan_id: Some(LoanId::new(1)),
        };
        assert!(both.target().is_err());

        let by_loan = ReturnRequest {
            copy_id: None,
            loan_id: Some(LoanId::new(4)),
        };
        assert_eq!(by_loan.target().unwrap(), ReturnTarget::Loan(LoanId::new(4)));
    }
}
