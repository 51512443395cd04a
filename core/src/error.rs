//! Error taxonomy for allocation operations.
//!
//! Every failure an engine operation can surface maps to exactly one
//! [`ErrorKind`]. Callers branch on the kind (retry, 4xx, 5xx) rather than on
//! individual variants.

use crate::types::{BookTitleId, CardId, MAX_HOLD_HOURS, ReservationId, ReservationStatus};
use std::fmt;
use thiserror::Error;

/// Coarse classification of an [`AllocationError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced title, copy, loan or reservation does not exist
    NotFound,
    /// An invariant would be violated (duplicate hold, duplicate queue entry)
    Conflict,
    /// The reservation or title is in an incompatible state
    State,
    /// Lock timeout or storage trouble; the whole operation may be retried
    TransientInfra,
}

/// The kind of entity a [`AllocationError::NotFound`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    /// A catalog title
    BookTitle,
    /// A physical copy
    Copy,
    /// A reservation
    Reservation,
    /// A loan line
    Loan,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BookTitle => "book title",
            Self::Copy => "copy",
            Self::Reservation => "reservation",
            Self::Loan => "loan",
        };
        f.write_str(label)
    }
}

/// Errors returned by allocation operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity
        entity: Entity,
        /// Raw identifier
        id: u64,
    },

    /// An invariant would be violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// The patron already has an active reservation for the title
    #[error("card {card_id} already has an active reservation for title {book_title_id}")]
    DuplicateReservation {
        /// Requesting card
        card_id: CardId,
        /// Requested title
        book_title_id: BookTitleId,
    },

    /// Operation not valid for the reservation's current status
    #[error("reservation {reservation_id} is {status}; cannot {operation}")]
    InvalidState {
        /// Reservation
        reservation_id: ReservationId,
        /// Its current status
        status: ReservationStatus,
        /// Attempted operation
        operation: &'static str,
    },

    /// The title has no circulating copies
    #[error("title {0} is not reservable")]
    NotReservable(BookTitleId),

    /// The patron reached the active reservation limit
    #[error("card {card_id} already has {limit} active reservations")]
    ReservationLimitReached {
        /// Requesting card
        card_id: CardId,
        /// Configured limit
        limit: usize,
    },

    /// Pickup window is zero, too long, or runs past the calendar
    #[error("hold window of {hold_hours} hours is outside 1..={max} hours", max = MAX_HOLD_HOURS)]
    InvalidHoldWindow {
        /// Requested window
        hold_hours: u32,
    },

    /// Lock acquisition timed out or storage is unavailable
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),
}

impl AllocationError {
    /// Shorthand for a missing entity.
    #[must_use]
    pub const fn not_found(entity: Entity, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::DuplicateReservation { .. } => ErrorKind::Conflict,
            Self::InvalidState { .. }
            | Self::NotReservable(_)
            | Self::ReservationLimitReached { .. }
            | Self::InvalidHoldWindow { .. } => ErrorKind::State,
            Self::TransientInfra(_) => ErrorKind::TransientInfra,
        }
    }

    /// Whether retrying the whole per-title operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientInfra)
    }
}

/// Result alias for allocation operations.
pub type AllocationResult<T> = Result<T, AllocationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            AllocationError::not_found(Entity::Copy, 3).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AllocationError::Conflict("copy 3 already held".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            AllocationError::NotReservable(BookTitleId::new(1)).kind(),
            ErrorKind::State
        );
        assert!(AllocationError::TransientInfra("lock timeout".into()).is_transient());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = AllocationError::InvalidState {
            reservation_id: ReservationId::new(9),
            status: ReservationStatus::Fulfilled,
            operation: "cancel",
        };
        assert_eq!(err.to_string(), "reservation 9 is Fulfilled; cannot cancel");
    }

    #[test]
    fn test_invalid_hold_window_is_state_error() {
        let err = AllocationError::InvalidHoldWindow { hold_hours: 0 };
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.to_string(), "hold window of 0 hours is outside 1..=8784 hours");
    }
}
