//! Domain types for reservation allocation.
//!
//! Identifiers, lifecycle statuses, the catalog/copy/reservation entities and
//! the read projections returned by the engine. Everything here is plain data:
//! no locking, no I/O.

use crate::error::{AllocationError, AllocationResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Declares a `u64`-backed identifier newtype.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier value.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a catalog title (all copies of one book).
    BookTitleId
);
numeric_id!(
    /// Identifier of one physical copy.
    CopyId
);
numeric_id!(
    /// Identifier of a reservation (the aggregate root).
    ReservationId
);
numeric_id!(
    /// Identifier of a library card (the patron placing reservations).
    CardId
);
numeric_id!(
    /// Identifier of a reader; one reader may own several cards.
    ReaderId
);
numeric_id!(
    /// Identifier of a hold record.
    HoldId
);
numeric_id!(
    /// Identifier of a queue entry.
    QueueId
);
numeric_id!(
    /// Identifier of a loan line (one copy lent to one card).
    LoanId
);

// ============================================================================
// Value Objects
// ============================================================================

/// Replacement price of a copy, stored in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    /// Creates a price from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Stored availability of a physical copy.
///
/// Holds are not a stored status: a held copy stays `Available` and is
/// excluded from availability by the hold record itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvailabilityStatus {
    /// On the shelf (possibly under a hold)
    Available,
    /// Lent to a patron
    OnLoan,
    /// Withdrawn from circulation because of damage
    Damaged,
    /// Missing
    Lost,
}

impl AvailabilityStatus {
    /// Whether copies in this status still belong to the circulating stock.
    #[must_use]
    pub const fn is_circulating(self) -> bool {
        matches!(self, Self::Available | Self::OnLoan)
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Available => "Available",
            Self::OnLoan => "OnLoan",
            Self::Damaged => "Damaged",
            Self::Lost => "Lost",
        };
        f.write_str(label)
    }
}

/// Reservation lifecycle status.
///
/// ```text
/// Pending ──promote──▶ Ready ──loan──▶ Fulfilled
///    │                   │
///    │                   ├──sweep──▶ Expired
///    └──────cancel───────┴─────────▶ Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Waiting in the title's queue
    Pending,
    /// A copy is held for pickup
    Ready,
    /// A loan was created against the reservation
    Fulfilled,
    /// The hold ran out before pickup
    Expired,
    /// Cancelled by the patron or staff
    Cancelled,
}

impl ReservationStatus {
    /// `Pending` or `Ready`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }

    /// `Fulfilled`, `Expired` or `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Fulfilled => "Fulfilled",
            Self::Expired => "Expired",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Catalog title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookTitle {
    /// Title identifier
    pub id: BookTitleId,
    /// Display name used in notifications
    pub name: String,
}

/// A physical, trackable copy of a title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookCopy {
    /// Copy identifier
    pub copy_id: CopyId,
    /// Owning title
    pub book_title_id: BookTitleId,
    /// Stored availability
    pub availability_status: AvailabilityStatus,
    /// Free-form condition label ("Good", "Worn", ...)
    pub condition: String,
    /// Replacement price
    pub price: Price,
}

impl BookCopy {
    /// Creates a new copy on the shelf.
    #[must_use]
    pub const fn new(
        copy_id: CopyId,
        book_title_id: BookTitleId,
        condition: String,
        price: Price,
    ) -> Self {
        Self {
            copy_id,
            book_title_id,
            availability_status: AvailabilityStatus::Available,
            condition,
            price,
        }
    }
}

/// A patron's request for a title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier
    pub reservation_id: ReservationId,
    /// Requesting card
    pub card_id: CardId,
    /// Requested title
    pub book_title_id: BookTitleId,
    /// When the request was made
    pub reservation_date: DateTime<Utc>,
    /// Pickup deadline while `Ready`
    pub expiration_date: Option<DateTime<Utc>>,
    /// Lifecycle status
    pub status: ReservationStatus,
}

impl Reservation {
    /// Creates a `Pending` reservation.
    #[must_use]
    pub const fn new(
        reservation_id: ReservationId,
        card_id: CardId,
        book_title_id: BookTitleId,
        reservation_date: DateTime<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            card_id,
            book_title_id,
            reservation_date,
            expiration_date: None,
            status: ReservationStatus::Pending,
        }
    }
}

/// Binds one reservation to one copy until `expires_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationHold {
    /// Hold identifier
    pub hold_id: HoldId,
    /// Reservation the copy is held for
    pub reservation_id: ReservationId,
    /// Held copy
    pub copy_id: CopyId,
    /// Title of the held copy
    pub book_title_id: BookTitleId,
    /// When the hold was created
    pub created_at: DateTime<Utc>,
    /// Data-level deadline, enforced by sweeps
    pub expires_at: DateTime<Utc>,
}

impl ReservationHold {
    /// A hold is expired once `now` reaches `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Longest accepted pickup window: one leap year.
pub const MAX_HOLD_HOURS: u32 = 24 * 366;

/// Checks that `hold_hours` is within `1..=MAX_HOLD_HOURS`.
///
/// # Errors
///
/// [`AllocationError::InvalidHoldWindow`] otherwise.
pub const fn validate_hold_hours(hold_hours: u32) -> AllocationResult<u32> {
    if hold_hours == 0 || hold_hours > MAX_HOLD_HOURS {
        return Err(AllocationError::InvalidHoldWindow { hold_hours });
    }
    Ok(hold_hours)
}

/// Deadline of a hold created at `now` with a `hold_hours` window.
///
/// # Errors
///
/// [`AllocationError::InvalidHoldWindow`] if the window is out of range or
/// the deadline is not representable.
pub fn pickup_deadline(now: DateTime<Utc>, hold_hours: u32) -> AllocationResult<DateTime<Utc>> {
    let hours = validate_hold_hours(hold_hours)?;
    now.checked_add_signed(Duration::hours(i64::from(hours)))
        .ok_or(AllocationError::InvalidHoldWindow { hold_hours })
}

/// Wait-list membership of a `Pending` reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Queue entry identifier
    pub queue_id: QueueId,
    /// Waiting reservation
    pub reservation_id: ReservationId,
    /// 1-based, dense position within the title's queue
    pub position: u32,
}

/// An open or closed loan line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Loan identifier
    pub loan_id: LoanId,
    /// Lent copy
    pub copy_id: CopyId,
    /// Borrowing card
    pub card_id: CardId,
    /// When the loan started
    pub loan_date: DateTime<Utc>,
    /// When the copy came back (`None` while on loan)
    pub return_date: Option<DateTime<Utc>>,
}

// ============================================================================
// Operation Results
// ============================================================================

/// Result of a reservation request: either an immediate hold or a queue slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AllocationOutcome {
    /// A copy is held for the reservation
    Hold {
        /// Created reservation
        reservation_id: ReservationId,
        /// Held copy
        copy_id: CopyId,
        /// Pickup deadline
        expires_at: DateTime<Utc>,
    },
    /// No copy was free; the reservation waits in the queue
    Queue {
        /// Created reservation
        reservation_id: ReservationId,
        /// Assigned 1-based position
        position: u32,
    },
}

impl AllocationOutcome {
    /// The reservation created by the request.
    #[must_use]
    pub const fn reservation_id(&self) -> ReservationId {
        match self {
            Self::Hold { reservation_id, .. } | Self::Queue { reservation_id, .. } => {
                *reservation_id
            }
        }
    }
}

/// A hold removed by an expiry scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredHold {
    /// Reservation whose hold expired
    pub reservation_id: ReservationId,
    /// Title of the freed copy
    pub book_title_id: BookTitleId,
    /// Freed copy
    pub copy_id: CopyId,
}

/// A queued reservation that received a hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Promoted reservation
    pub reservation_id: ReservationId,
    /// Card that owns it
    pub card_id: CardId,
    /// Title
    pub book_title_id: BookTitleId,
    /// Copy now held
    pub copy_id: CopyId,
    /// Pickup deadline
    pub expires_at: DateTime<Utc>,
}

/// Outcome of one expiry sweep across all titles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Holds that expired
    pub expired: Vec<ExpiredHold>,
    /// Waiters promoted as a consequence
    pub promoted: Vec<Promotion>,
    /// Titles skipped because their lock could not be taken
    pub failed_titles: Vec<BookTitleId>,
}

impl SweepReport {
    /// Number of holds that expired.
    #[must_use]
    pub fn expired_count(&self) -> usize {
        self.expired.len()
    }
}

/// Target of a copy return.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnTarget {
    /// Identify the returned copy directly
    Copy(CopyId),
    /// Identify the returned copy through its loan line
    Loan(LoanId),
}

/// Outcome of a copy return.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnOutcome {
    /// Returned copy
    pub copy_id: CopyId,
    /// Title of the returned copy
    pub book_title_id: BookTitleId,
    /// Waiter promoted by the return, if any
    pub promoted: Option<Promotion>,
}

/// Outcome of lending a copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReceipt {
    /// Created loan line
    pub loan_id: LoanId,
    /// Lent copy
    pub copy_id: CopyId,
    /// Title of the lent copy
    pub book_title_id: BookTitleId,
    /// Reservation fulfilled by the loan, if the card had one
    pub fulfilled: Option<ReservationId>,
    /// Waiter promoted because the fulfilled hold bound a different copy
    pub promoted: Option<Promotion>,
}

// ============================================================================
// Read Projections
// ============================================================================

/// One row of a title's queue snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshotEntry {
    /// Waiting reservation
    pub reservation_id: ReservationId,
    /// Card that owns it
    pub card_id: CardId,
    /// 1-based position
    pub position: u32,
    /// Always `Pending` for queued reservations
    pub status: ReservationStatus,
}

/// Copy counts for a title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Title
    pub book_title_id: BookTitleId,
    /// Circulating copies (Damaged/Lost excluded)
    pub total_copies: u32,
    /// Copies that could be held right now
    pub available_copies: u32,
    /// Copies on an open loan
    pub checked_out_copies: u32,
    /// Copies under an unexpired hold
    pub held_copies: u32,
    /// Whether the title accepts reservations at all
    pub is_reservable: bool,
    /// Whether a reservation placed now would get an immediate hold
    pub will_hold_if_available: bool,
}

/// An active hold with details of the held copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldView {
    /// Hold identifier
    pub hold_id: HoldId,
    /// Reservation
    pub reservation_id: ReservationId,
    /// Card that owns the reservation
    pub card_id: CardId,
    /// Held copy
    pub copy_id: CopyId,
    /// Title
    pub book_title_id: BookTitleId,
    /// Title display name
    pub title: String,
    /// Condition of the held copy
    pub condition: String,
    /// Price of the held copy
    pub price: Price,
    /// Pickup deadline
    pub expires_at: DateTime<Utc>,
}

/// Active reservations of one card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSummary {
    /// Card
    pub card_id: CardId,
    /// Number of `Pending`/`Ready` reservations
    pub active_count: usize,
    /// Whether the card is below the reservation limit
    pub can_reserve_more: bool,
    /// The active reservations, oldest first
    pub active: Vec<Reservation>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serializes_as_tagged_variant() {
        let outcome = AllocationOutcome::Queue {
            reservation_id: ReservationId::new(7),
            position: 2,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "queue");
        assert_eq!(json["reservation_id"], 7);
        assert_eq!(json["position"], 2);
    }

    #[test]
    fn test_status_classification() {
        assert!(ReservationStatus::Pending.is_active());
        assert!(ReservationStatus::Ready.is_active());
        assert!(ReservationStatus::Fulfilled.is_terminal());
        assert!(ReservationStatus::Expired.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_hold_expires_at_deadline() {
        let now = Utc::now();
        let hold = ReservationHold {
            hold_id: HoldId::new(1),
            reservation_id: ReservationId::new(1),
            copy_id: CopyId::new(1),
            book_title_id: BookTitleId::new(1),
            created_at: now,
            expires_at: now,
        };
        assert!(hold.is_expired(now));
        assert!(!hold.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_pickup_deadline_bounds() {
        let now = Utc::now();
        assert_eq!(pickup_deadline(now, 24).unwrap(), now + Duration::hours(24));
        assert!(pickup_deadline(now, MAX_HOLD_HOURS).is_ok());
        for hold_hours in [0, MAX_HOLD_HOURS + 1, u32::MAX] {
            assert_eq!(
                pickup_deadline(now, hold_hours),
                Err(AllocationError::InvalidHoldWindow { hold_hours })
            );
        }
    }

    #[test]
    fn test_deadline_past_end_of_calendar_is_rejected() {
        let end = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        assert_eq!(
            pickup_deadline(end, 2),
            Err(AllocationError::InvalidHoldWindow { hold_hours: 2 })
        );
    }

    #[test]
    fn test_price_display() {
        assert_eq!(Price::from_cents(12_050).to_string(), "120.50");
    }
}
