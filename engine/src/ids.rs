//! Identifier sequences for engine-created records.
//!
//! Titles and copies carry catalog identifiers supplied by the caller.
//! Reservations, holds, queue entries and loans are numbered here.

use circulation_core::{HoldId, LoanId, QueueId, ReservationId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters, one per record kind.
///
/// Numbers drawn inside a critical section that is later discarded are simply
/// skipped; identifiers are unique, not dense.
#[derive(Debug)]
pub struct IdSequences {
    reservation: AtomicU64,
    hold: AtomicU64,
    queue: AtomicU64,
    loan: AtomicU64,
}

impl Default for IdSequences {
    fn default() -> Self {
        Self {
            reservation: AtomicU64::new(1),
            hold: AtomicU64::new(1),
            queue: AtomicU64::new(1),
            loan: AtomicU64::new(1),
        }
    }
}

impl IdSequences {
    /// Creates sequences starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next reservation id.
    pub fn next_reservation(&self) -> ReservationId {
        ReservationId::new(self.reservation.fetch_add(1, Ordering::Relaxed))
    }

    /// Next hold id.
    pub fn next_hold(&self) -> HoldId {
        HoldId::new(self.hold.fetch_add(1, Ordering::Relaxed))
    }

    /// Next queue entry id.
    pub fn next_queue(&self) -> QueueId {
        QueueId::new(self.queue.fetch_add(1, Ordering::Relaxed))
    }

    /// Next loan id.
    pub fn next_loan(&self) -> LoanId {
        LoanId::new(self.loan.fetch_add(1, Ordering::Relaxed))
    }
}
