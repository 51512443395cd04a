//! Settled records of a title.
//!
//! Terminal reservations and closed loans never change again. They are moved
//! out of the mutable part of [`TitleState`](crate::title::TitleState) into a
//! [`TitleHistory`] shared behind an `Arc`, so staging a title for a mutation
//! copies only live records.

use circulation_core::{Loan, LoanId, Reservation, ReservationId};
use std::collections::BTreeMap;

/// Terminal reservations and closed loans of one title.
#[derive(Clone, Debug, Default)]
pub struct TitleHistory {
    reservations: BTreeMap<ReservationId, Reservation>,
    loans: BTreeMap<LoanId, Loan>,
}

impl TitleHistory {
    /// A settled reservation.
    #[must_use]
    pub fn reservation(&self, reservation_id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&reservation_id)
    }

    /// Settled reservations in id order.
    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    /// A closed loan.
    #[must_use]
    pub fn loan(&self, loan_id: LoanId) -> Option<&Loan> {
        self.loans.get(&loan_id)
    }

    /// Number of archived records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reservations.len() + self.loans.len()
    }

    /// `true` if nothing has been archived yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty() && self.loans.is_empty()
    }

    pub(crate) fn record(
        &mut self,
        reservations: impl IntoIterator<Item = Reservation>,
        loans: impl IntoIterator<Item = Loan>,
    ) {
        self.reservations
            .extend(reservations.into_iter().map(|r| (r.reservation_id, r)));
        self.loans
            .extend(loans.into_iter().map(|loan| (loan.loan_id, loan)));
    }
}
