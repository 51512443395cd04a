//! Inventory Ledger: copies of one title and their loan lines.
//!
//! The ledger never locks. Callers mutate it only while holding the title
//! lock, through [`TitleState`](crate::title::TitleState).

use crate::holds::HoldBook;
use chrono::{DateTime, Utc};
use circulation_core::{
    AllocationError, AllocationResult, AvailabilityStatus, BookCopy, BookTitleId, CopyId, Entity,
    Loan, LoanId,
};
use std::collections::{BTreeMap, HashMap};

/// Copies and loans of a single title.
#[derive(Clone, Debug)]
pub struct InventoryLedger {
    book_title_id: BookTitleId,
    copies: BTreeMap<CopyId, BookCopy>,
    loans: BTreeMap<LoanId, Loan>,
    open_loans: HashMap<CopyId, LoanId>,
}

impl InventoryLedger {
    /// Creates an empty ledger for `book_title_id`.
    #[must_use]
    pub fn new(book_title_id: BookTitleId) -> Self {
        Self {
            book_title_id,
            copies: BTreeMap::new(),
            loans: BTreeMap::new(),
            open_loans: HashMap::new(),
        }
    }

    /// Adds a newly acquired copy.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the copy id is already present or the
    /// copy belongs to another title.
    pub fn add_copy(&mut self, copy: BookCopy) -> AllocationResult<()> {
        if copy.book_title_id != self.book_title_id {
            return Err(AllocationError::Conflict(format!(
                "copy {} belongs to title {}, not {}",
                copy.copy_id, copy.book_title_id, self.book_title_id
            )));
        }
        if self.copies.contains_key(&copy.copy_id) {
            return Err(AllocationError::Conflict(format!(
                "copy {} already exists",
                copy.copy_id
            )));
        }
        self.copies.insert(copy.copy_id, copy);
        Ok(())
    }

    /// Looks up a copy.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] if the copy is not part of this title.
    pub fn copy(&self, copy_id: CopyId) -> AllocationResult<&BookCopy> {
        self.copies
            .get(&copy_id)
            .ok_or_else(|| AllocationError::not_found(Entity::Copy, copy_id.value()))
    }

    /// Copies still in circulation (`Available` or `OnLoan`).
    #[must_use]
    pub fn total_copies(&self) -> u32 {
        count(
            self.copies
                .values()
                .filter(|c| c.availability_status.is_circulating()),
        )
    }

    /// Copies currently lent out.
    #[must_use]
    pub fn checked_out_copies(&self) -> u32 {
        count(
            self.copies
                .values()
                .filter(|c| c.availability_status == AvailabilityStatus::OnLoan),
        )
    }

    /// Total copies minus copies on loan minus copies under an unexpired hold.
    #[must_use]
    pub fn count_available_copies(&self, holds: &HoldBook, now: DateTime<Utc>) -> u32 {
        count(self.copies.values().filter(|c| {
            c.availability_status == AvailabilityStatus::Available
                && !holds.has_unexpired_hold_on(c.copy_id, now)
        }))
    }

    /// Lowest-numbered `Available` copy with no hold record.
    #[must_use]
    pub fn free_copy(&self, holds: &HoldBook) -> Option<&BookCopy> {
        self.copies.values().find(|c| {
            c.availability_status == AvailabilityStatus::Available && !holds.is_copy_held(c.copy_id)
        })
    }

    /// Overwrites a copy's stored status and returns the previous one.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] if the copy is unknown.
    pub fn mark_copy_status(
        &mut self,
        copy_id: CopyId,
        status: AvailabilityStatus,
    ) -> AllocationResult<AvailabilityStatus> {
        let copy = self
            .copies
            .get_mut(&copy_id)
            .ok_or_else(|| AllocationError::not_found(Entity::Copy, copy_id.value()))?;
        let previous = copy.availability_status;
        copy.availability_status = status;
        Ok(previous)
    }

    /// Opens a loan line and flips the copy to `OnLoan`.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] if the copy is unknown
    /// - [`AllocationError::Conflict`] if the copy is not `Available` or
    ///   already has an open loan
    pub fn open_loan(&mut self, loan: Loan) -> AllocationResult<()> {
        if self.open_loans.contains_key(&loan.copy_id) {
            return Err(AllocationError::Conflict(format!(
                "copy {} already has an open loan",
                loan.copy_id
            )));
        }
        let copy = self
            .copies
            .get_mut(&loan.copy_id)
            .ok_or_else(|| AllocationError::not_found(Entity::Copy, loan.copy_id.value()))?;
        if copy.availability_status != AvailabilityStatus::Available {
            return Err(AllocationError::Conflict(format!(
                "copy {} is {}",
                copy.copy_id, copy.availability_status
            )));
        }
        copy.availability_status = AvailabilityStatus::OnLoan;
        self.open_loans.insert(loan.copy_id, loan.loan_id);
        self.loans.insert(loan.loan_id, loan);
        Ok(())
    }

    /// The open loan on `copy_id`, if any.
    #[must_use]
    pub fn open_loan_for(&self, copy_id: CopyId) -> Option<&Loan> {
        self.open_loans
            .get(&copy_id)
            .and_then(|loan_id| self.loans.get(loan_id))
    }

    /// Stamps the return date on the open loan of `copy_id`.
    ///
    /// Leaves the copy status untouched. Returns the closed loan id, or
    /// `None` if the copy had no open loan.
    pub fn close_loan_for(&mut self, copy_id: CopyId, now: DateTime<Utc>) -> Option<LoanId> {
        let loan_id = self.open_loans.remove(&copy_id)?;
        if let Some(loan) = self.loans.get_mut(&loan_id) {
            loan.return_date = Some(now);
        }
        Some(loan_id)
    }

    /// Looks up an open loan line, or a closed one not yet taken by
    /// [`take_closed_loans`](Self::take_closed_loans).
    #[must_use]
    pub fn loan(&self, loan_id: LoanId) -> Option<&Loan> {
        self.loans.get(&loan_id)
    }

    /// Removes and returns every closed loan line.
    pub fn take_closed_loans(&mut self) -> Vec<Loan> {
        let (closed, open): (BTreeMap<LoanId, Loan>, BTreeMap<LoanId, Loan>) =
            std::mem::take(&mut self.loans)
                .into_iter()
                .partition(|(_, loan)| loan.return_date.is_some());
        self.loans = open;
        closed.into_values().collect()
    }
}

fn count<'a>(copies: impl Iterator<Item = &'a BookCopy>) -> u32 {
    u32::try_from(copies.count()).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use circulation_core::{CardId, Price};

    fn ledger_with(copies: &[u64]) -> InventoryLedger {
        let title = BookTitleId::new(1);
        let mut ledger = InventoryLedger::new(title);
        for id in copies {
            ledger
                .add_copy(BookCopy::new(
                    CopyId::new(*id),
                    title,
                    "Good".into(),
                    Price::from_cents(1_000),
                ))
                .unwrap();
        }
        ledger
    }

    fn loan(loan_id: u64, copy_id: u64) -> Loan {
        Loan {
            loan_id: LoanId::new(loan_id),
            copy_id: CopyId::new(copy_id),
            card_id: CardId::new(1),
            loan_date: Utc::now(),
            return_date: None,
        }
    }

    #[test]
    fn test_duplicate_copy_is_conflict() {
        let mut ledger = ledger_with(&[1]);
        let err = ledger
            .add_copy(BookCopy::new(
                CopyId::new(1),
                BookTitleId::new(1),
                "Good".into(),
                Price::default(),
            ))
            .unwrap_err();
        assert_eq!(err.kind(), circulation_core::ErrorKind::Conflict);
    }

    #[test]
    fn test_counts_exclude_loans_and_withdrawn_copies() {
        let mut ledger = ledger_with(&[1, 2, 3, 4]);
        let holds = HoldBook::default();
        ledger.open_loan(loan(1, 1)).unwrap();
        ledger
            .mark_copy_status(CopyId::new(4), AvailabilityStatus::Lost)
            .unwrap();

        assert_eq!(ledger.total_copies(), 3);
        assert_eq!(ledger.checked_out_copies(), 1);
        assert_eq!(ledger.count_available_copies(&holds, Utc::now()), 2);
        assert_eq!(ledger.free_copy(&holds).unwrap().copy_id, CopyId::new(2));
    }

    #[test]
    fn test_open_loan_requires_available_copy() {
        let mut ledger = ledger_with(&[1]);
        ledger.open_loan(loan(1, 1)).unwrap();
        assert!(ledger.open_loan(loan(2, 1)).is_err());

        let closed = ledger.close_loan_for(CopyId::new(1), Utc::now());
        assert_eq!(closed, Some(LoanId::new(1)));
        assert!(ledger.loan(LoanId::new(1)).unwrap().return_date.is_some());
        assert!(ledger.open_loan_for(CopyId::new(1)).is_none());
        assert_eq!(ledger.close_loan_for(CopyId::new(1), Utc::now()), None);
    }

    #[test]
    fn test_take_closed_loans_leaves_open_ones() {
        let mut ledger = ledger_with(&[1, 2]);
        ledger.open_loan(loan(1, 1)).unwrap();
        ledger.open_loan(loan(2, 2)).unwrap();
        ledger.close_loan_for(CopyId::new(1), Utc::now());

        let closed = ledger.take_closed_loans();

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].loan_id, LoanId::new(1));
        assert!(ledger.loan(LoanId::new(1)).is_none());
        assert_eq!(ledger.open_loan_for(CopyId::new(2)).unwrap().loan_id, LoanId::new(2));
        assert!(ledger.take_closed_loans().is_empty());
    }

    #[test]
    fn test_unknown_copy_is_not_found() {
        let mut ledger = ledger_with(&[]);
        let err = ledger
            .mark_copy_status(CopyId::new(9), AvailabilityStatus::Damaged)
            .unwrap_err();
        assert_eq!(err, AllocationError::not_found(Entity::Copy, 9));
    }
}
