//! Property-based testing utilities using proptest.
//!
//! [`TitleOp`] describes one thing that can happen to a title, and
//! [`TitleDriver`] applies a sequence of them to a [`TitleState`] the same way
//! the engine does: expire stale holds, run the operation on a staged clone,
//! commit only on success.

use crate::mocks::test_clock;
use chrono::{DateTime, Duration, Utc};
use circulation_core::environment::Clock;
use circulation_core::{
    AllocationOutcome, AllocationResult, AvailabilityStatus, BookTitle, BookTitleId, CardId,
    CopyId, Price, Promotion, ReservationId,
};
use circulation_engine::ids::IdSequences;
use circulation_engine::{TitleContext, TitleState};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// One event in the life of a title.
#[derive(Clone, Debug)]
pub enum TitleOp {
    /// A card requests the title
    Reserve {
        /// Requesting card
        card: u64,
    },
    /// Cancel the `pick`th reservation ever created (modulo count)
    Cancel {
        /// Selector
        pick: usize,
    },
    /// Fulfil the `pick`th reservation ever created (modulo count)
    Fulfill {
        /// Selector
        pick: usize,
    },
    /// Lend a copy to a card
    Lend {
        /// Copy selector (modulo copy count)
        copy: u64,
        /// Borrowing card
        card: u64,
    },
    /// Return a copy
    Return {
        /// Copy selector (modulo copy count)
        copy: u64,
    },
    /// Mark a copy damaged
    Withdraw {
        /// Copy selector (modulo copy count)
        copy: u64,
    },
    /// Put a withdrawn copy back into circulation
    Restore {
        /// Copy selector (modulo copy count)
        copy: u64,
    },
    /// Acquire one more copy
    AddCopy,
    /// Let time pass
    Advance {
        /// Hours to advance
        hours: u32,
    },
    /// Run an expiry scan
    Sweep,
}

/// Strategy for a single [`TitleOp`], weighted towards reservations.
pub fn title_op() -> impl Strategy<Value = TitleOp> {
    prop_oneof![
        6 => (1u64..=8).prop_map(|card| TitleOp::Reserve { card }),
        3 => any::<usize>().prop_map(|pick| TitleOp::Cancel { pick }),
        1 => any::<usize>().prop_map(|pick| TitleOp::Fulfill { pick }),
        2 => (any::<u64>(), 1u64..=8).prop_map(|(copy, card)| TitleOp::Lend { copy, card }),
        2 => any::<u64>().prop_map(|copy| TitleOp::Return { copy }),
        1 => any::<u64>().prop_map(|copy| TitleOp::Withdraw { copy }),
        1 => any::<u64>().prop_map(|copy| TitleOp::Restore { copy }),
        1 => Just(TitleOp::AddCopy),
        2 => (1u32..=30).prop_map(|hours| TitleOp::Advance { hours }),
        1 => Just(TitleOp::Sweep),
    ]
}

/// Strategy for a sequence of up to `max_len` operations.
pub fn title_ops(max_len: usize) -> impl Strategy<Value = Vec<TitleOp>> {
    prop::collection::vec(title_op(), 1..max_len)
}

/// Applies [`TitleOp`]s to a single title with engine semantics.
#[derive(Debug)]
pub struct TitleDriver {
    state: TitleState,
    ids: IdSequences,
    now: DateTime<Utc>,
    hold_hours: u32,
    copies: u64,
    created: Vec<ReservationId>,
    queued_order: Vec<ReservationId>,
    requeued: BTreeSet<ReservationId>,
    promotions: Vec<Promotion>,
}

impl TitleDriver {
    /// Title 1 with `copies` copies (ids `1..=copies`), a 24 hour pickup
    /// window and the test clock's start time.
    ///
    /// # Errors
    ///
    /// Propagates ledger errors while adding copies.
    pub fn new(copies: u64) -> AllocationResult<Self> {
        let mut driver = Self {
            state: TitleState::new(BookTitle {
                id: BookTitleId::new(1),
                name: "Property Title".into(),
            }),
            ids: IdSequences::new(),
            now: test_clock().now(),
            hold_hours: 24,
            copies: 0,
            created: Vec::new(),
            queued_order: Vec::new(),
            requeued: BTreeSet::new(),
            promotions: Vec::new(),
        };
        for _ in 0..copies {
            driver.apply(&TitleOp::AddCopy)?;
        }
        Ok(driver)
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &TitleState {
        &self.state
    }

    /// Current simulated time.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Every promotion so far, in order.
    #[must_use]
    pub fn promotions(&self) -> &[Promotion] {
        &self.promotions
    }

    /// Reservations that entered the queue on request, in request order.
    #[must_use]
    pub fn queued_order(&self) -> &[ReservationId] {
        &self.queued_order
    }

    /// Reservations put back at the head of the queue after losing a copy.
    #[must_use]
    pub const fn requeued(&self) -> &BTreeSet<ReservationId> {
        &self.requeued
    }

    /// Applies one operation. On error the state is unchanged.
    ///
    /// # Errors
    ///
    /// Whatever the underlying [`TitleState`] operation rejects.
    pub fn apply(&mut self, op: &TitleOp) -> AllocationResult<()> {
        if let TitleOp::Advance { hours } = op {
            self.now += Duration::hours(i64::from(*hours));
            return Ok(());
        }

        let mut staged = self.state.clone();
        let mut ctx = TitleContext::new(self.now, self.hold_hours, &self.ids);
        staged.expire_stale(&mut ctx)?;
        let queue_before: Vec<ReservationId> = staged
            .queue()
            .entries()
            .iter()
            .map(|e| e.reservation_id)
            .collect();

        let mut created = None;
        let mut queued = None;
        let mut added_copy = false;
        match op {
            TitleOp::Reserve { card } => {
                let outcome = staged.request_reservation(CardId::new(*card), &mut ctx)?;
                created = Some(outcome.reservation_id());
                if let AllocationOutcome::Queue { reservation_id, .. } = outcome {
                    queued = Some(reservation_id);
                }
            }
            TitleOp::Cancel { pick } => {
                if let Some(id) = self.pick(*pick) {
                    staged.cancel(id, &mut ctx)?;
                }
            }
            TitleOp::Fulfill { pick } => {
                if let Some(id) = self.pick(*pick) {
                    staged.fulfill(id)?;
                }
            }
            TitleOp::Lend { copy, card } => {
                staged.lend(self.copy(*copy), CardId::new(*card), &mut ctx)?;
            }
            TitleOp::Return { copy } => {
                staged.return_copy(self.copy(*copy), &mut ctx)?;
            }
            TitleOp::Withdraw { copy } => {
                staged.mark_copy_status(self.copy(*copy), AvailabilityStatus::Damaged, &mut ctx)?;
            }
            TitleOp::Restore { copy } => {
                staged.mark_copy_status(
                    self.copy(*copy),
                    AvailabilityStatus::Available,
                    &mut ctx,
                )?;
            }
            TitleOp::AddCopy => {
                staged.add_copy(
                    CopyId::new(self.copies + 1),
                    "Good".into(),
                    Price::from_cents(1_000),
                    &mut ctx,
                )?;
                added_copy = true;
            }
            TitleOp::Sweep | TitleOp::Advance { .. } => {}
        }

        let (_, promoted, _) = ctx.into_effects();
        for entry in staged.queue().entries() {
            let new_entry = !queue_before.contains(&entry.reservation_id)
                && Some(entry.reservation_id) != queued;
            if new_entry {
                self.requeued.insert(entry.reservation_id);
            }
        }
        self.state = staged;
        self.state.archive_settled();
        self.promotions.extend(promoted);
        self.created.extend(created);
        self.queued_order.extend(queued);
        if added_copy {
            self.copies += 1;
        }
        Ok(())
    }

    fn pick(&self, pick: usize) -> Option<ReservationId> {
        if self.created.is_empty() {
            return None;
        }
        self.created.get(pick % self.created.len()).copied()
    }

    fn copy(&self, selector: u64) -> CopyId {
        CopyId::new(selector % self.copies.max(1) + 1)
    }
}
