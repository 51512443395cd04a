//! Per-title allocation state and the decisions made on it.
//!
//! [`TitleState`] owns everything one title lock protects: the inventory
//! ledger, the hold book, the wait queue and the title's reservations. All
//! methods are synchronous; the engine runs them on a staged clone and
//! commits the clone only when the whole operation succeeded. Settled
//! records live in a shared [`TitleHistory`] that the clone does not copy.

use crate::history::TitleHistory;
use crate::holds::HoldBook;
use crate::ids::IdSequences;
use crate::ledger::InventoryLedger;
use crate::queue::WaitQueue;
use chrono::{DateTime, Utc};
use circulation_core::{
    AllocationError, AllocationOutcome, AllocationResult, Availability, AvailabilityStatus,
    BookCopy, BookTitle, CardId, CopyId, Entity, ExpiredHold, HoldView, Loan, LoanId, LoanReceipt,
    Price, Promotion, QueueSnapshotEntry, Reservation, ReservationHold, ReservationId,
    ReservationStatus, ReturnOutcome,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs and side effects of one critical section.
///
/// Carries the operation's notion of "now" and the pickup window, and
/// collects the expiries and promotions that happened so the caller can
/// record metrics and send notifications after the lock is released.
#[derive(Debug)]
pub struct TitleContext<'a> {
    now: DateTime<Utc>,
    hold_hours: u32,
    ids: &'a IdSequences,
    expired: Vec<ExpiredHold>,
    promoted: Vec<Promotion>,
    hold_conflicts: u64,
}

impl<'a> TitleContext<'a> {
    /// Creates a context for one critical section.
    #[must_use]
    pub const fn new(now: DateTime<Utc>, hold_hours: u32, ids: &'a IdSequences) -> Self {
        Self {
            now,
            hold_hours,
            ids,
            expired: Vec::new(),
            promoted: Vec::new(),
            hold_conflicts: 0,
        }
    }

    /// The time the section runs at.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Promotions made during the section.
    #[must_use]
    pub fn promoted(&self) -> &[Promotion] {
        &self.promoted
    }

    /// Consumes the context, returning expiries and promotions.
    #[must_use]
    pub fn into_effects(self) -> (Vec<ExpiredHold>, Vec<Promotion>, u64) {
        (self.expired, self.promoted, self.hold_conflicts)
    }
}

/// Everything guarded by one title lock.
#[derive(Clone, Debug)]
pub struct TitleState {
    title: BookTitle,
    ledger: InventoryLedger,
    holds: HoldBook,
    queue: WaitQueue,
    reservations: BTreeMap<ReservationId, Reservation>,
    history: Arc<TitleHistory>,
}

impl TitleState {
    /// Creates the state of a freshly registered title.
    #[must_use]
    pub fn new(title: BookTitle) -> Self {
        Self {
            ledger: InventoryLedger::new(title.id),
            title,
            holds: HoldBook::default(),
            queue: WaitQueue::default(),
            reservations: BTreeMap::new(),
            history: Arc::default(),
        }
    }

    /// Catalog record.
    #[must_use]
    pub const fn title(&self) -> &BookTitle {
        &self.title
    }

    /// Copies and loans.
    #[must_use]
    pub const fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// Holds.
    #[must_use]
    pub const fn holds(&self) -> &HoldBook {
        &self.holds
    }

    /// Wait queue.
    #[must_use]
    pub const fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    /// Archived reservations and loans.
    #[must_use]
    pub fn history(&self) -> &TitleHistory {
        &self.history
    }

    /// Looks up a reservation of this title, live or archived.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] if the reservation does not belong here.
    pub fn reservation(&self, reservation_id: ReservationId) -> AllocationResult<&Reservation> {
        self.reservations
            .get(&reservation_id)
            .or_else(|| self.history.reservation(reservation_id))
            .ok_or_else(|| AllocationError::not_found(Entity::Reservation, reservation_id.value()))
    }

    /// All reservations of this title: unarchived ones in creation order,
    /// then archived ones.
    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().chain(self.history.reservations())
    }

    /// Looks up a loan line of this title, open, closed or archived.
    #[must_use]
    pub fn loan(&self, loan_id: LoanId) -> Option<&Loan> {
        self.ledger
            .loan(loan_id)
            .or_else(|| self.history.loan(loan_id))
    }

    /// Moves terminal reservations and closed loans into the history and
    /// returns how many records moved.
    ///
    /// Call on committed state: the history is copied first if a staged clone
    /// still shares it.
    pub fn archive_settled(&mut self) -> usize {
        let (settled, live): (BTreeMap<_, _>, BTreeMap<_, _>) =
            std::mem::take(&mut self.reservations)
                .into_iter()
                .partition(|(_, r)| r.status.is_terminal());
        self.reservations = live;
        let loans = self.ledger.take_closed_loans();
        let moved = settled.len() + loans.len();
        if moved > 0 {
            Arc::make_mut(&mut self.history).record(settled.into_values(), loans);
            debug!(book_title_id = %self.title.id, moved, "settled records archived");
        }
        moved
    }

    /// The `Pending`/`Ready` reservation of `card_id`, if any.
    #[must_use]
    pub fn active_reservation_for(&self, card_id: CardId) -> Option<&Reservation> {
        self.reservations
            .values()
            .find(|r| r.card_id == card_id && r.status.is_active())
    }

    /// The reservation if it is active and its hold, if any, has not passed
    /// its deadline at `now`.
    #[must_use]
    pub fn live_reservation(
        &self,
        reservation_id: ReservationId,
        now: DateTime<Utc>,
    ) -> Option<&Reservation> {
        let reservation = self
            .reservations
            .get(&reservation_id)
            .filter(|r| r.status.is_active())?;
        let lapsed = self
            .holds
            .hold_for_reservation(reservation_id)
            .is_some_and(|hold| hold.is_expired(now));
        (!lapsed).then_some(reservation)
    }

    /// Active reservations keyed by id.
    #[must_use]
    pub fn active_reservations(&self) -> BTreeMap<ReservationId, CardId> {
        self.reservations
            .values()
            .filter(|r| r.status.is_active())
            .map(|r| (r.reservation_id, r.card_id))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Creates a reservation and either holds a free copy for it or queues it.
    ///
    /// A hold conflict is recovered by queueing instead.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotReservable`] if the title has no circulating copy.
    pub fn request_reservation(
        &mut self,
        card_id: CardId,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<AllocationOutcome> {
        if self.ledger.total_copies() == 0 {
            return Err(AllocationError::NotReservable(self.title.id));
        }

        let reservation_id = ctx.ids.next_reservation();
        self.reservations.insert(
            reservation_id,
            Reservation::new(reservation_id, card_id, self.title.id, ctx.now),
        );

        if let Some(copy) = self.ledger.free_copy(&self.holds).cloned() {
            match self.holds.create_hold(
                ctx.ids.next_hold(),
                reservation_id,
                &copy,
                ctx.now,
                ctx.hold_hours,
            ) {
                Ok(hold) => {
                    self.mark_ready(reservation_id, hold.expires_at);
                    debug!(%reservation_id, copy_id = %copy.copy_id, "copy held on request");
                    return Ok(AllocationOutcome::Hold {
                        reservation_id,
                        copy_id: copy.copy_id,
                        expires_at: hold.expires_at,
                    });
                }
                Err(err @ AllocationError::Conflict(_)) => {
                    ctx.hold_conflicts += 1;
                    warn!(%reservation_id, copy_id = %copy.copy_id, error = %err, "hold conflict, queueing instead");
                }
                Err(err) => return Err(err),
            }
        }

        let position = self.queue.enqueue(ctx.ids.next_queue(), reservation_id)?;
        debug!(%reservation_id, position, "no free copy, queued");
        Ok(AllocationOutcome::Queue {
            reservation_id,
            position,
        })
    }

    /// Promotes the head of the queue if a copy is free.
    ///
    /// Promotes at most one waiter. Returns `None` when nobody waits or the
    /// defensive recheck finds no free copy.
    ///
    /// # Errors
    ///
    /// Propagates hold or lookup failures, which indicate corrupted state.
    pub fn on_copy_released(
        &mut self,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<Option<Promotion>> {
        let Some(next) = self.queue.peek_next() else {
            return Ok(None);
        };
        let Some(copy) = self.ledger.free_copy(&self.holds).cloned() else {
            debug!(reservation_id = %next, "release observed but no copy is free");
            return Ok(None);
        };
        let card_id = self.reservation(next)?.card_id;

        let hold = self.holds.create_hold(
            ctx.ids.next_hold(),
            next,
            &copy,
            ctx.now,
            ctx.hold_hours,
        )?;
        self.mark_ready(next, hold.expires_at);
        self.queue.dequeue(next);

        let promotion = Promotion {
            reservation_id: next,
            card_id,
            book_title_id: self.title.id,
            copy_id: copy.copy_id,
            expires_at: hold.expires_at,
        };
        info!(reservation_id = %next, copy_id = %copy.copy_id, %card_id, "promoted next waiter");
        ctx.promoted.push(promotion.clone());
        Ok(Some(promotion))
    }

    /// Removes every hold past its deadline, marks those reservations
    /// `Expired` and promotes one waiter per freed copy.
    ///
    /// # Errors
    ///
    /// Propagates promotion failures.
    pub fn expire_stale(&mut self, ctx: &mut TitleContext<'_>) -> AllocationResult<usize> {
        let stale = self.holds.expire_stale_holds(ctx.now);
        let count = stale.len();
        for hold in stale {
            if let Some(reservation) = self.reservations.get_mut(&hold.reservation_id) {
                if reservation.status == ReservationStatus::Ready {
                    reservation.status = ReservationStatus::Expired;
                }
            }
            info!(reservation_id = %hold.reservation_id, copy_id = %hold.copy_id, "hold expired");
            ctx.expired.push(ExpiredHold {
                reservation_id: hold.reservation_id,
                book_title_id: hold.book_title_id,
                copy_id: hold.copy_id,
            });
            self.on_copy_released(ctx)?;
        }
        Ok(count)
    }

    /// Cancels an active reservation and lets the freed copy cascade.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::InvalidState`] if the reservation is terminal
    pub fn cancel(
        &mut self,
        reservation_id: ReservationId,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<Option<Promotion>> {
        self.ensure_active(reservation_id, "cancel")?;
        self.holds.release_hold(reservation_id);
        self.queue.dequeue(reservation_id);
        self.set_status(reservation_id, ReservationStatus::Cancelled);
        info!(%reservation_id, "reservation cancelled");
        self.on_copy_released(ctx)
    }

    /// Marks an active reservation `Fulfilled`, releasing its hold and queue
    /// slot. Returns the released hold.
    ///
    /// Does not promote: the copy goes out on loan.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::InvalidState`] if the reservation is terminal
    pub fn fulfill(
        &mut self,
        reservation_id: ReservationId,
    ) -> AllocationResult<Option<ReservationHold>> {
        self.ensure_active(reservation_id, "fulfill")?;
        self.set_status(reservation_id, ReservationStatus::Fulfilled);
        let hold = self.holds.release_hold(reservation_id);
        self.queue.dequeue(reservation_id);
        info!(%reservation_id, "reservation fulfilled");
        Ok(hold)
    }

    // ------------------------------------------------------------------------
    // Copy lifecycle
    // ------------------------------------------------------------------------

    /// Adds a newly acquired copy and promotes a waiter onto it.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the copy already exists.
    pub fn add_copy(
        &mut self,
        copy_id: CopyId,
        condition: String,
        price: Price,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<Option<Promotion>> {
        self.ledger
            .add_copy(BookCopy::new(copy_id, self.title.id, condition, price))?;
        self.on_copy_released(ctx)
    }

    /// Lends `copy_id` to `card_id`, fulfilling the card's reservation for
    /// this title if it has one.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown copy
    /// - [`AllocationError::Conflict`] if the copy is not on the shelf or is
    ///   held for someone else
    pub fn lend(
        &mut self,
        copy_id: CopyId,
        card_id: CardId,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<LoanReceipt> {
        let copy = self.ledger.copy(copy_id)?;
        if copy.availability_status != AvailabilityStatus::Available {
            return Err(AllocationError::Conflict(format!(
                "copy {copy_id} is {}",
                copy.availability_status
            )));
        }
        if let Some(hold) = self.holds.hold_for_copy(copy_id) {
            let holder = self.reservation(hold.reservation_id)?;
            if holder.card_id != card_id {
                return Err(AllocationError::Conflict(format!(
                    "copy {copy_id} is held for reservation {}",
                    hold.reservation_id
                )));
            }
        }

        let fulfilled = self
            .active_reservation_for(card_id)
            .map(|r| r.reservation_id);
        let mut freed_other_copy = false;
        if let Some(reservation_id) = fulfilled {
            if let Some(hold) = self.fulfill(reservation_id)? {
                freed_other_copy = hold.copy_id != copy_id;
            }
        }

        let loan_id = ctx.ids.next_loan();
        self.ledger.open_loan(Loan {
            loan_id,
            copy_id,
            card_id,
            loan_date: ctx.now,
            return_date: None,
        })?;
        debug!(%loan_id, %copy_id, %card_id, "copy lent");

        let promoted = if freed_other_copy {
            self.on_copy_released(ctx)?
        } else {
            None
        };

        Ok(LoanReceipt {
            loan_id,
            copy_id,
            book_title_id: self.title.id,
            fulfilled,
            promoted,
        })
    }

    /// Puts a copy back on the shelf, closing its open loan if there is one,
    /// and promotes the next waiter.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] for an unknown copy.
    pub fn return_copy(
        &mut self,
        copy_id: CopyId,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<ReturnOutcome> {
        self.ledger.copy(copy_id)?;
        if let Some(loan_id) = self.ledger.close_loan_for(copy_id, ctx.now) {
            debug!(%loan_id, %copy_id, "loan closed");
        }
        self.ledger
            .mark_copy_status(copy_id, AvailabilityStatus::Available)?;
        let promoted = self.on_copy_released(ctx)?;
        Ok(ReturnOutcome {
            copy_id,
            book_title_id: self.title.id,
            promoted,
        })
    }

    /// Changes a copy's stored status.
    ///
    /// Withdrawing a held copy (Damaged/Lost) puts its reservation back at the
    /// head of the queue, then the usual release logic re-serves it from
    /// another free copy if one exists.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown copy
    /// - [`AllocationError::Conflict`] when marking a held copy `OnLoan`
    pub fn mark_copy_status(
        &mut self,
        copy_id: CopyId,
        status: AvailabilityStatus,
        ctx: &mut TitleContext<'_>,
    ) -> AllocationResult<Option<Promotion>> {
        let previous = self.ledger.copy(copy_id)?.availability_status;
        if previous == status {
            return Ok(None);
        }

        match status {
            AvailabilityStatus::OnLoan => {
                if let Some(hold) = self.holds.hold_for_copy(copy_id) {
                    return Err(AllocationError::Conflict(format!(
                        "copy {copy_id} is held for reservation {}",
                        hold.reservation_id
                    )));
                }
                self.ledger.mark_copy_status(copy_id, status)?;
                Ok(None)
            }
            AvailabilityStatus::Damaged | AvailabilityStatus::Lost => {
                if let Some(hold) = self.holds.hold_for_copy(copy_id).cloned() {
                    self.holds.release_hold(hold.reservation_id);
                    if let Some(reservation) = self.reservations.get_mut(&hold.reservation_id) {
                        reservation.status = ReservationStatus::Pending;
                        reservation.expiration_date = None;
                    }
                    self.queue
                        .enqueue_front(ctx.ids.next_queue(), hold.reservation_id)?;
                    warn!(
                        reservation_id = %hold.reservation_id,
                        %copy_id,
                        %status,
                        "held copy withdrawn, reservation moved to queue head"
                    );
                }
                self.ledger.close_loan_for(copy_id, ctx.now);
                self.ledger.mark_copy_status(copy_id, status)?;
                self.on_copy_released(ctx)
            }
            AvailabilityStatus::Available => {
                self.ledger.close_loan_for(copy_id, ctx.now);
                self.ledger.mark_copy_status(copy_id, status)?;
                self.on_copy_released(ctx)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------------

    /// Copy counts as of `now`.
    #[must_use]
    pub fn availability(&self, now: DateTime<Utc>) -> Availability {
        let total_copies = self.ledger.total_copies();
        let available_copies = self.ledger.count_available_copies(&self.holds, now);
        Availability {
            book_title_id: self.title.id,
            total_copies,
            available_copies,
            checked_out_copies: self.ledger.checked_out_copies(),
            held_copies: u32::try_from(self.holds.active_count(now)).unwrap_or(u32::MAX),
            is_reservable: total_copies > 0,
            will_hold_if_available: available_copies > 0,
        }
    }

    /// The queue in position order.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<QueueSnapshotEntry> {
        self.queue
            .entries()
            .iter()
            .filter_map(|entry| {
                let reservation = self.reservations.get(&entry.reservation_id)?;
                Some(QueueSnapshotEntry {
                    reservation_id: entry.reservation_id,
                    card_id: reservation.card_id,
                    position: entry.position,
                    status: reservation.status,
                })
            })
            .collect()
    }

    /// The hold of a reservation with details of the held copy.
    #[must_use]
    pub fn hold_view(&self, reservation_id: ReservationId) -> Option<HoldView> {
        let hold = self.holds.hold_for_reservation(reservation_id)?;
        let reservation = self.reservations.get(&reservation_id)?;
        let copy = self.ledger.copy(hold.copy_id).ok()?;
        Some(HoldView {
            hold_id: hold.hold_id,
            reservation_id,
            card_id: reservation.card_id,
            copy_id: hold.copy_id,
            book_title_id: self.title.id,
            title: self.title.name.clone(),
            condition: copy.condition.clone(),
            price: copy.price,
            expires_at: hold.expires_at,
        })
    }

    /// Checks the allocation invariants and describes the first violation.
    ///
    /// # Errors
    ///
    /// Returns a description of the broken invariant.
    pub fn check_invariants(&self, now: DateTime<Utc>) -> Result<(), String> {
        let active_holds = u32::try_from(self.holds.active_count(now)).unwrap_or(u32::MAX);
        let on_loan = self.ledger.checked_out_copies();
        let total = self.ledger.total_copies();
        if active_holds + on_loan > total {
            return Err(format!(
                "{active_holds} holds + {on_loan} loans exceed {total} copies"
            ));
        }

        let pending: BTreeSet<ReservationId> = self
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Pending)
            .map(|r| r.reservation_id)
            .collect();
        let queued: BTreeSet<ReservationId> = self
            .queue
            .entries()
            .iter()
            .map(|entry| entry.reservation_id)
            .collect();
        if pending != queued || queued.len() != self.queue.len() {
            return Err(format!("queued {queued:?} differ from pending {pending:?}"));
        }
        for (index, entry) in self.queue.entries().iter().enumerate() {
            if usize::try_from(entry.position).ok() != Some(index + 1) {
                return Err(format!(
                    "reservation {} at position {} in slot {}",
                    entry.reservation_id,
                    entry.position,
                    index + 1
                ));
            }
        }

        let mut held_copies = BTreeSet::new();
        for hold in self.holds.iter() {
            if !held_copies.insert(hold.copy_id) {
                return Err(format!("copy {} has two holds", hold.copy_id));
            }
            let status = self.reservation(hold.reservation_id).map(|r| r.status);
            if status != Ok(ReservationStatus::Ready) {
                return Err(format!(
                    "hold for reservation {} whose status is {status:?}",
                    hold.reservation_id
                ));
            }
            let copy_status = self.ledger.copy(hold.copy_id).map(|c| c.availability_status);
            if copy_status != Ok(AvailabilityStatus::Available) {
                return Err(format!(
                    "held copy {} is {copy_status:?}",
                    hold.copy_id
                ));
            }
        }
        for reservation in self.reservations.values() {
            if reservation.status == ReservationStatus::Ready
                && self
                    .holds
                    .hold_for_reservation(reservation.reservation_id)
                    .is_none()
            {
                return Err(format!(
                    "reservation {} is Ready without a hold",
                    reservation.reservation_id
                ));
            }
        }
        if let Some(reservation) = self.history.reservations().find(|r| r.status.is_active()) {
            return Err(format!(
                "archived reservation {} is {}",
                reservation.reservation_id, reservation.status
            ));
        }
        Ok(())
    }

    fn ensure_active(
        &self,
        reservation_id: ReservationId,
        operation: &'static str,
    ) -> AllocationResult<()> {
        let status = self.reservation(reservation_id)?.status;
        if status.is_terminal() {
            return Err(AllocationError::InvalidState {
                reservation_id,
                status,
                operation,
            });
        }
        Ok(())
    }

    fn set_status(&mut self, reservation_id: ReservationId, status: ReservationStatus) {
        if let Some(reservation) = self.reservations.get_mut(&reservation_id) {
            reservation.status = status;
        }
    }

    fn mark_ready(&mut self, reservation_id: ReservationId, expires_at: DateTime<Utc>) {
        if let Some(reservation) = self.reservations.get_mut(&reservation_id) {
            reservation.status = ReservationStatus::Ready;
            reservation.expiration_date = Some(expires_at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use circulation_core::{BookTitleId, ErrorKind};

    const TITLE: BookTitleId = BookTitleId::new(1);

    fn title_with_copies(copies: u64) -> TitleState {
        let mut state = TitleState::new(BookTitle {
            id: TITLE,
            name: "Dune".into(),
        });
        for id in 1..=copies {
            state
                .ledger
                .add_copy(BookCopy::new(
                    CopyId::new(id),
                    TITLE,
                    "Good".into(),
                    Price::from_cents(1_500),
                ))
                .unwrap();
        }
        state
    }

    fn reserve(
        state: &mut TitleState,
        ids: &IdSequences,
        now: DateTime<Utc>,
        card: u64,
    ) -> AllocationOutcome {
        let mut ctx = TitleContext::new(now, 24, ids);
        state
            .request_reservation(CardId::new(card), &mut ctx)
            .unwrap()
    }

    #[test]
    fn test_first_request_gets_hold_then_queue() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);

        let first = reserve(&mut state, &ids, now, 1);
        assert!(matches!(first, AllocationOutcome::Hold { expires_at, .. } if expires_at == now + Duration::hours(24)));
        assert!(state.queue_snapshot().is_empty());

        let second = reserve(&mut state, &ids, now, 2);
        let third = reserve(&mut state, &ids, now, 3);
        assert!(matches!(second, AllocationOutcome::Queue { position: 1, .. }));
        assert!(matches!(third, AllocationOutcome::Queue { position: 2, .. }));
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_title_without_copies_is_not_reservable() {
        let ids = IdSequences::new();
        let mut state = title_with_copies(0);
        let mut ctx = TitleContext::new(Utc::now(), 24, &ids);
        let err = state
            .request_reservation(CardId::new(1), &mut ctx)
            .unwrap_err();
        assert_eq!(err, AllocationError::NotReservable(TITLE));
        assert_eq!(state.reservations().count(), 0);
    }

    #[test]
    fn test_cancel_ready_promotes_next() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();
        let waiting = reserve(&mut state, &ids, now, 2).reservation_id();

        let mut ctx = TitleContext::new(now, 24, &ids);
        let promotion = state.cancel(held, &mut ctx).unwrap().unwrap();
        assert_eq!(promotion.reservation_id, waiting);
        assert_eq!(ctx.promoted().len(), 1);
        assert_eq!(
            state.reservation(waiting).unwrap().status,
            ReservationStatus::Ready
        );

        let err = state.cancel(held, &mut ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_expire_stale_marks_expired_and_promotes() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();
        let waiting = reserve(&mut state, &ids, now, 2).reservation_id();

        let later = now + Duration::hours(25);
        let mut ctx = TitleContext::new(later, 24, &ids);
        assert_eq!(state.expire_stale(&mut ctx).unwrap(), 1);
        assert_eq!(
            state.reservation(held).unwrap().status,
            ReservationStatus::Expired
        );
        assert_eq!(ctx.promoted()[0].reservation_id, waiting);
        assert_eq!(
            state.reservation(waiting).unwrap().expiration_date,
            Some(later + Duration::hours(24))
        );
        state.check_invariants(later).unwrap();
    }

    #[test]
    fn test_lend_fulfills_card_reservation() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(2);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();

        let mut ctx = TitleContext::new(now, 24, &ids);
        let receipt = state
            .lend(CopyId::new(1), CardId::new(1), &mut ctx)
            .unwrap();
        assert_eq!(receipt.fulfilled, Some(held));
        assert!(receipt.promoted.is_none());
        assert_eq!(
            state.reservation(held).unwrap().status,
            ReservationStatus::Fulfilled
        );
        assert!(state.holds().is_empty());
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_lend_held_copy_to_other_card_conflicts() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        reserve(&mut state, &ids, now, 1);

        let mut ctx = TitleContext::new(now, 24, &ids);
        let err = state
            .lend(CopyId::new(1), CardId::new(2), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_lend_other_copy_releases_held_copy() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(2);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();

        let mut ctx = TitleContext::new(now, 24, &ids);
        let receipt = state
            .lend(CopyId::new(2), CardId::new(1), &mut ctx)
            .unwrap();
        assert_eq!(receipt.fulfilled, Some(held));
        assert!(state.holds().is_empty());

        let availability = state.availability(now);
        assert_eq!(availability.available_copies, 1);
        assert_eq!(availability.checked_out_copies, 1);

        let next = reserve(&mut state, &ids, now, 2);
        assert!(matches!(next, AllocationOutcome::Hold { copy_id, .. } if copy_id == CopyId::new(1)));
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_withdrawn_held_copy_requeues_at_head() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();
        let waiting = reserve(&mut state, &ids, now, 2).reservation_id();

        let mut ctx = TitleContext::new(now, 24, &ids);
        let promoted = state
            .mark_copy_status(CopyId::new(1), AvailabilityStatus::Damaged, &mut ctx)
            .unwrap();
        assert!(promoted.is_none());
        let snapshot = state.queue_snapshot();
        assert_eq!(snapshot[0].reservation_id, held);
        assert_eq!(snapshot[1].reservation_id, waiting);
        assert_eq!(snapshot[1].position, 2);
        state.check_invariants(now).unwrap();

        // A replacement copy serves the displaced reservation first.
        let promotion = state
            .add_copy(CopyId::new(2), "New".into(), Price::default(), &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(promotion.reservation_id, held);
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_withdrawn_held_copy_rebinds_to_free_copy() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(2);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();

        let mut ctx = TitleContext::new(now, 24, &ids);
        let promotion = state
            .mark_copy_status(CopyId::new(1), AvailabilityStatus::Lost, &mut ctx)
            .unwrap()
            .unwrap();
        assert_eq!(promotion.reservation_id, held);
        assert_eq!(promotion.copy_id, CopyId::new(2));
        assert!(state.queue().is_empty());
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_return_promotes_and_closes_loan() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        let mut ctx = TitleContext::new(now, 24, &ids);
        let receipt = state
            .lend(CopyId::new(1), CardId::new(9), &mut ctx)
            .unwrap();
        let waiting = reserve(&mut state, &ids, now, 2).reservation_id();

        let outcome = state.return_copy(CopyId::new(1), &mut ctx).unwrap();
        assert_eq!(outcome.promoted.unwrap().reservation_id, waiting);
        assert!(
            state
                .loan(receipt.loan_id)
                .unwrap()
                .return_date
                .is_some()
        );
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_availability_counts() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(3);
        let mut ctx = TitleContext::new(now, 24, &ids);
        state
            .lend(CopyId::new(3), CardId::new(9), &mut ctx)
            .unwrap();
        reserve(&mut state, &ids, now, 1);

        let availability = state.availability(now);
        assert_eq!(availability.total_copies, 3);
        assert_eq!(availability.checked_out_copies, 1);
        assert_eq!(availability.held_copies, 1);
        assert_eq!(availability.available_copies, 1);
        assert!(availability.will_hold_if_available);
    }

    #[test]
    fn test_archive_moves_settled_records_out_of_staged_clones() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(2);
        let mut ctx = TitleContext::new(now, 24, &ids);
        let cancelled = reserve(&mut state, &ids, now, 1).reservation_id();
        let live = reserve(&mut state, &ids, now, 2).reservation_id();
        state.cancel(cancelled, &mut ctx).unwrap();
        let receipt = state
            .lend(CopyId::new(1), CardId::new(9), &mut ctx)
            .unwrap();
        state.return_copy(CopyId::new(1), &mut ctx).unwrap();

        assert_eq!(state.archive_settled(), 2);
        assert_eq!(state.archive_settled(), 0);

        let staged = state.clone();
        assert!(std::ptr::eq(staged.history(), state.history()));
        assert_eq!(state.history().len(), 2);
        assert_eq!(
            state.reservation(cancelled).unwrap().status,
            ReservationStatus::Cancelled
        );
        assert!(state.loan(receipt.loan_id).unwrap().return_date.is_some());
        assert_eq!(state.reservations().count(), 2);
        assert_eq!(
            state.active_reservations().into_keys().collect::<Vec<_>>(),
            vec![live]
        );

        let err = state.cancel(cancelled, &mut ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        state.check_invariants(now).unwrap();
    }

    #[test]
    fn test_lapsed_hold_is_not_live() {
        let ids = IdSequences::new();
        let now = Utc::now();
        let mut state = title_with_copies(1);
        let held = reserve(&mut state, &ids, now, 1).reservation_id();

        assert!(state.live_reservation(held, now).is_some());
        assert!(state.live_reservation(held, now + Duration::hours(24)).is_none());
        assert_eq!(
            state.reservation(held).unwrap().status,
            ReservationStatus::Ready
        );
    }
}
