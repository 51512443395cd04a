//! The allocation engine: per-title critical sections over [`TitleState`].
//!
//! Every mutating operation follows the same shape:
//!
//! 1. acquire the title lock (bounded by `lock_timeout`)
//! 2. clone the state and expire stale holds on the clone
//! 3. run the operation on the clone
//! 4. on success, swap the clone in, archive settled records and update the
//!    global indexes
//! 5. release the lock, then record metrics and send notifications
//!
//! A failure at step 2 or 3 discards the clone, so callers observe either the
//! whole operation or none of it. The clone shares the title's archived
//! history instead of copying it.

use crate::config::EngineConfig;
use crate::ids::IdSequences;
use crate::metrics::{AllocationMetrics, ExpiryMetrics, NotificationMetrics};
use crate::registry::TitleRegistry;
use crate::title::{TitleContext, TitleState};
use chrono::{DateTime, Utc};
use circulation_core::environment::Clock;
use circulation_core::{
    AllocationError, AllocationOutcome, AllocationResult, Availability, AvailabilityStatus,
    BookTitle, BookTitleId, CardId, CopyId, ExpiredHold, HoldView, LoanReceipt, Notification,
    NotificationEmitter, PatronDirectory, Price, Promotion, QueueSnapshotEntry, ReaderSummary,
    Reservation, ReservationId, ReturnOutcome, ReturnTarget, SweepReport, validate_hold_hours,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a committed critical section produced besides its return value.
struct Committed<T> {
    value: T,
    expired: Vec<ExpiredHold>,
    promoted: Vec<Promotion>,
}

/// Orchestrates holds, queues and promotions for every registered title.
///
/// Cheap to share: wrap it in an [`Arc`] and hand clones to request handlers
/// and the [`ExpirySweeper`](crate::ExpirySweeper).
pub struct AllocationEngine {
    config: EngineConfig,
    registry: TitleRegistry,
    ids: IdSequences,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn NotificationEmitter>,
    directory: Arc<dyn PatronDirectory>,
}

impl AllocationEngine {
    /// Creates an engine with no titles.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn NotificationEmitter>,
        directory: Arc<dyn PatronDirectory>,
    ) -> Self {
        Self {
            registry: TitleRegistry::new(config.lock_timeout),
            config,
            ids: IdSequences::new(),
            clock,
            emitter,
            directory,
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registered titles in ascending id order.
    pub async fn titles(&self) -> Vec<BookTitleId> {
        self.registry.title_ids().await
    }

    // ------------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------------

    /// Registers a title so copies and reservations can be attached to it.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the title already exists.
    #[tracing::instrument(skip(self, name), name = "register_title")]
    pub async fn register_title(
        &self,
        book_title_id: BookTitleId,
        name: String,
    ) -> AllocationResult<BookTitle> {
        let title = BookTitle {
            id: book_title_id,
            name,
        };
        self.registry.register(TitleState::new(title.clone())).await?;
        AllocationMetrics::record_queue_length(book_title_id.value(), 0);
        info!(%book_title_id, "title registered");
        Ok(title)
    }

    /// Adds a newly acquired copy; a waiting reservation may be promoted onto it.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::Conflict`] if the copy id is already in use
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self, condition), name = "add_copy")]
    pub async fn add_copy(
        &self,
        book_title_id: BookTitleId,
        copy_id: CopyId,
        condition: String,
        price: Price,
    ) -> AllocationResult<Option<Promotion>> {
        self.registry.claim_copy(copy_id, book_title_id).await?;
        let result = self
            .transact(book_title_id, |state, ctx| {
                state.add_copy(copy_id, condition, price, ctx)
            })
            .await;
        if result.is_err() {
            self.registry.abandon_copy(copy_id).await;
        }
        result
    }

    /// Changes a copy's stored availability status.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown copy
    /// - [`AllocationError::Conflict`] when marking a held copy `OnLoan`
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "mark_copy_status")]
    pub async fn mark_copy_status(
        &self,
        copy_id: CopyId,
        status: AvailabilityStatus,
    ) -> AllocationResult<Option<Promotion>> {
        let book_title_id = self.registry.title_of_copy(copy_id).await?;
        self.transact(book_title_id, |state, ctx| {
            state.mark_copy_status(copy_id, status, ctx)
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Reservations
    // ------------------------------------------------------------------------

    /// Checks that `card_id` may reserve `book_title_id`.
    ///
    /// Only live reservations count: a `Ready` reservation whose hold deadline
    /// has passed is treated as expired even if no sweep has run yet.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::DuplicateReservation`] if the card already has a
    ///   live reservation for the title
    /// - [`AllocationError::ReservationLimitReached`] if the card is at the
    ///   active reservation limit
    /// - [`AllocationError::TransientInfra`] on lock timeout
    pub async fn check_eligibility(
        &self,
        card_id: CardId,
        book_title_id: BookTitleId,
    ) -> AllocationResult<()> {
        let active = self.live_reservations(card_id, self.now()).await?;
        if active.iter().any(|r| r.book_title_id == book_title_id) {
            return Err(AllocationError::DuplicateReservation {
                card_id,
                book_title_id,
            });
        }
        if active.len() >= self.config.max_active_reservations {
            return Err(AllocationError::ReservationLimitReached {
                card_id,
                limit: self.config.max_active_reservations,
            });
        }
        Ok(())
    }

    /// Eligibility check followed by a reservation request with the
    /// configured pickup window.
    ///
    /// The duplicate check is repeated under the title lock, so concurrent
    /// requests from one card for one title yield a single reservation.
    ///
    /// # Errors
    ///
    /// Eligibility errors, plus those of [`request_reservation`](Self::request_reservation).
    #[tracing::instrument(skip(self), name = "reserve")]
    pub async fn reserve(
        &self,
        card_id: CardId,
        book_title_id: BookTitleId,
    ) -> AllocationResult<AllocationOutcome> {
        self.check_eligibility(card_id, book_title_id).await?;
        let outcome = self
            .transact(book_title_id, |state, ctx| {
                if state.active_reservation_for(card_id).is_some() {
                    return Err(AllocationError::DuplicateReservation {
                        card_id,
                        book_title_id,
                    });
                }
                state.request_reservation(card_id, ctx)
            })
            .await?;
        record_outcome(&outcome);
        Ok(outcome)
    }

    /// Creates a reservation: an immediate hold if a copy is free, otherwise
    /// a queue slot. Eligibility is the caller's responsibility.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::NotReservable`] if the title has no circulating copy
    /// - [`AllocationError::InvalidHoldWindow`] if `hold_hours` is out of range
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "request_reservation")]
    pub async fn request_reservation(
        &self,
        card_id: CardId,
        book_title_id: BookTitleId,
        hold_hours: u32,
    ) -> AllocationResult<AllocationOutcome> {
        let outcome = self
            .transact_at(book_title_id, self.now(), hold_hours, |state, ctx| {
                state.request_reservation(card_id, ctx)
            })
            .await?;
        record_outcome(&outcome);
        Ok(outcome)
    }

    /// Promotes the next waiter of a title if a copy is free.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "on_copy_released")]
    pub async fn on_copy_released(
        &self,
        book_title_id: BookTitleId,
        hold_hours: u32,
    ) -> AllocationResult<Option<Promotion>> {
        self.transact_at(book_title_id, self.now(), hold_hours, |state, ctx| {
            state.on_copy_released(ctx)
        })
        .await
    }

    /// Cancels a `Pending` or `Ready` reservation. A freed copy cascades to
    /// the next waiter within the same critical section.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::InvalidState`] if the reservation is terminal
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "cancel_reservation")]
    pub async fn cancel_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> AllocationResult<Option<Promotion>> {
        let book_title_id = self.registry.title_of_reservation(reservation_id).await?;
        let promoted = self
            .transact(book_title_id, |state, ctx| state.cancel(reservation_id, ctx))
            .await?;
        AllocationMetrics::record_cancellation();
        Ok(promoted)
    }

    /// Marks an active reservation `Fulfilled` and releases its hold.
    ///
    /// No promotion follows: the held copy is expected to go out on loan.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::InvalidState`] if the reservation is terminal
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "fulfill_reservation")]
    pub async fn fulfill_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> AllocationResult<Reservation> {
        let book_title_id = self.registry.title_of_reservation(reservation_id).await?;
        let reservation = self
            .transact(book_title_id, |state, _| {
                state.fulfill(reservation_id)?;
                state.reservation(reservation_id).cloned()
            })
            .await?;
        AllocationMetrics::record_fulfillment();
        Ok(reservation)
    }

    /// Fulfils the card's active reservation for a title, if it has one.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "fulfill_for_card")]
    pub async fn fulfill_for_card(
        &self,
        card_id: CardId,
        book_title_id: BookTitleId,
    ) -> AllocationResult<Option<ReservationId>> {
        let fulfilled = self
            .transact(book_title_id, |state, _| {
                let Some(reservation_id) = state
                    .active_reservation_for(card_id)
                    .map(|r| r.reservation_id)
                else {
                    return Ok(None);
                };
                state.fulfill(reservation_id)?;
                Ok(Some(reservation_id))
            })
            .await?;
        if fulfilled.is_some() {
            AllocationMetrics::record_fulfillment();
        }
        Ok(fulfilled)
    }

    /// Expires every hold whose deadline is at or before `now`, title by
    /// title, promoting one waiter per freed copy.
    ///
    /// A title whose lock cannot be taken is skipped and listed in
    /// [`SweepReport::failed_titles`]; the remaining titles are still swept.
    ///
    /// # Errors
    ///
    /// [`AllocationError::InvalidHoldWindow`] if `hold_hours` is out of range;
    /// no title is touched in that case.
    #[tracing::instrument(skip(self), name = "expire_stale_reservations")]
    pub async fn expire_stale_reservations(
        &self,
        now: DateTime<Utc>,
        hold_hours: u32,
    ) -> AllocationResult<SweepReport> {
        validate_hold_hours(hold_hours)?;
        let started = Instant::now();
        let mut report = SweepReport::default();

        for book_title_id in self.registry.title_ids().await {
            match self
                .commit(book_title_id, now, hold_hours, |_, _| Ok(()))
                .await
            {
                Ok(committed) => {
                    report.expired.extend(committed.expired);
                    report.promoted.extend(committed.promoted);
                }
                Err(err) => {
                    warn!(%book_title_id, error = %err, "sweep skipped title");
                    ExpiryMetrics::record_title_failure();
                    report.failed_titles.push(book_title_id);
                }
            }
        }

        ExpiryMetrics::record_sweep(started.elapsed());
        if report.expired.is_empty() && report.failed_titles.is_empty() {
            debug!("sweep found nothing to expire");
        } else {
            info!(
                expired = report.expired_count(),
                promoted = report.promoted.len(),
                failed_titles = report.failed_titles.len(),
                "sweep completed"
            );
        }
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Loans
    // ------------------------------------------------------------------------

    /// Lends a copy. The card's active reservation for the title, if any, is
    /// fulfilled; if its hold was on a different copy, that copy cascades to
    /// the next waiter.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown copy
    /// - [`AllocationError::Conflict`] if the copy is not on the shelf or is
    ///   held for another reservation
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "lend_copy")]
    pub async fn lend_copy(
        &self,
        copy_id: CopyId,
        card_id: CardId,
    ) -> AllocationResult<LoanReceipt> {
        let book_title_id = self.registry.title_of_copy(copy_id).await?;
        let receipt = self
            .transact(book_title_id, |state, ctx| state.lend(copy_id, card_id, ctx))
            .await?;
        self.registry.record_loan(receipt.loan_id, copy_id).await;
        if receipt.fulfilled.is_some() {
            AllocationMetrics::record_fulfillment();
        }
        Ok(receipt)
    }

    /// Puts a copy back on the shelf and promotes the next waiter.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown copy or loan
    /// - [`AllocationError::TransientInfra`] on lock timeout
    #[tracing::instrument(skip(self), name = "return_copy")]
    pub async fn return_copy(&self, target: ReturnTarget) -> AllocationResult<ReturnOutcome> {
        let copy_id = match target {
            ReturnTarget::Copy(copy_id) => copy_id,
            ReturnTarget::Loan(loan_id) => self.registry.copy_of_loan(loan_id).await?,
        };
        let book_title_id = self.registry.title_of_copy(copy_id).await?;
        self.transact(book_title_id, |state, ctx| state.return_copy(copy_id, ctx))
            .await
    }

    // ------------------------------------------------------------------------
    // Projections
    // ------------------------------------------------------------------------

    /// Queued reservations of a title in position order.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::TransientInfra`] on lock timeout
    pub async fn queue_snapshot(
        &self,
        book_title_id: BookTitleId,
    ) -> AllocationResult<Vec<QueueSnapshotEntry>> {
        self.read(book_title_id, TitleState::queue_snapshot).await
    }

    /// Copy counts of a title.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::TransientInfra`] on lock timeout
    pub async fn availability(&self, book_title_id: BookTitleId) -> AllocationResult<Availability> {
        let now = self.now();
        self.read(book_title_id, |state| state.availability(now))
            .await
    }

    /// The hold of a reservation, if it has one.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::TransientInfra`] on lock timeout
    pub async fn hold_for(&self, reservation_id: ReservationId) -> AllocationResult<Option<HoldView>> {
        let book_title_id = self.registry.title_of_reservation(reservation_id).await?;
        self.read(book_title_id, |state| state.hold_view(reservation_id))
            .await
    }

    /// A reservation in its current status.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown reservation
    /// - [`AllocationError::TransientInfra`] on lock timeout
    pub async fn reservation(&self, reservation_id: ReservationId) -> AllocationResult<Reservation> {
        let book_title_id = self.registry.title_of_reservation(reservation_id).await?;
        self.read(book_title_id, |state| state.reservation(reservation_id).cloned())
            .await?
    }

    /// Live reservations of a card.
    ///
    /// # Errors
    ///
    /// [`AllocationError::TransientInfra`] on lock timeout.
    pub async fn reader_summary(&self, card_id: CardId) -> AllocationResult<ReaderSummary> {
        let active = self.live_reservations(card_id, self.now()).await?;
        Ok(ReaderSummary {
            card_id,
            active_count: active.len(),
            can_reserve_more: active.len() < self.config.max_active_reservations,
            active,
        })
    }

    /// Checks the allocation invariants of one title.
    ///
    /// # Errors
    ///
    /// Lock errors, or [`AllocationError::Conflict`] describing the violation.
    pub async fn check_invariants(&self, book_title_id: BookTitleId) -> AllocationResult<()> {
        let now = self.now();
        self.read(book_title_id, |state| state.check_invariants(now))
            .await?
            .map_err(AllocationError::Conflict)
    }

    // ------------------------------------------------------------------------
    // Critical sections
    // ------------------------------------------------------------------------

    async fn transact<T, F>(&self, book_title_id: BookTitleId, operation: F) -> AllocationResult<T>
    where
        F: FnOnce(&mut TitleState, &mut TitleContext<'_>) -> AllocationResult<T> + Send,
        T: Send,
    {
        self.transact_at(book_title_id, self.now(), self.config.hold_hours, operation)
            .await
    }

    async fn transact_at<T, F>(
        &self,
        book_title_id: BookTitleId,
        now: DateTime<Utc>,
        hold_hours: u32,
        operation: F,
    ) -> AllocationResult<T>
    where
        F: FnOnce(&mut TitleState, &mut TitleContext<'_>) -> AllocationResult<T> + Send,
        T: Send,
    {
        self.commit(book_title_id, now, hold_hours, operation)
            .await
            .map(|committed| committed.value)
    }

    async fn commit<T, F>(
        &self,
        book_title_id: BookTitleId,
        now: DateTime<Utc>,
        hold_hours: u32,
        operation: F,
    ) -> AllocationResult<Committed<T>>
    where
        F: FnOnce(&mut TitleState, &mut TitleContext<'_>) -> AllocationResult<T> + Send,
        T: Send,
    {
        validate_hold_hours(hold_hours)?;
        let mut guard = self.registry.lock(book_title_id).await?;

        let (value, effects, title_name, before, after, queue_length) = {
            let mut staged = TitleState::clone(&guard);
            let mut ctx = TitleContext::new(now, hold_hours, &self.ids);
            staged.expire_stale(&mut ctx)?;
            let value = operation(&mut staged, &mut ctx)?;

            let before = guard.active_reservations();
            let after = staged.active_reservations();
            let queue_length = staged.queue().len();
            let title_name = staged.title().name.clone();
            *guard = staged;
            guard.archive_settled();
            (value, ctx.into_effects(), title_name, before, after, queue_length)
        };
        self.registry
            .sync_reservations(book_title_id, &before, &after)
            .await;
        drop(guard);

        let (expired, promoted, hold_conflicts) = effects;
        ExpiryMetrics::record_expired(expired.len());
        AllocationMetrics::record_promotions(promoted.len());
        AllocationMetrics::record_hold_conflicts(hold_conflicts);
        AllocationMetrics::record_queue_length(book_title_id.value(), queue_length);

        self.notify(&title_name, &promoted).await;
        Ok(Committed {
            value,
            expired,
            promoted,
        })
    }

    /// Reservations of a card that are active and not past a hold deadline,
    /// oldest first.
    ///
    /// The card index is only a candidate list; each title is consulted under
    /// its own lock.
    async fn live_reservations(
        &self,
        card_id: CardId,
        now: DateTime<Utc>,
    ) -> AllocationResult<Vec<Reservation>> {
        let mut live = Vec::new();
        for (reservation_id, book_title_id) in self.registry.active_for_card(card_id).await {
            let reservation = self
                .read(book_title_id, |state| {
                    state.live_reservation(reservation_id, now).cloned()
                })
                .await?;
            live.extend(reservation);
        }
        live.sort_by_key(|r| (r.reservation_date, r.reservation_id));
        Ok(live)
    }

    async fn read<T, F>(&self, book_title_id: BookTitleId, view: F) -> AllocationResult<T>
    where
        F: FnOnce(&TitleState) -> T + Send,
    {
        let guard = self.registry.lock(book_title_id).await?;
        Ok(view(&guard))
    }

    async fn notify(&self, title: &str, promotions: &[Promotion]) {
        for promotion in promotions {
            let Some(reader_id) = self.directory.reader_for_card(promotion.card_id) else {
                warn!(
                    card_id = %promotion.card_id,
                    reservation_id = %promotion.reservation_id,
                    "no reader for card, skipping BOOK_READY notification"
                );
                continue;
            };
            let notification = Notification::book_ready(
                reader_id,
                promotion.reservation_id,
                promotion.book_title_id,
                title,
                promotion.expires_at,
                self.clock.now(),
            );

            match tokio::time::timeout(
                self.config.notification_timeout,
                self.emitter.emit(notification),
            )
            .await
            {
                Ok(Ok(())) => {
                    debug!(reservation_id = %promotion.reservation_id, %reader_id, "BOOK_READY sent");
                }
                Ok(Err(err)) => {
                    NotificationMetrics::record_failure();
                    warn!(reservation_id = %promotion.reservation_id, error = %err, "BOOK_READY notification failed");
                }
                Err(_) => {
                    NotificationMetrics::record_failure();
                    warn!(
                        reservation_id = %promotion.reservation_id,
                        timeout_ms = self.config.notification_timeout.as_millis(),
                        "BOOK_READY notification timed out"
                    );
                }
            }
        }
    }
}

fn record_outcome(outcome: &AllocationOutcome) {
    let mode = match outcome {
        AllocationOutcome::Hold { .. } => "hold",
        AllocationOutcome::Queue { .. } => "queue",
    };
    AllocationMetrics::record_reservation(mode);
}
