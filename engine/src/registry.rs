//! Title registry: one lock per title plus the global lookup indexes.
//!
//! Lock order is always title lock first, then an index lock. Index locks are
//! held only for the duration of a map access and never across an `.await`
//! on a title lock.

use crate::metrics::AllocationMetrics;
use crate::title::TitleState;
use circulation_core::{
    AllocationError, AllocationResult, BookTitleId, CardId, CopyId, Entity, LoanId, ReservationId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::warn;

/// Keyed locks over [`TitleState`] and the cross-title indexes.
#[derive(Debug)]
pub struct TitleRegistry {
    titles: RwLock<HashMap<BookTitleId, Arc<Mutex<TitleState>>>>,
    reservations: RwLock<HashMap<ReservationId, BookTitleId>>,
    copies: RwLock<HashMap<CopyId, BookTitleId>>,
    loans: RwLock<HashMap<LoanId, CopyId>>,
    cards: RwLock<HashMap<CardId, BTreeMap<ReservationId, BookTitleId>>>,
    lock_timeout: Duration,
}

impl TitleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            titles: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            copies: RwLock::new(HashMap::new()),
            loans: RwLock::new(HashMap::new()),
            cards: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// Adds a title.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the title is already registered.
    pub async fn register(&self, state: TitleState) -> AllocationResult<()> {
        let book_title_id = state.title().id;
        let mut titles = self.titles.write().await;
        if titles.contains_key(&book_title_id) {
            return Err(AllocationError::Conflict(format!(
                "title {book_title_id} is already registered"
            )));
        }
        titles.insert(book_title_id, Arc::new(Mutex::new(state)));
        Ok(())
    }

    /// Registered title ids in ascending order.
    pub async fn title_ids(&self) -> Vec<BookTitleId> {
        let mut ids: Vec<BookTitleId> = self.titles.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Acquires the lock of `book_title_id`, waiting at most the lock timeout.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::NotFound`] for an unknown title
    /// - [`AllocationError::TransientInfra`] if the lock was not acquired in time
    pub async fn lock(
        &self,
        book_title_id: BookTitleId,
    ) -> AllocationResult<OwnedMutexGuard<TitleState>> {
        let mutex = self
            .titles
            .read()
            .await
            .get(&book_title_id)
            .cloned()
            .ok_or_else(|| AllocationError::not_found(Entity::BookTitle, book_title_id.value()))?;

        let started = Instant::now();
        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await;
        AllocationMetrics::record_lock_wait(started.elapsed());

        guard.map_err(|_| {
            warn!(%book_title_id, timeout_ms = self.lock_timeout.as_millis(), "title lock timed out");
            AllocationError::TransientInfra(format!(
                "timed out waiting for the lock of title {book_title_id}"
            ))
        })
    }

    /// Title owning a reservation.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] for an unknown reservation.
    pub async fn title_of_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> AllocationResult<BookTitleId> {
        self.reservations
            .read()
            .await
            .get(&reservation_id)
            .copied()
            .ok_or_else(|| AllocationError::not_found(Entity::Reservation, reservation_id.value()))
    }

    /// Title owning a copy.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] for an unknown copy.
    pub async fn title_of_copy(&self, copy_id: CopyId) -> AllocationResult<BookTitleId> {
        self.copies
            .read()
            .await
            .get(&copy_id)
            .copied()
            .ok_or_else(|| AllocationError::not_found(Entity::Copy, copy_id.value()))
    }

    /// Copy lent by a loan.
    ///
    /// # Errors
    ///
    /// [`AllocationError::NotFound`] for an unknown loan.
    pub async fn copy_of_loan(&self, loan_id: LoanId) -> AllocationResult<CopyId> {
        self.loans
            .read()
            .await
            .get(&loan_id)
            .copied()
            .ok_or_else(|| AllocationError::not_found(Entity::Loan, loan_id.value()))
    }

    /// Reserves a copy id for `book_title_id` before the copy is added.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the id is taken by any title.
    pub async fn claim_copy(
        &self,
        copy_id: CopyId,
        book_title_id: BookTitleId,
    ) -> AllocationResult<()> {
        let mut copies = self.copies.write().await;
        if let Some(owner) = copies.get(&copy_id) {
            return Err(AllocationError::Conflict(format!(
                "copy {copy_id} already belongs to title {owner}"
            )));
        }
        copies.insert(copy_id, book_title_id);
        Ok(())
    }

    /// Drops a claim made by [`claim_copy`](Self::claim_copy) whose copy was
    /// never added.
    pub async fn abandon_copy(&self, copy_id: CopyId) {
        self.copies.write().await.remove(&copy_id);
    }

    /// Records a loan line.
    pub async fn record_loan(&self, loan_id: LoanId, copy_id: CopyId) {
        self.loans.write().await.insert(loan_id, copy_id);
    }

    /// Brings the reservation and card indexes in line with a committed title.
    ///
    /// `before` and `after` are the title's active reservations around the
    /// commit.
    pub async fn sync_reservations(
        &self,
        book_title_id: BookTitleId,
        before: &BTreeMap<ReservationId, CardId>,
        after: &BTreeMap<ReservationId, CardId>,
    ) {
        let added: Vec<(ReservationId, CardId)> = after
            .iter()
            .filter(|(id, _)| !before.contains_key(id))
            .map(|(id, card)| (*id, *card))
            .collect();
        let removed: Vec<(ReservationId, CardId)> = before
            .iter()
            .filter(|(id, _)| !after.contains_key(id))
            .map(|(id, card)| (*id, *card))
            .collect();
        if added.is_empty() && removed.is_empty() {
            return;
        }

        if !added.is_empty() {
            let mut reservations = self.reservations.write().await;
            for (reservation_id, _) in &added {
                reservations.insert(*reservation_id, book_title_id);
            }
        }

        let mut cards = self.cards.write().await;
        for (reservation_id, card_id) in added {
            cards
                .entry(card_id)
                .or_default()
                .insert(reservation_id, book_title_id);
        }
        for (reservation_id, card_id) in removed {
            if let Some(active) = cards.get_mut(&card_id) {
                active.remove(&reservation_id);
                if active.is_empty() {
                    cards.remove(&card_id);
                }
            }
        }
    }

    /// Active reservations of a card with their titles, oldest first.
    pub async fn active_for_card(&self, card_id: CardId) -> Vec<(ReservationId, BookTitleId)> {
        self.cards
            .read()
            .await
            .get(&card_id)
            .map(|active| active.iter().map(|(id, title)| (*id, *title)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use circulation_core::{BookTitle, ErrorKind};

    fn state(id: u64) -> TitleState {
        TitleState::new(BookTitle {
            id: BookTitleId::new(id),
            name: format!("Title {id}"),
        })
    }

    #[tokio::test]
    async fn test_register_twice_conflicts() {
        let registry = TitleRegistry::new(Duration::from_millis(50));
        registry.register(state(1)).await.unwrap();
        let err = registry.register(state(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(registry.title_ids().await, vec![BookTitleId::new(1)]);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_transient() {
        let registry = TitleRegistry::new(Duration::from_millis(20));
        registry.register(state(1)).await.unwrap();

        let _held = registry.lock(BookTitleId::new(1)).await.unwrap();
        let err = registry.lock(BookTitleId::new(1)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_titles_lock_independently() {
        let registry = TitleRegistry::new(Duration::from_millis(20));
        registry.register(state(1)).await.unwrap();
        registry.register(state(2)).await.unwrap();

        let _first = registry.lock(BookTitleId::new(1)).await.unwrap();
        assert!(registry.lock(BookTitleId::new(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_title_is_not_found() {
        let registry = TitleRegistry::new(Duration::from_millis(20));
        let err = registry.lock(BookTitleId::new(7)).await.unwrap_err();
        assert_eq!(err, AllocationError::not_found(Entity::BookTitle, 7));
    }

    #[tokio::test]
    async fn test_copy_claims_are_global() {
        let registry = TitleRegistry::new(Duration::from_millis(20));
        registry
            .claim_copy(CopyId::new(1), BookTitleId::new(1))
            .await
            .unwrap();
        assert!(
            registry
                .claim_copy(CopyId::new(1), BookTitleId::new(2))
                .await
                .is_err()
        );
        registry.abandon_copy(CopyId::new(1)).await;
        assert!(registry.title_of_copy(CopyId::new(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_sync_tracks_active_reservations_per_card() {
        let registry = TitleRegistry::new(Duration::from_millis(20));
        let title = BookTitleId::new(1);
        let card = CardId::new(5);
        let empty = BTreeMap::new();
        let one: BTreeMap<_, _> = [(ReservationId::new(1), card)].into_iter().collect();

        registry.sync_reservations(title, &empty, &one).await;
        assert_eq!(
            registry.active_for_card(card).await,
            vec![(ReservationId::new(1), title)]
        );
        assert_eq!(
            registry
                .title_of_reservation(ReservationId::new(1))
                .await
                .unwrap(),
            title
        );

        registry.sync_reservations(title, &one, &empty).await;
        assert!(registry.active_for_card(card).await.is_empty());
        // terminal reservations stay addressable
        assert!(
            registry
                .title_of_reservation(ReservationId::new(1))
                .await
                .is_ok()
        );
    }
}
