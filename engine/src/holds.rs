//! Hold Manager: time-boxed bindings of one reservation to one copy.
//!
//! A hold record blocks its copy until it is released or removed by an expiry
//! scan. `expires_at` is a deadline stored with the record; nothing fires when
//! it passes.

use chrono::{DateTime, Utc};
use circulation_core::{
    AllocationError, AllocationResult, AvailabilityStatus, BookCopy, CopyId, HoldId,
    ReservationHold, ReservationId, pickup_deadline,
};
use std::collections::{BTreeMap, HashMap};

/// Holds of a single title, indexed by reservation and by copy.
#[derive(Clone, Debug, Default)]
pub struct HoldBook {
    by_reservation: BTreeMap<ReservationId, ReservationHold>,
    by_copy: HashMap<CopyId, ReservationId>,
}

impl HoldBook {
    /// Binds `copy` to `reservation_id` until `now + hold_hours`.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::Conflict`] if the copy is not `Available`, already
    ///   has a hold, or the reservation already holds another copy
    /// - [`AllocationError::InvalidHoldWindow`] if `hold_hours` is out of range
    pub fn create_hold(
        &mut self,
        hold_id: HoldId,
        reservation_id: ReservationId,
        copy: &BookCopy,
        now: DateTime<Utc>,
        hold_hours: u32,
    ) -> AllocationResult<ReservationHold> {
        if copy.availability_status != AvailabilityStatus::Available {
            return Err(AllocationError::Conflict(format!(
                "copy {} is {}",
                copy.copy_id, copy.availability_status
            )));
        }
        if let Some(holder) = self.by_copy.get(&copy.copy_id) {
            return Err(AllocationError::Conflict(format!(
                "copy {} is already held for reservation {holder}",
                copy.copy_id
            )));
        }
        if let Some(existing) = self.by_reservation.get(&reservation_id) {
            return Err(AllocationError::Conflict(format!(
                "reservation {reservation_id} already holds copy {}",
                existing.copy_id
            )));
        }

        let hold = ReservationHold {
            hold_id,
            reservation_id,
            copy_id: copy.copy_id,
            book_title_id: copy.book_title_id,
            created_at: now,
            expires_at: pickup_deadline(now, hold_hours)?,
        };
        self.by_copy.insert(copy.copy_id, reservation_id);
        self.by_reservation.insert(reservation_id, hold.clone());
        Ok(hold)
    }

    /// Removes the hold of `reservation_id`, active or already expired.
    ///
    /// Idempotent: returns `None` when there is nothing to release.
    pub fn release_hold(&mut self, reservation_id: ReservationId) -> Option<ReservationHold> {
        let hold = self.by_reservation.remove(&reservation_id)?;
        self.by_copy.remove(&hold.copy_id);
        Some(hold)
    }

    /// Removes and returns every hold with `expires_at <= now`, oldest deadline
    /// first.
    pub fn expire_stale_holds(&mut self, now: DateTime<Utc>) -> Vec<ReservationHold> {
        let stale: Vec<ReservationId> = self
            .by_reservation
            .values()
            .filter(|hold| hold.is_expired(now))
            .map(|hold| hold.reservation_id)
            .collect();

        let mut expired: Vec<ReservationHold> = stale
            .into_iter()
            .filter_map(|reservation_id| self.release_hold(reservation_id))
            .collect();
        expired.sort_by_key(|hold| (hold.expires_at, hold.hold_id));
        expired
    }

    /// The hold of a reservation.
    #[must_use]
    pub fn hold_for_reservation(&self, reservation_id: ReservationId) -> Option<&ReservationHold> {
        self.by_reservation.get(&reservation_id)
    }

    /// The hold on a copy.
    #[must_use]
    pub fn hold_for_copy(&self, copy_id: CopyId) -> Option<&ReservationHold> {
        self.by_copy
            .get(&copy_id)
            .and_then(|reservation_id| self.by_reservation.get(reservation_id))
    }

    /// Whether any hold record exists on the copy.
    #[must_use]
    pub fn is_copy_held(&self, copy_id: CopyId) -> bool {
        self.by_copy.contains_key(&copy_id)
    }

    /// Whether the copy has a hold that has not reached its deadline.
    #[must_use]
    pub fn has_unexpired_hold_on(&self, copy_id: CopyId, now: DateTime<Utc>) -> bool {
        self.hold_for_copy(copy_id)
            .is_some_and(|hold| !hold.is_expired(now))
    }

    /// Number of unexpired holds.
    #[must_use]
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.by_reservation
            .values()
            .filter(|hold| !hold.is_expired(now))
            .count()
    }

    /// All hold records in reservation order.
    pub fn iter(&self) -> impl Iterator<Item = &ReservationHold> {
        self.by_reservation.values()
    }

    /// Number of hold records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_reservation.len()
    }

    /// Whether there are no hold records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_reservation.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use circulation_core::{BookTitleId, ErrorKind, Price};

    fn copy(id: u64) -> BookCopy {
        BookCopy::new(
            CopyId::new(id),
            BookTitleId::new(1),
            "Good".into(),
            Price::default(),
        )
    }

    #[test]
    fn test_create_hold_sets_deadline() {
        let mut holds = HoldBook::default();
        let now = Utc::now();
        let hold = holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), now, 24)
            .unwrap();
        assert_eq!(hold.expires_at, now + Duration::hours(24));
        assert!(holds.is_copy_held(CopyId::new(1)));
        assert_eq!(holds.active_count(now), 1);
    }

    #[test]
    fn test_second_hold_on_copy_conflicts() {
        let mut holds = HoldBook::default();
        let now = Utc::now();
        holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), now, 24)
            .unwrap();
        let err = holds
            .create_hold(HoldId::new(2), ReservationId::new(2), &copy(1), now, 24)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_reservation_holds_at_most_one_copy() {
        let mut holds = HoldBook::default();
        let now = Utc::now();
        holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), now, 24)
            .unwrap();
        assert!(
            holds
                .create_hold(HoldId::new(2), ReservationId::new(1), &copy(2), now, 24)
                .is_err()
        );
    }

    #[test]
    fn test_unavailable_copy_cannot_be_held() {
        let mut holds = HoldBook::default();
        let mut lent = copy(1);
        lent.availability_status = AvailabilityStatus::OnLoan;
        assert!(
            holds
                .create_hold(HoldId::new(1), ReservationId::new(1), &lent, Utc::now(), 24)
                .is_err()
        );
    }

    #[test]
    fn test_oversized_window_is_rejected_without_holding() {
        let mut holds = HoldBook::default();
        let err = holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), Utc::now(), u32::MAX)
            .unwrap_err();
        assert_eq!(err, AllocationError::InvalidHoldWindow { hold_hours: u32::MAX });
        assert!(holds.is_empty());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut holds = HoldBook::default();
        let now = Utc::now();
        holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), now, 24)
            .unwrap();
        assert!(holds.release_hold(ReservationId::new(1)).is_some());
        assert!(holds.release_hold(ReservationId::new(1)).is_none());
        assert!(holds.is_empty());
        assert!(!holds.is_copy_held(CopyId::new(1)));
    }

    #[test]
    fn test_expire_removes_only_stale_holds() {
        let mut holds = HoldBook::default();
        let now = Utc::now();
        holds
            .create_hold(HoldId::new(1), ReservationId::new(1), &copy(1), now, 1)
            .unwrap();
        holds
            .create_hold(HoldId::new(2), ReservationId::new(2), &copy(2), now, 48)
            .unwrap();

        let expired = holds.expire_stale_holds(now + Duration::hours(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].reservation_id, ReservationId::new(1));
        assert_eq!(holds.len(), 1);
        assert!(holds.expire_stale_holds(now + Duration::hours(1)).is_empty());
    }
}
