//! Queue Manager: the ordered wait list of one title.
//!
//! Entries are stored in position order and positions are always
//! `1..=len`. Every removal shifts the tail down by one.

use circulation_core::{AllocationError, AllocationResult, QueueEntry, QueueId, ReservationId};

/// FIFO wait list with dense 1-based positions.
#[derive(Clone, Debug, Default)]
pub struct WaitQueue {
    entries: Vec<QueueEntry>,
}

impl WaitQueue {
    /// Appends `reservation_id` and returns its position.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the reservation is already queued.
    pub fn enqueue(
        &mut self,
        queue_id: QueueId,
        reservation_id: ReservationId,
    ) -> AllocationResult<u32> {
        self.ensure_absent(reservation_id)?;
        let position = to_position(self.entries.len() + 1);
        self.entries.push(QueueEntry {
            queue_id,
            reservation_id,
            position,
        });
        Ok(position)
    }

    /// Inserts `reservation_id` at position 1, shifting everyone else back.
    ///
    /// Used when a reservation loses its held copy through no fault of its own.
    ///
    /// # Errors
    ///
    /// [`AllocationError::Conflict`] if the reservation is already queued.
    pub fn enqueue_front(
        &mut self,
        queue_id: QueueId,
        reservation_id: ReservationId,
    ) -> AllocationResult<()> {
        self.ensure_absent(reservation_id)?;
        self.entries.insert(
            0,
            QueueEntry {
                queue_id,
                reservation_id,
                position: 1,
            },
        );
        self.renumber_from(1);
        Ok(())
    }

    /// Removes the entry of `reservation_id` and closes the gap.
    ///
    /// Idempotent: returns the removed position, or `None` if the reservation
    /// was not queued.
    pub fn dequeue(&mut self, reservation_id: ReservationId) -> Option<u32> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.reservation_id == reservation_id)?;
        let removed = self.entries.remove(index);
        self.renumber_from(index);
        Some(removed.position)
    }

    /// The reservation at position 1.
    #[must_use]
    pub fn peek_next(&self) -> Option<ReservationId> {
        self.entries.first().map(|entry| entry.reservation_id)
    }

    /// Current position of `reservation_id`.
    #[must_use]
    pub fn position_of(&self, reservation_id: ReservationId) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.reservation_id == reservation_id)
            .map(|entry| entry.position)
    }

    /// Entries in position order.
    #[must_use]
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    /// Number of waiting reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_absent(&self, reservation_id: ReservationId) -> AllocationResult<()> {
        match self.position_of(reservation_id) {
            Some(position) => Err(AllocationError::Conflict(format!(
                "reservation {reservation_id} is already queued at position {position}"
            ))),
            None => Ok(()),
        }
    }

    fn renumber_from(&mut self, index: usize) {
        for (offset, entry) in self.entries.iter_mut().enumerate().skip(index) {
            entry.position = to_position(offset + 1);
        }
    }
}

fn to_position(ordinal: usize) -> u32 {
    u32::try_from(ordinal).unwrap_or(u32::MAX)
}
