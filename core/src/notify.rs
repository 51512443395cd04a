//! Notification side channel.
//!
//! Promotion emits a [`Notification`] to an external collaborator. The
//! collaborator owns delivery and read state; the engine only hands the record
//! over and never waits on it inside a critical section.

use crate::types::{BookTitleId, CardId, ReaderId, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Notification category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A held copy is waiting for pickup
    BookReady,
}

/// Informational record addressed to a reader.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub reader_id: ReaderId,
    /// Reservation the notification is about
    pub reservation_id: ReservationId,
    /// Title the reservation is for
    pub book_title_id: BookTitleId,
    /// Category
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Human readable text
    pub message: String,
    /// Creation time
    pub created_date: DateTime<Utc>,
    /// Always `false` when emitted; the collaborator tracks reads
    pub is_read: bool,
}

impl Notification {
    /// Builds a `BOOK_READY` notification for a promoted reservation.
    #[must_use]
    pub fn book_ready(
        reader_id: ReaderId,
        reservation_id: ReservationId,
        book_title_id: BookTitleId,
        title: &str,
        pickup_deadline: DateTime<Utc>,
        created_date: DateTime<Utc>,
    ) -> Self {
        Self {
            reader_id,
            reservation_id,
            book_title_id,
            kind: NotificationKind::BookReady,
            message: format!(
                "\"{title}\" is ready. Please pick it up at the library before {}.",
                pickup_deadline.format("%Y-%m-%d %H:%M UTC")
            ),
            created_date,
            is_read: false,
        }
    }
}

/// Errors from notification delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The collaborator rejected or failed to store the notification
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),

    /// The collaborator did not answer in time
    #[error("notification delivery timed out")]
    Timeout,
}

/// Receives notifications produced by promotions.
///
/// Uses an explicit boxed future so the emitter can be shared as
/// `Arc<dyn NotificationEmitter>`.
pub trait NotificationEmitter: Send + Sync {
    /// Hands one notification to the collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the collaborator fails. The engine
    /// logs the failure and carries on.
    fn emit(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>>;
}

/// Resolves the reader who owns a library card.
pub trait PatronDirectory: Send + Sync {
    /// Returns the reader for `card_id`, or `None` if the card is unknown.
    fn reader_for_card(&self, card_id: CardId) -> Option<ReaderId>;
}

/// In-process card → reader table.
///
/// Each access is a single map operation, so a poisoned lock still guards a
/// consistent map and is recovered rather than reported.
#[derive(Debug, Default)]
pub struct InMemoryPatronDirectory {
    cards: RwLock<HashMap<CardId, ReaderId>>,
}

impl InMemoryPatronDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `card_id` belongs to `reader_id`, replacing any previous owner.
    pub fn register(&self, card_id: CardId, reader_id: ReaderId) {
        self.cards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(card_id, reader_id);
    }
}

impl PatronDirectory for InMemoryPatronDirectory {
    fn reader_for_card(&self, card_id: CardId) -> Option<ReaderId> {
        self.cards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&card_id)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_book_ready_message_names_title_and_deadline() {
        let deadline = Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 0).single();
        let Some(deadline) = deadline else {
            return;
        };
        let notification = Notification::book_ready(
            ReaderId::new(4),
            ReservationId::new(10),
            BookTitleId::new(2),
            "Dune",
            deadline,
            deadline,
        );
        assert_eq!(notification.kind, NotificationKind::BookReady);
        assert!(!notification.is_read);
        assert_eq!(
            notification.message,
            "\"Dune\" is ready. Please pick it up at the library before 2025-01-02 09:30 UTC."
        );
    }

    #[test]
    fn test_directory_lookup() {
        let directory = InMemoryPatronDirectory::new();
        directory.register(CardId::new(1), ReaderId::new(100));
        assert_eq!(directory.reader_for_card(CardId::new(1)), Some(ReaderId::new(100)));
        assert_eq!(directory.reader_for_card(CardId::new(2)), None);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_registration_survives_poisoned_lock() {
        let directory = InMemoryPatronDirectory::new();
        directory.register(CardId::new(1), ReaderId::new(100));
        let poisoned = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = directory.cards.write();
                    panic!("writer died holding the card table");
                })
                .join()
        });
        assert!(poisoned.is_err());
        assert!(directory.cards.is_poisoned());

        directory.register(CardId::new(2), ReaderId::new(200));

        assert_eq!(directory.reader_for_card(CardId::new(1)), Some(ReaderId::new(100)));
        assert_eq!(directory.reader_for_card(CardId::new(2)), Some(ReaderId::new(200)));
    }
}
