//! Background expiry sweeper lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::Duration;
use circulation_core::{CardId, ReservationStatus};
use circulation_engine::ExpirySweeper;
use circulation_testing::LibraryFixture;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_sweeper_expires_holds_on_first_tick() {
    let fixture = LibraryFixture::new();
    let title = fixture.title_with_copies(1, 1).await.unwrap();
    let first = fixture.engine.reserve(CardId::new(1), title).await.unwrap();
    let second = fixture.engine.reserve(CardId::new(2), title).await.unwrap();
    fixture.clock.advance(Duration::hours(30));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = ExpirySweeper::new(fixture.engine.clone(), StdDuration::from_millis(20))
        .spawn(shutdown_rx);

    let mut promoted = false;
    for _ in 0..100 {
        let reservation = fixture
            .engine
            .reservation(second.reservation_id())
            .await
            .unwrap();
        if reservation.status == ReservationStatus::Ready {
            promoted = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    assert!(promoted, "sweeper should promote the waiter");

    let expired = fixture
        .engine
        .reservation(first.reservation_id())
        .await
        .unwrap();
    assert_eq!(expired.status, ReservationStatus::Expired);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("sweeper should stop on shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_sweeper_stops_when_sender_dropped() {
    let fixture = LibraryFixture::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let handle =
        ExpirySweeper::new(fixture.engine.clone(), StdDuration::from_secs(3600)).spawn(shutdown_rx);

    drop(shutdown_tx);

    tokio::time::timeout(StdDuration::from_secs(1), handle)
        .await
        .expect("sweeper should stop when the channel closes")
        .unwrap();
}

#[tokio::test]
async fn test_sweep_once_reports_expired_holds() {
    let fixture = LibraryFixture::new();
    let title = fixture.title_with_copies(1, 2).await.unwrap();
    fixture.engine.reserve(CardId::new(1), title).await.unwrap();
    fixture.engine.reserve(CardId::new(2), title).await.unwrap();
    fixture.clock.advance(Duration::hours(24));

    let sweeper = ExpirySweeper::new(fixture.engine.clone(), StdDuration::from_secs(60));
    let report = sweeper.sweep_once().await.unwrap();

    assert_eq!(report.expired_count(), 2);
    assert!(report.promoted.is_empty());
    let availability = fixture.engine.availability(title).await.unwrap();
    assert_eq!(availability.available_copies, 2);
}
