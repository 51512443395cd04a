//! Property tests: random operation sequences never break allocation
//! invariants, and waiters are served in arrival order.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use circulation_core::{ReservationId, ReservationStatus};
use circulation_testing::properties::{TitleDriver, title_ops};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_invariants_hold_after_every_operation(
        copies in 0u64..=3,
        ops in title_ops(60),
    ) {
        let mut driver = TitleDriver::new(copies).unwrap();
        for op in &ops {
            let before = driver.state().queue().entries().to_vec();
            if driver.apply(op).is_err() {
                prop_assert_eq!(driver.state().queue().entries(), before.as_slice());
            }
            if let Err(violation) = driver.state().check_invariants(driver.now()) {
                return Err(TestCaseError::fail(format!("after {op:?}: {violation}")));
            }
        }
    }

    #[test]
    fn prop_queue_positions_are_dense(
        copies in 1u64..=2,
        ops in title_ops(60),
    ) {
        let mut driver = TitleDriver::new(copies).unwrap();
        for op in &ops {
            let _ = driver.apply(op);
            let positions: Vec<u32> = driver
                .state()
                .queue()
                .entries()
                .iter()
                .map(|e| e.position)
                .collect();
            let expected: Vec<u32> = (1..=u32::try_from(positions.len()).unwrap()).collect();
            prop_assert_eq!(positions, expected);
        }
    }

    #[test]
    fn prop_waiters_are_promoted_in_arrival_order(
        copies in 1u64..=2,
        ops in title_ops(80),
    ) {
        let mut driver = TitleDriver::new(copies).unwrap();
        for op in &ops {
            let _ = driver.apply(op);
        }

        let arrival: HashMap<ReservationId, usize> = driver
            .queued_order()
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        let mut seen = HashSet::new();
        let mut last = None;
        for promotion in driver.promotions() {
            if !seen.insert(promotion.reservation_id) {
                continue;
            }
            let Some(&rank) = arrival.get(&promotion.reservation_id) else {
                continue;
            };
            if let Some(previous) = last {
                prop_assert!(
                    rank > previous,
                    "reservation {} promoted out of arrival order",
                    promotion.reservation_id
                );
            }
            last = Some(rank);
        }
    }

    #[test]
    fn prop_every_pending_reservation_is_queued(
        copies in 0u64..=2,
        ops in title_ops(60),
    ) {
        let mut driver = TitleDriver::new(copies).unwrap();
        for op in &ops {
            let _ = driver.apply(op);
        }
        let state = driver.state();
        for reservation in state.reservations() {
            let queued = state.queue().position_of(reservation.reservation_id).is_some();
            prop_assert_eq!(
                queued,
                reservation.status == ReservationStatus::Pending,
                "reservation {} is {}",
                reservation.reservation_id,
                reservation.status
            );
        }
    }

    #[test]
    fn prop_only_held_reservations_are_requeued(
        copies in 1u64..=3,
        ops in title_ops(80),
    ) {
        let mut driver = TitleDriver::new(copies).unwrap();
        for op in &ops {
            let _ = driver.apply(op);
        }

        let queued_on_request: HashSet<ReservationId> =
            driver.queued_order().iter().copied().collect();
        let promoted: HashSet<ReservationId> =
            driver.promotions().iter().map(|p| p.reservation_id).collect();
        for id in driver.requeued() {
            prop_assert!(
                !queued_on_request.contains(id) || promoted.contains(id),
                "reservation {} was requeued without ever holding a copy",
                id
            );
        }
    }
}
