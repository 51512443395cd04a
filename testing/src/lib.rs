//! # Circulation Testing
//!
//! Testing utilities for the circulation engine.
//!
//! This crate provides:
//! - A manually advanced clock for hold-expiry tests
//! - Notification emitters that record, fail or stall
//! - [`LibraryFixture`] for building a populated engine in one call
//! - proptest strategies for random operation sequences
//!
//! ## Example
//!
//! ```
//! use circulation_testing::LibraryFixture;
//! use circulation_core::CardId;
//! use chrono::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), circulation_core::AllocationError> {
//! let fixture = LibraryFixture::new();
//! let title = fixture.title_with_copies(1, 1).await?;
//!
//! fixture.engine.reserve(CardId::new(1), title).await?;
//! fixture.engine.reserve(CardId::new(2), title).await?;
//!
//! fixture.clock.advance(Duration::hours(25));
//! let report = fixture.sweep().await?;
//! assert_eq!(report.expired_count(), 1);
//! assert_eq!(fixture.emitter.notifications().len(), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use circulation_core::environment::Clock;

pub mod fixture;
pub mod properties;

/// Mock implementations of collaborator traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use circulation_core::{Notification, NotificationEmitter, NotificationError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Mutex, PoisonError, RwLock};
    use std::time::Duration as StdDuration;

    /// Clock that only moves when told to.
    ///
    /// # Example
    ///
    /// ```
    /// use circulation_testing::mocks::ManualClock;
    /// use circulation_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// assert_eq!(clock.now(), start);
    ///
    /// clock.advance(Duration::hours(24));
    /// assert_eq!(clock.now(), start + Duration::hours(24));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a manual clock for tests starting at 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Emitter that keeps every notification it receives.
    #[derive(Debug, Default)]
    pub struct RecordingEmitter {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingEmitter {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Notifications received so far, in emission order.
        #[must_use]
        pub fn notifications(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Forget everything received so far.
        pub fn clear(&self) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl NotificationEmitter for RecordingEmitter {
        fn emit(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(notification);
                Ok(())
            })
        }
    }

    /// Emitter whose collaborator is down.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FailingEmitter;

    impl NotificationEmitter for FailingEmitter {
        fn emit(
            &self,
            _notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async {
                Err(NotificationError::DeliveryFailed(
                    "notification service unavailable".into(),
                ))
            })
        }
    }

    /// Emitter that never answers within a reasonable time.
    #[derive(Debug, Clone, Copy)]
    pub struct StallingEmitter {
        delay: StdDuration,
    }

    impl StallingEmitter {
        /// Create an emitter that sleeps `delay` before succeeding.
        #[must_use]
        pub const fn new(delay: StdDuration) -> Self {
            Self { delay }
        }
    }

    impl NotificationEmitter for StallingEmitter {
        fn emit(
            &self,
            _notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(())
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes to the test harness.
    ///
    /// Safe to call from every test; only the first call installs.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use fixture::{LibraryFixture, MirrorDirectory};
pub use mocks::{FailingEmitter, ManualClock, RecordingEmitter, StallingEmitter, test_clock};
