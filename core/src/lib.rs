//! # Circulation Core
//!
//! Domain types and collaborator traits for the reservation allocation engine
//! of a lending library.
//!
//! A patron reserves a *title*. If a physical copy is free the reservation is
//! immediately `Ready` and the copy is *held* for a bounded window; otherwise
//! the reservation waits in the title's FIFO queue. Returns, cancellations and
//! hold expiry free copies, which promote the next waiter.
//!
//! ## Crate Contents
//!
//! - [`types`]: identifiers, statuses, entities and read projections
//! - [`error`]: [`AllocationError`] and its [`ErrorKind`] classification
//! - [`notify`]: the notification side channel and patron directory
//! - [`environment`]: injected time source
//!
//! This crate performs no I/O and holds no locks; see `circulation-engine`
//! for the concurrency discipline.

pub use chrono::{DateTime, Utc};

pub mod error;
pub mod notify;
pub mod types;

pub use error::{AllocationError, AllocationResult, Entity, ErrorKind};
pub use notify::{
    InMemoryPatronDirectory, Notification, NotificationEmitter, NotificationError,
    NotificationKind, PatronDirectory,
};
pub use types::*;

/// Environment module - Dependency injection traits
///
/// External dependencies the engine needs at runtime are abstracted behind
/// traits so tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Hold deadlines and expiry sweeps read time exclusively through this
    /// trait.
    ///
    /// # Examples
    ///
    /// ```
    /// use circulation_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
