//! Engine tunables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default pickup window for a hold.
pub const DEFAULT_HOLD_HOURS: u32 = 24;

/// Default cap on `Pending`/`Ready` reservations per card.
pub const DEFAULT_MAX_ACTIVE_RESERVATIONS: usize = 3;

/// Configuration for [`AllocationEngine`](crate::AllocationEngine).
///
/// # Example
///
/// ```
/// use circulation_engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_hold_hours(48)
///     .with_lock_timeout(Duration::from_secs(1));
///
/// assert_eq!(config.hold_hours, 48);
/// assert_eq!(config.max_active_reservations, 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pickup window granted by `reserve` and by promotions
    pub hold_hours: u32,
    /// Active reservation limit enforced by `check_eligibility`
    pub max_active_reservations: usize,
    /// Upper bound on waiting for a title lock
    pub lock_timeout: Duration,
    /// Upper bound on a single notification hand-off
    pub notification_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_hours: DEFAULT_HOLD_HOURS,
            max_active_reservations: DEFAULT_MAX_ACTIVE_RESERVATIONS,
            lock_timeout: Duration::from_secs(5),
            notification_timeout: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Sets the pickup window.
    #[must_use]
    pub const fn with_hold_hours(mut self, hold_hours: u32) -> Self {
        self.hold_hours = hold_hours;
        self
    }

    /// Sets the per-card active reservation limit.
    #[must_use]
    pub const fn with_max_active_reservations(mut self, limit: usize) -> Self {
        self.max_active_reservations = limit;
        self
    }

    /// Sets the title lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the notification timeout.
    #[must_use]
    pub const fn with_notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }
}
