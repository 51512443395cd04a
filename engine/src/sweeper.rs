//! Background expiry sweep.
//!
//! Runs [`AllocationEngine::expire_stale_reservations`] on a fixed interval
//! until a shutdown signal arrives. Sweep timing only bounds how long a stale
//! hold can linger; correctness never depends on it because every per-title
//! critical section expires stale holds first.

use crate::engine::AllocationEngine;
use circulation_core::{AllocationResult, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Periodic hold-expiry task.
pub struct ExpirySweeper {
    engine: Arc<AllocationEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper that runs every `interval`.
    #[must_use]
    pub const fn new(engine: Arc<AllocationEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Sweeps on every tick until `shutdown` fires or its sender is dropped.
    ///
    /// The first tick happens immediately. Ticks missed while a sweep is
    /// running are skipped rather than bunched up.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(report) if !report.failed_titles.is_empty() => {
                        warn!(failed_titles = ?report.failed_titles, "titles left for the next sweep");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "sweep rejected"),
                },
                _ = shutdown.recv() => {
                    info!("expiry sweeper stopping");
                    break;
                }
            }
        }
    }

    /// Runs a single sweep immediately.
    ///
    /// # Errors
    ///
    /// [`AllocationError::InvalidHoldWindow`](circulation_core::AllocationError::InvalidHoldWindow)
    /// if the configured pickup window is out of range.
    pub async fn sweep_once(&self) -> AllocationResult<SweepReport> {
        self.engine
            .expire_stale_reservations(self.engine.now(), self.engine.config().hold_hours)
            .await
    }
}
