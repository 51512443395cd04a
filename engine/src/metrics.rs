//! Prometheus metrics for the allocation engine.
//!
//! Recording goes through the `metrics` facade, so it is a no-op until a
//! recorder is installed. The server installs one with [`install_recorder`]
//! and serves [`PrometheusHandle::render`] on `/metrics`.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Registers descriptions and installs the global Prometheus recorder.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    register_metrics();

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_seconds".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Allocation
    describe_counter!(
        "circulation_reservations_total",
        "Reservations created, labelled by mode (hold or queue)"
    );
    describe_counter!(
        "circulation_promotions_total",
        "Queued reservations promoted to Ready"
    );
    describe_counter!(
        "circulation_cancellations_total",
        "Reservations cancelled"
    );
    describe_counter!(
        "circulation_fulfillments_total",
        "Reservations fulfilled by a loan"
    );
    describe_counter!(
        "circulation_hold_conflicts_total",
        "Hold attempts that conflicted and fell back to queueing"
    );
    describe_gauge!(
        "circulation_queue_length",
        "Waiting reservations per title"
    );
    describe_histogram!(
        "circulation_lock_wait_seconds",
        "Time spent acquiring a title lock"
    );

    // Expiry
    describe_counter!(
        "circulation_holds_expired_total",
        "Holds removed after their pickup deadline"
    );
    describe_counter!(
        "circulation_sweep_title_failures_total",
        "Titles skipped by an expiry sweep"
    );
    describe_histogram!(
        "circulation_sweep_duration_seconds",
        "Duration of a full expiry sweep"
    );

    // Notifications
    describe_counter!(
        "circulation_notifications_failed_total",
        "BOOK_READY notifications that failed or timed out"
    );
}

/// Allocation metrics recorder.
pub struct AllocationMetrics;

impl AllocationMetrics {
    /// Record a new reservation.
    pub fn record_reservation(mode: &'static str) {
        counter!("circulation_reservations_total", "mode" => mode).increment(1);
    }

    /// Record promotions.
    pub fn record_promotions(count: usize) {
        if count > 0 {
            counter!("circulation_promotions_total").increment(count as u64);
        }
    }

    /// Record a cancellation.
    pub fn record_cancellation() {
        counter!("circulation_cancellations_total").increment(1);
    }

    /// Record a fulfillment.
    pub fn record_fulfillment() {
        counter!("circulation_fulfillments_total").increment(1);
    }

    /// Record hold conflicts recovered by queueing.
    pub fn record_hold_conflicts(count: u64) {
        if count > 0 {
            counter!("circulation_hold_conflicts_total").increment(count);
        }
    }

    /// Record a title's queue length.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_queue_length(book_title_id: u64, length: usize) {
        gauge!("circulation_queue_length", "book_title_id" => book_title_id.to_string())
            .set(length as f64);
    }

    /// Record time spent waiting for a title lock.
    pub fn record_lock_wait(duration: Duration) {
        histogram!("circulation_lock_wait_seconds").record(duration.as_secs_f64());
    }
}

/// Expiry metrics recorder.
pub struct ExpiryMetrics;

impl ExpiryMetrics {
    /// Record expired holds.
    pub fn record_expired(count: usize) {
        if count > 0 {
            counter!("circulation_holds_expired_total").increment(count as u64);
        }
    }

    /// Record a title skipped by a sweep.
    pub fn record_title_failure() {
        counter!("circulation_sweep_title_failures_total").increment(1);
    }

    /// Record a completed sweep.
    pub fn record_sweep(duration: Duration) {
        histogram!("circulation_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a failed or timed out notification.
    pub fn record_failure() {
        counter!("circulation_notifications_failed_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        AllocationMetrics::record_reservation("hold");
        AllocationMetrics::record_queue_length(1, 3);
        ExpiryMetrics::record_sweep(Duration::from_millis(5));
        NotificationMetrics::record_failure();
    }
}
