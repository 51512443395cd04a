//! Notification emitter that writes to the log.
//!
//! Stands in for the notification service when none is configured.

use circulation_core::{Notification, NotificationEmitter, NotificationError};
use std::future::Future;
use std::pin::Pin;

/// Emits each notification as an `info` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEmitter;

impl NotificationEmitter for TracingEmitter {
    fn emit(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                reader_id = %notification.reader_id,
                reservation_id = %notification.reservation_id,
                book_title_id = %notification.book_title_id,
                kind = ?notification.kind,
                message = %notification.message,
                "notification"
            );
            Ok(())
        })
    }
}
