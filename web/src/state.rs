//! Application state for Axum handlers.

use circulation_core::environment::Clock;
use circulation_core::{InMemoryPatronDirectory, NotificationEmitter};
use circulation_engine::{AllocationEngine, EngineConfig, RetryPolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned for every request; everything inside is behind an [`Arc`].
#[derive(Clone)]
pub struct AppState {
    /// Allocation engine
    pub engine: Arc<AllocationEngine>,
    /// Card registry the engine resolves readers from, `None` when cards
    /// are managed elsewhere
    pub cards: Option<Arc<InMemoryPatronDirectory>>,
    /// Prometheus handle, `None` when metrics are disabled
    pub metrics: Option<PrometheusHandle>,
    /// Backoff for operations that hit a lock timeout
    pub retry: RetryPolicy,
}

impl AppState {
    /// Create a new application state with the default retry policy, no
    /// card registry and no metrics endpoint.
    #[must_use]
    pub fn new(engine: Arc<AllocationEngine>) -> Self {
        Self {
            engine,
            cards: None,
            metrics: None,
            retry: RetryPolicy::default(),
        }
    }

    /// An engine whose patron directory is filled through `POST /api/cards`.
    ///
    /// This is how the server binary wires itself: the engine and the card
    /// endpoint share one [`InMemoryPatronDirectory`], so a registered card
    /// receives `BOOK_READY` notifications on promotion.
    #[must_use]
    pub fn with_card_registry(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        emitter: Arc<dyn NotificationEmitter>,
    ) -> Self {
        let cards = Arc::new(InMemoryPatronDirectory::new());
        let engine = AllocationEngine::new(config, clock, emitter, cards.clone());
        let mut state = Self::new(Arc::new(engine));
        state.cards = Some(cards);
        state
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use circulation_core::environment::SystemClock;
    use circulation_core::{CardId, PatronDirectory, ReaderId};
    use circulation_engine::TracingEmitter;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_card_registry_is_shared_with_clones() {
        let state = AppState::with_card_registry(
            EngineConfig::default(),
            Arc::new(SystemClock),
            Arc::new(TracingEmitter),
        );
        let clone = state.clone();

        if let Some(cards) = &clone.cards {
            cards.register(CardId::new(3), ReaderId::new(30));
        }

        let reader = state
            .cards
            .as_ref()
            .and_then(|cards| cards.reader_for_card(CardId::new(3)));
        assert_eq!(reader, Some(ReaderId::new(30)));
    }
}
