//! Ready-made engine wiring for tests.

use crate::mocks::{ManualClock, RecordingEmitter, test_clock};
use circulation_core::{
    AllocationResult, BookTitleId, CardId, CopyId, PatronDirectory, Price, ReaderId, SweepReport,
};
use circulation_engine::{AllocationEngine, EngineConfig};
use std::sync::Arc;

/// Directory in which card `n` belongs to reader `n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MirrorDirectory;

impl PatronDirectory for MirrorDirectory {
    fn reader_for_card(&self, card_id: CardId) -> Option<ReaderId> {
        Some(ReaderId::new(card_id.value()))
    }
}

/// An engine on a manual clock that records its notifications.
pub struct LibraryFixture {
    /// Engine under test
    pub engine: Arc<AllocationEngine>,
    /// Clock driving the engine
    pub clock: Arc<ManualClock>,
    /// Every notification the engine emitted
    pub emitter: Arc<RecordingEmitter>,
}

impl LibraryFixture {
    /// Fixture with the default configuration, starting at 2025-01-01.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Fixture with a custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(test_clock());
        let emitter = Arc::new(RecordingEmitter::new());
        let engine = Arc::new(AllocationEngine::new(
            config,
            clock.clone(),
            emitter.clone(),
            Arc::new(MirrorDirectory),
        ));
        Self {
            engine,
            clock,
            emitter,
        }
    }

    /// Registers title `id` ("Title {id}") with `copies` copies numbered
    /// `id * 100 + 1 ..= id * 100 + copies`.
    ///
    /// # Errors
    ///
    /// Propagates registration errors.
    pub async fn title_with_copies(&self, id: u64, copies: u64) -> AllocationResult<BookTitleId> {
        let title = BookTitleId::new(id);
        self.engine.register_title(title, format!("Title {id}")).await?;
        for n in 1..=copies {
            self.engine
                .add_copy(title, Self::copy_of(id, n), "Good".into(), Price::from_cents(2_000))
                .await?;
        }
        Ok(title)
    }

    /// Id of the `n`th copy created by [`title_with_copies`](Self::title_with_copies).
    #[must_use]
    pub const fn copy_of(title: u64, n: u64) -> CopyId {
        CopyId::new(title * 100 + n)
    }

    /// Runs an expiry sweep at the clock's current time.
    ///
    /// # Errors
    ///
    /// Propagates an out-of-range configured pickup window.
    pub async fn sweep(&self) -> AllocationResult<SweepReport> {
        self.engine
            .expire_stale_reservations(self.engine.now(), self.engine.config().hold_hours)
            .await
    }
}

impl Default for LibraryFixture {
    fn default() -> Self {
        Self::new()
    }
}
