//! # Circulation Engine
//!
//! Reservation allocation and queueing for a lending library.
//!
//! For each title the engine decides whether a new reservation gets a held
//! copy or a place in the FIFO wait list, promotes the next waiter whenever a
//! copy is released, and expires holds that were not picked up in time.
//!
//! ## Concurrency
//!
//! All state of one title lives in a [`TitleState`] behind its own
//! `tokio::sync::Mutex`. Mutations run on a staged clone under that lock and
//! are committed only if they succeed. Different titles never contend, and
//! the expiry sweep takes title locks one at a time.
//!
//! ## Example
//!
//! ```no_run
//! use circulation_core::environment::SystemClock;
//! use circulation_core::{BookTitleId, CardId, CopyId, InMemoryPatronDirectory, Price};
//! use circulation_engine::{AllocationEngine, EngineConfig, TracingEmitter};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), circulation_core::AllocationError> {
//! let engine = AllocationEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(TracingEmitter),
//!     Arc::new(InMemoryPatronDirectory::new()),
//! );
//!
//! let title = BookTitleId::new(1);
//! engine.register_title(title, "Dune".into()).await?;
//! engine.add_copy(title, CopyId::new(10), "Good".into(), Price::from_cents(1_999)).await?;
//!
//! let outcome = engine.reserve(CardId::new(7), title).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod history;
pub mod holds;
pub mod ids;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod sweeper;
pub mod title;

pub use config::EngineConfig;
pub use engine::AllocationEngine;
pub use history::TitleHistory;
pub use holds::HoldBook;
pub use ledger::InventoryLedger;
pub use notify::TracingEmitter;
pub use queue::WaitQueue;
pub use retry::{RetryPolicy, retry_transient};
pub use sweeper::ExpirySweeper;
pub use title::{TitleContext, TitleState};
