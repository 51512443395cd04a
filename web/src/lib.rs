//! HTTP surface of the circulation engine.
//!
//! A thin Axum shell over [`AllocationEngine`](circulation_engine::AllocationEngine):
//! handlers parse the request, call one engine operation and map the result.
//! All allocation decisions stay in the engine.
//!
//! # Request Flow
//!
//! 1. The correlation id layer tags the request and opens a span
//! 2. The handler extracts path ids and the JSON body
//! 3. The engine runs the operation under the title lock
//! 4. [`AppError`] turns failures into `{ "code", "message" }` responses
//!
//! # Example
//!
//! ```
//! use circulation_core::environment::SystemClock;
//! use circulation_engine::{EngineConfig, TracingEmitter};
//! use circulation_web::{AppState, build_router};
//! use std::sync::Arc;
//!
//! let state = AppState::with_card_registry(
//!     EngineConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(TracingEmitter),
//! );
//! let app = build_router(state);
//! # let _ = app;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};
pub use routes::build_router;
pub use state::AppState;
