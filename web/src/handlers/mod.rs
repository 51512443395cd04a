//! HTTP request handlers, one module per resource.

pub mod cards;
pub mod health;
pub mod loans;
pub mod readers;
pub mod reservations;
pub mod titles;

pub use health::{health_check, readiness_check};
