//! Server configuration.
//!
//! Loaded from environment variables with defaults; the binary runs
//! `dotenvy` first so a local `.env` file is honoured.

use circulation_core::MAX_HOLD_HOURS;
use circulation_engine::EngineConfig;
use circulation_engine::config::{DEFAULT_HOLD_HOURS, DEFAULT_MAX_ACTIVE_RESERVATIONS};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors detected by [`Config::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `HOLD_HOURS` must be positive
    #[error("HOLD_HOURS must be at least 1")]
    ZeroHoldHours,
    /// `HOLD_HOURS` is longer than any pickup window the engine accepts
    #[error("HOLD_HOURS must be at most {max}", max = MAX_HOLD_HOURS)]
    HoldHoursTooLong,
    /// `MAX_ACTIVE_RESERVATIONS` must be positive
    #[error("MAX_ACTIVE_RESERVATIONS must be at least 1")]
    ZeroReservationLimit,
    /// `SWEEP_INTERVAL_SECS` must be positive
    #[error("SWEEP_INTERVAL_SECS must be at least 1")]
    ZeroSweepInterval,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Allocation rules
    pub allocation: AllocationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Allocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Pickup window of a hold, in hours
    pub hold_hours: u32,
    /// Active reservations allowed per card
    pub max_active_reservations: usize,
    /// Title lock acquisition timeout in milliseconds
    pub lock_timeout_ms: u64,
    /// Notification delivery timeout in milliseconds
    pub notification_timeout_ms: u64,
    /// Seconds between expiry sweeps
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("PORT", 8080),
                log_level: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "info,circulation_engine=debug".to_string()),
                metrics_enabled: parse_var("METRICS_ENABLED", true),
                shutdown_timeout: parse_var("SHUTDOWN_TIMEOUT", 30),
            },
            allocation: AllocationConfig {
                hold_hours: parse_var("HOLD_HOURS", DEFAULT_HOLD_HOURS),
                max_active_reservations: parse_var(
                    "MAX_ACTIVE_RESERVATIONS",
                    DEFAULT_MAX_ACTIVE_RESERVATIONS,
                ),
                lock_timeout_ms: parse_var("LOCK_TIMEOUT_MS", 5_000),
                notification_timeout_ms: parse_var("NOTIFICATION_TIMEOUT_MS", 2_000),
                sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", 120),
            },
        }
    }

    /// Rejects values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.allocation.hold_hours == 0 {
            return Err(ConfigError::ZeroHoldHours);
        }
        if self.allocation.hold_hours > MAX_HOLD_HOURS {
            return Err(ConfigError::HoldHoursTooLong);
        }
        if self.allocation.max_active_reservations == 0 {
            return Err(ConfigError::ZeroReservationLimit);
        }
        if self.allocation.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            hold_hours: self.allocation.hold_hours,
            max_active_reservations: self.allocation.max_active_reservations,
            lock_timeout: Duration::from_millis(self.allocation.lock_timeout_ms),
            notification_timeout: Duration::from_millis(self.allocation.notification_timeout_ms),
        }
    }

    /// Interval of the background expiry sweeper.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.allocation.sweep_interval_secs)
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                log_level: "info,circulation_engine=debug".to_string(),
                metrics_enabled: true,
                shutdown_timeout: 30,
            },
            allocation: AllocationConfig {
                hold_hours: DEFAULT_HOLD_HOURS,
                max_active_reservations: DEFAULT_MAX_ACTIVE_RESERVATIONS,
                lock_timeout_ms: 5_000,
                notification_timeout_ms: 2_000,
                sweep_interval_secs: 120,
            },
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, %default, "invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
