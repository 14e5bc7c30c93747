//! Configuration management for the ledger.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use ticket_escrow_runtime::StoreConfig;

/// Invalid configuration value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value must be positive
    #[error("{name} must be greater than 0")]
    MustBePositive {
        /// Environment variable name
        name: &'static str,
    },
}

/// Ledger configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Snapshot file for durable storage; in-memory when `None`
    pub data_path: Option<PathBuf>,
    /// Bounded wait for a partition lock in milliseconds
    pub lock_timeout_ms: u64,
    /// Bound on one outbound transfer in milliseconds
    pub transfer_timeout_ms: u64,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
    /// Notification channel and history size
    pub notification_capacity: usize,
    /// Log filter (trace, debug, info, warn, error or a directive list)
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            lock_timeout_ms: 5_000,
            transfer_timeout_ms: 10_000,
            shutdown_timeout_secs: 30,
            notification_capacity: 1_024,
            log_level: "ticket_ledger=info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_path: env::var("LEDGER_DATA_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            lock_timeout_ms: env::var("LEDGER_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lock_timeout_ms),
            transfer_timeout_ms: env::var("LEDGER_TRANSFER_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.transfer_timeout_ms),
            shutdown_timeout_secs: env::var("LEDGER_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.shutdown_timeout_secs),
            notification_capacity: env::var("LEDGER_NOTIFICATION_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notification_capacity),
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Checks that every timeout and capacity is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MustBePositive`] naming the first zero value.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                name: "LEDGER_LOCK_TIMEOUT_MS",
            });
        }
        if self.transfer_timeout_ms == 0 {
            return Err(ConfigError::MustBePositive {
                name: "LEDGER_TRANSFER_TIMEOUT_MS",
            });
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(ConfigError::MustBePositive {
                name: "LEDGER_SHUTDOWN_TIMEOUT_SECS",
            });
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::MustBePositive {
                name: "LEDGER_NOTIFICATION_CAPACITY",
            });
        }
        Ok(())
    }

    /// Drain timeout for [`Ledger::shutdown`](crate::Ledger::shutdown)
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Runtime settings derived from this configuration
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig::new(
            Duration::from_millis(self.lock_timeout_ms),
            Duration::from_millis(self.transfer_timeout_ms),
            self.shutdown_timeout(),
            self.notification_capacity,
        )
    }
}
