//! Portal runtime configuration.
//!
//! Configuration is loaded from environment variables. Every variable is
//! optional; malformed values are errors rather than silently defaulted.

use common::config::{ObservabilityConfig, DEFAULT_LOG_LEVEL};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::queue::{QueueConfig, DEFAULT_MAILBOX_CAPACITY};

/// Default dispatch-task stop timeout in seconds.
pub const DEFAULT_STOP_TIMEOUT_SECONDS: u64 = 5;

/// Portal runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Mailbox capacity of each event queue (default: 1000).
    pub mailbox_capacity: usize,

    /// How long queue shutdown waits for the dispatch task (default: 5s).
    pub stop_timeout_seconds: u64,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            stop_timeout_seconds: DEFAULT_STOP_TIMEOUT_SECONDS,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unparsable values.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mailbox_capacity = match vars.get("PORTAL_QUEUE_MAILBOX_CAPACITY") {
            Some(value) => {
                let capacity: usize = value.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "PORTAL_QUEUE_MAILBOX_CAPACITY must be a positive integer: {e}"
                    ))
                })?;
                if capacity == 0 {
                    return Err(ConfigError::InvalidValue(
                        "PORTAL_QUEUE_MAILBOX_CAPACITY must be greater than 0".to_string(),
                    ));
                }
                capacity
            }
            None => DEFAULT_MAILBOX_CAPACITY,
        };

        let stop_timeout_seconds = match vars.get("PORTAL_QUEUE_STOP_TIMEOUT_SECONDS") {
            Some(value) => value.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "PORTAL_QUEUE_STOP_TIMEOUT_SECONDS must be a non-negative integer: {e}"
                ))
            })?,
            None => DEFAULT_STOP_TIMEOUT_SECONDS,
        };

        let log_level = vars
            .get("PORTAL_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = match vars.get("PORTAL_JSON_LOGS").map(String::as_str) {
            None => false,
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "PORTAL_JSON_LOGS must be true or false, got '{other}'"
                )))
            }
        };

        Ok(Self {
            mailbox_capacity,
            stop_timeout_seconds,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }

    /// Settings for [`EventQueueHandler::spawn`](crate::queue::EventQueueHandler::spawn).
    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            mailbox_capacity: self.mailbox_capacity,
            stop_timeout: Duration::from_secs(self.stop_timeout_seconds),
        }
    }
}
