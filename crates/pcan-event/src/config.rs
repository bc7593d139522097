// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both programmatic and file-based configuration.
//!
//! ```toml
//! startup_timeout_ms = 1000
//! wait_interval_ms = 1000
//! join_timeout_ms = 5000
//! thread_name = "pcan-rx"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Event bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How long `enable` waits for the waiter thread to start (milliseconds).
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Upper bound of a single wait in the waiter loop (milliseconds).
    /// `0` blocks until a signal fires.
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,

    /// Bound on the shutdown join (milliseconds). Unbounded when absent.
    #[serde(default)]
    pub join_timeout_ms: Option<u64>,

    /// Name given to the waiter thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_startup_timeout_ms() -> u64 {
    1000
}

fn default_wait_interval_ms() -> u64 {
    1000
}

fn default_thread_name() -> String {
    "pcan-event".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout_ms(),
            wait_interval_ms: default_wait_interval_ms(),
            join_timeout_ms: None,
            thread_name: default_thread_name(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "startup_timeout_ms must be > 0".into(),
            ));
        }
        if self.join_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "join_timeout_ms must be > 0 when set".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        if self.thread_name.contains('\0') {
            return Err(ConfigError::Invalid(
                "thread_name must not contain NUL".into(),
            ));
        }
        Ok(())
    }

    /// Set the startup handshake timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Set the wait interval; `None` blocks until a signal fires.
    pub fn with_wait_interval(mut self, interval: Option<Duration>) -> Self {
        self.wait_interval_ms = interval.map_or(0, duration_to_ms);
        self
    }

    /// Bound the shutdown join.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    /// Set the waiter thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Startup handshake timeout.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Wait interval, `None` when waits are unbounded.
    pub fn wait_interval(&self) -> Option<Duration> {
        (self.wait_interval_ms > 0).then(|| Duration::from_millis(self.wait_interval_ms))
    }

    /// Shutdown join bound, `None` when unbounded.
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    // Keep sub-millisecond values non-zero.
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)
}
