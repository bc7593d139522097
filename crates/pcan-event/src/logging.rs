// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging initialization.
//!
//! The crate logs through the `log` facade; these helpers install
//! `env_logger` for applications and tests that do not bring their own
//! logger.

/// Log level for bridge logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Initialize console logging at `level`.
///
/// Returns `false` if a logger was already installed.
pub fn init(level: LogLevel) -> bool {
    let filter: log::LevelFilter = level.into();

    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Initialize console logging, letting `RUST_LOG` override `default_level`.
///
/// Returns `false` if a logger was already installed.
pub fn init_from_env(default_level: LogLevel) -> bool {
    let filter: log::LevelFilter = default_level.into();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.to_string()),
    )
    .format_timestamp_millis()
    .try_init()
    .is_ok()
}
