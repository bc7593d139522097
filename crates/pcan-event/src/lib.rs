// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PCAN receive-event bridge
//!
//! Turns a CAN driver's "data ready" signal into callback invocations on a
//! dedicated waiter thread, with a startup handshake and a race-free
//! shutdown.
//!
//! # Features
//!
//! - **One contract, three backends**: eventfd + poll on Linux/Android, pipe
//!   + poll on other Unix targets, kernel events on Windows
//! - **Startup handshake**: `enable` returns only once the waiter is waiting
//!   and the driver is bound, so no early signal is lost
//! - **Race-free shutdown**: no callback starts once `disable` has begun
//! - **Both driver styles**: drivers that hand out their own primitive and
//!   drivers that signal one created by the application
//!
//! # Quick Start
//!
//! ```no_run
//! use pcan_event::{BridgeConfig, ChannelHandle, EventBridge, LoopbackDriver};
//!
//! let driver = LoopbackDriver::acquiring();
//! let reader = driver.clone();
//! let mut bridge = EventBridge::with_config(driver.clone(), BridgeConfig::default());
//!
//! bridge
//!     .enable(ChannelHandle::new(0x51), move |channel| {
//!         for frame in reader.read_all(channel) {
//!             println!("frame {} on {}", frame, channel);
//!         }
//!     })
//!     .expect("enable should succeed");
//!
//! driver.fire(ChannelHandle::new(0x51));
//! bridge.disable().expect("disable should succeed");
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! startup_timeout_ms = 1000
//! wait_interval_ms = 1000
//! join_timeout_ms = 5000
//! thread_name = "pcan-rx"
//! ```

pub mod bridge;
pub mod config;
pub mod driver;
pub mod error;
pub mod global;
pub mod logging;
pub mod platform;
mod waiter;

pub use bridge::{BridgeState, EventBridge};
pub use config::{BridgeConfig, ConfigError};
pub use driver::{
    status_name, ChannelHandle, DriverError, LoopbackDriver, LoopbackMode, ReadySignal,
    ReceiveEventDriver, ResetMode,
};
pub use error::{BridgeError, Result, StatusCode, WaitFault};
pub use logging::LogLevel;
pub use platform::{EventSignal, RawSignal, WaitOutcome};
pub use waiter::{Callback, MetricsSnapshot};
