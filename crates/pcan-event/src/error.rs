// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge errors and the C-compatible status codes they map to.

use crate::driver::DriverError;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure recorded by the waiter thread when its wait primitive breaks.
///
/// The thread terminates right after recording it; the bridge surfaces it on
/// the next `disable()` and through `health()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("waiter thread stopped: {message}")]
pub struct WaitFault {
    /// Human-readable description of the failed wait.
    pub message: String,
    /// Raw OS error code, when the failure came from the OS.
    pub os_code: Option<i32>,
}

impl WaitFault {
    pub(crate) fn from_io(context: &str, err: &io::Error) -> Self {
        Self {
            message: format!("{}: {}", context, err),
            os_code: err.raw_os_error(),
        }
    }
}

/// Errors returned by [`EventBridge`](crate::EventBridge) operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The driver could not provide, bind or unbind the ready signal.
    #[error("driver signal error: {0}")]
    DriverSignal(#[source] DriverError),

    /// An OS synchronization object could not be created or used.
    #[error("resource creation failed: {0}")]
    ResourceCreation(#[source] io::Error),

    /// The waiter thread could not be spawned.
    #[error("waiter thread spawn failed: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The waiter thread did not confirm startup in time.
    #[error("waiter thread did not start within {0:?}")]
    StartupTimeout(Duration),

    /// The waiter thread could not be joined cleanly.
    #[error("waiter thread join failed: {0}")]
    ShutdownJoin(String),

    /// `enable()` on a bridge that already has a waiter thread.
    #[error("bridge is already enabled")]
    AlreadyEnabled,

    /// `disable()` on a bridge with no waiter thread.
    #[error("bridge is not enabled")]
    NotEnabled,

    /// The waiter thread terminated on its own after a wait failure.
    #[error(transparent)]
    WaiterFault(WaitFault),
}

/// Status codes (C-compatible enum)
///
/// Returned by the process-global facade, and obtainable from any
/// [`BridgeError`] with `StatusCode::from(&err)`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Operation completed successfully
    Ok = 0,
    /// Driver could not provide or bind the ready signal
    ErrorDriverSignal = 1,
    /// OS synchronization object creation failed
    ErrorResourceCreation = 2,
    /// Waiter thread could not be spawned
    ErrorThreadSpawn = 3,
    /// Waiter thread did not confirm startup in time
    ErrorStartupTimeout = 4,
    /// Waiter thread join failed or timed out
    ErrorShutdownJoin = 5,
    /// A bridge is already enabled
    ErrorAlreadyEnabled = 6,
    /// No bridge is enabled
    ErrorNotEnabled = 7,
    /// Waiter thread stopped after a wait failure
    ErrorWaiterFault = 8,
}

impl StatusCode {
    /// Symbolic name of the status code.
    pub const fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::ErrorDriverSignal => "ERROR_DRIVER_SIGNAL",
            StatusCode::ErrorResourceCreation => "ERROR_RESOURCE_CREATION",
            StatusCode::ErrorThreadSpawn => "ERROR_THREAD_SPAWN",
            StatusCode::ErrorStartupTimeout => "ERROR_STARTUP_TIMEOUT",
            StatusCode::ErrorShutdownJoin => "ERROR_SHUTDOWN_JOIN",
            StatusCode::ErrorAlreadyEnabled => "ERROR_ALREADY_ENABLED",
            StatusCode::ErrorNotEnabled => "ERROR_NOT_ENABLED",
            StatusCode::ErrorWaiterFault => "ERROR_WAITER_FAULT",
        }
    }

    /// `true` for [`StatusCode::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&BridgeError> for StatusCode {
    fn from(err: &BridgeError) -> Self {
        match err {
            BridgeError::DriverSignal(_) => StatusCode::ErrorDriverSignal,
            BridgeError::ResourceCreation(_) => StatusCode::ErrorResourceCreation,
            BridgeError::ThreadSpawn(_) => StatusCode::ErrorThreadSpawn,
            BridgeError::StartupTimeout(_) => StatusCode::ErrorStartupTimeout,
            BridgeError::ShutdownJoin(_) => StatusCode::ErrorShutdownJoin,
            BridgeError::AlreadyEnabled => StatusCode::ErrorAlreadyEnabled,
            BridgeError::NotEnabled => StatusCode::ErrorNotEnabled,
            BridgeError::WaiterFault(_) => StatusCode::ErrorWaiterFault,
        }
    }
}

impl<T> From<&Result<T>> for StatusCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => StatusCode::Ok,
            Err(err) => StatusCode::from(err),
        }
    }
}

impl<T> From<Result<T>> for StatusCode {
    fn from(result: Result<T>) -> Self {
        StatusCode::from(&result)
    }
}

impl BridgeError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        StatusCode::from(self)
    }
}
