// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-global single-bridge facade.
//!
//! Keeps one [`EventBridge`] per process and reports results as
//! [`StatusCode`]s, for callers on the other side of an FFI or runtime
//! boundary that hold only a channel and a callback.
//!
//! The slot lock is never held while a waiter thread is joined, so the
//! callback may call [`state`] or [`disable`] (the latter is rejected with
//! `ErrorShutdownJoin`).

use crate::bridge::{BridgeState, EventBridge};
use crate::driver::{ChannelHandle, ReceiveEventDriver};
use crate::error::{BridgeError, StatusCode};
use parking_lot::Mutex;
use std::sync::Arc;

enum Slot {
    Idle,
    // enable or disable running outside the lock
    Busy(BridgeState),
    Active(EventBridge),
}

static SLOT: Mutex<Slot> = parking_lot::const_mutex(Slot::Idle);

/// Enable the process-wide bridge on `channel`.
///
/// Returns `ErrorAlreadyEnabled` while a bridge is enabled, or being enabled
/// or disabled by another thread.
pub fn enable<F>(
    driver: Arc<dyn ReceiveEventDriver>,
    channel: ChannelHandle,
    callback: F,
) -> StatusCode
where
    F: FnMut(ChannelHandle) + Send + 'static,
{
    {
        let mut slot = SLOT.lock();
        if !matches!(*slot, Slot::Idle) {
            return StatusCode::ErrorAlreadyEnabled;
        }
        *slot = Slot::Busy(BridgeState::Enabling);
    }

    let mut bridge = EventBridge::new(driver);
    let result = bridge.enable(channel, callback);

    let mut slot = SLOT.lock();
    match result {
        Ok(()) => {
            *slot = Slot::Active(bridge);
            StatusCode::Ok
        }
        Err(err) => {
            *slot = Slot::Idle;
            log::debug!("[global] enable failed: {}", err);
            err.status()
        }
    }
}

/// Disable the process-wide bridge.
pub fn disable() -> StatusCode {
    let mut bridge = {
        let mut slot = SLOT.lock();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Active(bridge) => {
                *slot = Slot::Busy(BridgeState::Disabling);
                bridge
            }
            other => {
                *slot = other;
                return StatusCode::ErrorNotEnabled;
            }
        }
    };

    let result = bridge.disable();

    let mut slot = SLOT.lock();
    if bridge.is_enabled() {
        // Rejected without tearing down (called from the callback).
        *slot = Slot::Active(bridge);
    } else {
        *slot = Slot::Idle;
    }
    drop(slot);

    if let Err(err) = &result {
        log::debug!("[global] disable: {}", err);
    }
    StatusCode::from(&result)
}

/// State of the process-wide bridge.
pub fn state() -> BridgeState {
    match &*SLOT.lock() {
        Slot::Idle => BridgeState::Disabled,
        Slot::Busy(state) => *state,
        Slot::Active(bridge) => bridge.state(),
    }
}

/// Health of the process-wide bridge, see [`EventBridge::health`].
pub fn health() -> StatusCode {
    match &*SLOT.lock() {
        Slot::Active(bridge) => StatusCode::from(&bridge.health()),
        _ => BridgeError::NotEnabled.status(),
    }
}
