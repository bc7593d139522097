// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Driver seam: how the bridge obtains and binds the receive-event signal.
//!
//! CAN interface drivers expose receive notification in one of two ways:
//!
//! - **Acquire**: the driver owns a waitable primitive per channel and hands
//!   it out on request (descriptor-based drivers).
//! - **Bind**: the application creates the primitive and tells the driver to
//!   signal it (event-object drivers).
//!
//! [`ReceiveEventDriver`] covers both. A driver returning `None` from
//! [`acquire_ready_signal`](ReceiveEventDriver::acquire_ready_signal) asks the
//! bridge to create the signal, which is then passed to
//! [`bind_ready_signal`](ReceiveEventDriver::bind_ready_signal).

pub mod loopback;

use crate::platform::{EventSignal, RawSignal};
use std::fmt;
use std::sync::Arc;

pub use loopback::{LoopbackDriver, LoopbackMode};

/// Opaque identifier of a CAN channel (a PCAN-Basic `TPCANHandle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(u16);

impl ChannelHandle {
    /// Wrap a raw channel handle.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw channel handle value.
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl From<u16> for ChannelHandle {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// How a ready signal returns to the unsignaled state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// The waiter consumes the wake-up before invoking the callback.
    /// Firings that land before the consume coalesce into one invocation.
    Auto,
    /// The consumer resets the signal, typically by reading the pending
    /// frames from inside the callback. The callback keeps being invoked
    /// while the signal stays active.
    Manual,
}

enum SignalSource {
    Owned(Arc<EventSignal>),
    Borrowed(RawSignal),
}

/// Primitive that becomes active when a channel has received data.
pub struct ReadySignal {
    source: SignalSource,
    reset: ResetMode,
}

impl ReadySignal {
    /// Ready signal backed by an event the caller owns.
    ///
    /// The event stays open for as long as any clone of the `Arc` lives.
    pub fn owned(event: Arc<EventSignal>, reset: ResetMode) -> Self {
        Self {
            source: SignalSource::Owned(event),
            reset,
        }
    }

    /// Ready signal backed by a primitive the driver owns.
    ///
    /// # Safety
    ///
    /// `raw` must stay open and waitable until the driver's
    /// `unbind_ready_signal` has returned for the channel and the bridge using
    /// it has been disabled.
    pub unsafe fn borrowed(raw: RawSignal, reset: ResetMode) -> Self {
        Self {
            source: SignalSource::Borrowed(raw),
            reset,
        }
    }

    /// Raw reference used by the wait primitive.
    pub fn raw(&self) -> RawSignal {
        match &self.source {
            SignalSource::Owned(event) => event.raw(),
            SignalSource::Borrowed(raw) => *raw,
        }
    }

    /// Reset behavior of this signal.
    pub fn reset_mode(&self) -> ResetMode {
        self.reset
    }

    /// The owned event, if the signal is not driver-owned.
    ///
    /// Bind-style drivers keep a clone of it to signal received data.
    pub fn event(&self) -> Option<&Arc<EventSignal>> {
        match &self.source {
            SignalSource::Owned(event) => Some(event),
            SignalSource::Borrowed(_) => None,
        }
    }

    /// `true` when the driver, not the bridge, owns the primitive.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.source, SignalSource::Borrowed(_))
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("raw", &self.raw())
            .field("reset", &self.reset)
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

/// Error reported by a driver, carrying its status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError {
    /// Raw driver status (PCAN-Basic `TPCANStatus`).
    pub code: u32,
}

impl DriverError {
    /// Wrap a raw driver status.
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// Symbolic name of the status, see [`status_name`].
    pub fn name(&self) -> &'static str {
        status_name(self.code)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code, self.name())
    }
}

impl std::error::Error for DriverError {}

/// PCAN-Basic status values.
pub mod status {
    pub const PCAN_ERROR_OK: u32 = 0x00000;
    pub const PCAN_ERROR_XMTFULL: u32 = 0x00001;
    pub const PCAN_ERROR_OVERRUN: u32 = 0x00002;
    pub const PCAN_ERROR_BUSLIGHT: u32 = 0x00004;
    pub const PCAN_ERROR_BUSHEAVY: u32 = 0x00008;
    pub const PCAN_ERROR_BUSWARNING: u32 = PCAN_ERROR_BUSHEAVY;
    pub const PCAN_ERROR_BUSPASSIVE: u32 = 0x40000;
    pub const PCAN_ERROR_BUSOFF: u32 = 0x00010;
    pub const PCAN_ERROR_ANYBUSERR: u32 = PCAN_ERROR_BUSWARNING
        | PCAN_ERROR_BUSLIGHT
        | PCAN_ERROR_BUSHEAVY
        | PCAN_ERROR_BUSOFF
        | PCAN_ERROR_BUSPASSIVE;
    pub const PCAN_ERROR_QRCVEMPTY: u32 = 0x00020;
    pub const PCAN_ERROR_QOVERRUN: u32 = 0x00040;
    pub const PCAN_ERROR_QXMTFULL: u32 = 0x00080;
    pub const PCAN_ERROR_REGTEST: u32 = 0x00100;
    pub const PCAN_ERROR_NODRIVER: u32 = 0x00200;
    pub const PCAN_ERROR_HWINUSE: u32 = 0x00400;
    pub const PCAN_ERROR_NETINUSE: u32 = 0x00800;
    pub const PCAN_ERROR_ILLHW: u32 = 0x01400;
    pub const PCAN_ERROR_ILLNET: u32 = 0x01800;
    pub const PCAN_ERROR_ILLCLIENT: u32 = 0x01C00;
    pub const PCAN_ERROR_ILLHANDLE: u32 = PCAN_ERROR_ILLHW | PCAN_ERROR_ILLNET | PCAN_ERROR_ILLCLIENT;
    pub const PCAN_ERROR_RESOURCE: u32 = 0x02000;
    pub const PCAN_ERROR_ILLPARAMTYPE: u32 = 0x04000;
    pub const PCAN_ERROR_ILLPARAMVAL: u32 = 0x08000;
    pub const PCAN_ERROR_UNKNOWN: u32 = 0x10000;
    pub const PCAN_ERROR_ILLDATA: u32 = 0x20000;
    pub const PCAN_ERROR_ILLMODE: u32 = 0x80000;
    pub const PCAN_ERROR_CAUTION: u32 = 0x2000000;
    pub const PCAN_ERROR_INITIALIZE: u32 = 0x4000000;
    pub const PCAN_ERROR_ILLOPERATION: u32 = 0x8000000;
}

// First match wins: aliased values resolve to the earlier name.
const STATUS_NAMES: &[(u32, &str)] = &[
    (status::PCAN_ERROR_OK, "PCAN_ERROR_OK"),
    (status::PCAN_ERROR_XMTFULL, "PCAN_ERROR_XMTFULL"),
    (status::PCAN_ERROR_OVERRUN, "PCAN_ERROR_OVERRUN"),
    (status::PCAN_ERROR_BUSLIGHT, "PCAN_ERROR_BUSLIGHT"),
    (status::PCAN_ERROR_BUSHEAVY, "PCAN_ERROR_BUSHEAVY"),
    (status::PCAN_ERROR_BUSWARNING, "PCAN_ERROR_BUSWARNING"),
    (status::PCAN_ERROR_BUSPASSIVE, "PCAN_ERROR_BUSPASSIVE"),
    (status::PCAN_ERROR_BUSOFF, "PCAN_ERROR_BUSOFF"),
    (status::PCAN_ERROR_ANYBUSERR, "PCAN_ERROR_ANYBUSERR"),
    (status::PCAN_ERROR_QRCVEMPTY, "PCAN_ERROR_QRCVEMPTY"),
    (status::PCAN_ERROR_QOVERRUN, "PCAN_ERROR_QOVERRUN"),
    (status::PCAN_ERROR_QXMTFULL, "PCAN_ERROR_QXMTFULL"),
    (status::PCAN_ERROR_REGTEST, "PCAN_ERROR_REGTEST"),
    (status::PCAN_ERROR_NODRIVER, "PCAN_ERROR_NODRIVER"),
    (status::PCAN_ERROR_HWINUSE, "PCAN_ERROR_HWINUSE"),
    (status::PCAN_ERROR_NETINUSE, "PCAN_ERROR_NETINUSE"),
    (status::PCAN_ERROR_ILLHW, "PCAN_ERROR_ILLHW"),
    (status::PCAN_ERROR_ILLNET, "PCAN_ERROR_ILLNET"),
    (status::PCAN_ERROR_ILLCLIENT, "PCAN_ERROR_ILLCLIENT"),
    (status::PCAN_ERROR_ILLHANDLE, "PCAN_ERROR_ILLHANDLE"),
    (status::PCAN_ERROR_RESOURCE, "PCAN_ERROR_RESOURCE"),
    (status::PCAN_ERROR_ILLPARAMTYPE, "PCAN_ERROR_ILLPARAMTYPE"),
    (status::PCAN_ERROR_ILLPARAMVAL, "PCAN_ERROR_ILLPARAMVAL"),
    (status::PCAN_ERROR_UNKNOWN, "PCAN_ERROR_UNKNOWN"),
    (status::PCAN_ERROR_ILLDATA, "PCAN_ERROR_ILLDATA"),
    (status::PCAN_ERROR_ILLMODE, "PCAN_ERROR_ILLMODE"),
    (status::PCAN_ERROR_CAUTION, "PCAN_ERROR_CAUTION"),
    (status::PCAN_ERROR_INITIALIZE, "PCAN_ERROR_INITIALIZE"),
    (status::PCAN_ERROR_ILLOPERATION, "PCAN_ERROR_ILLOPERATION"),
];

/// Name of a PCAN-Basic status value, or `"Status unknown"`.
pub fn status_name(code: u32) -> &'static str {
    STATUS_NAMES
        .iter()
        .find(|(value, _)| *value == code)
        .map(|(_, name)| *name)
        .unwrap_or("Status unknown")
}

/// Driver capability consumed by the bridge.
///
/// Implementations must be callable from the thread running
/// `enable`/`disable`; the waiter thread never calls into the driver.
pub trait ReceiveEventDriver: Send + Sync {
    /// Obtain the ready signal for `channel`.
    ///
    /// `Ok(None)` asks the bridge to create an auto-reset event and bind it
    /// with [`bind_ready_signal`](Self::bind_ready_signal).
    fn acquire_ready_signal(
        &self,
        channel: ChannelHandle,
    ) -> Result<Option<ReadySignal>, DriverError>;

    /// Make `signal` the active receive notification target for `channel`.
    ///
    /// Called after the waiter thread is waiting. Drivers where acquisition
    /// already implies binding keep the default.
    fn bind_ready_signal(
        &self,
        _channel: ChannelHandle,
        _signal: &ReadySignal,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    /// Stop signaling the ready signal of `channel`.
    ///
    /// Called by `disable` before the signal is released.
    fn unbind_ready_signal(&self, _channel: ChannelHandle) -> Result<(), DriverError> {
        Ok(())
    }
}
