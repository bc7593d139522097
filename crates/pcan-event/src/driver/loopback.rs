// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process loopback driver.
//!
//! Stands in for CAN hardware: `fire()` queues a frame on a channel and
//! signals the channel's ready signal, `read()` takes it back out. Frames
//! fired while no signal is bound to the channel are discarded, the way a
//! driver with receive notification disabled would not wake anybody.

use super::{status, ChannelHandle, DriverError, ReadySignal, ReceiveEventDriver, ResetMode};
use crate::platform::EventSignal;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// How the loopback driver exposes its receive notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    /// Driver owns a manual-reset signal per channel and hands it out on
    /// acquisition. Reading the last pending frame resets it.
    Acquire,
    /// Driver asks the bridge for an auto-reset event and signals whatever
    /// event is bound to the channel.
    Bind,
}

#[derive(Default)]
struct LoopbackChannel {
    event: Option<Arc<EventSignal>>,
    bound: bool,
    pending: VecDeque<u64>,
    next_seq: u64,
    fired: u64,
}

/// Loopback implementation of [`ReceiveEventDriver`].
pub struct LoopbackDriver {
    mode: LoopbackMode,
    channels: Mutex<HashMap<ChannelHandle, LoopbackChannel>>,
    fail_acquire: Mutex<Option<DriverError>>,
    fail_bind: Mutex<Option<DriverError>>,
}

impl LoopbackDriver {
    /// Create a loopback driver operating in `mode`.
    pub fn new(mode: LoopbackMode) -> Self {
        Self {
            mode,
            channels: Mutex::new(HashMap::new()),
            fail_acquire: Mutex::new(None),
            fail_bind: Mutex::new(None),
        }
    }

    /// Shared acquire-mode driver.
    pub fn acquiring() -> Arc<Self> {
        Arc::new(Self::new(LoopbackMode::Acquire))
    }

    /// Shared bind-mode driver.
    pub fn binding() -> Arc<Self> {
        Arc::new(Self::new(LoopbackMode::Bind))
    }

    /// Operating mode.
    pub fn mode(&self) -> LoopbackMode {
        self.mode
    }

    /// Make the next acquisition fail with `err`.
    pub fn fail_next_acquire(&self, err: DriverError) {
        *self.fail_acquire.lock() = Some(err);
    }

    /// Make the next bind fail with `err`.
    pub fn fail_next_bind(&self, err: DriverError) {
        *self.fail_bind.lock() = Some(err);
    }

    /// Simulate reception of a frame on `channel`.
    ///
    /// Returns `false` when no ready signal is bound and the frame was dropped.
    pub fn fire(&self, channel: ChannelHandle) -> bool {
        let mut channels = self.channels.lock();
        let entry = channels.entry(channel).or_default();
        let Some(event) = entry.event.as_ref().filter(|_| entry.bound) else {
            log::trace!("[loopback] channel {} unbound, frame dropped", channel);
            return false;
        };

        if let Err(err) = event.signal() {
            log::debug!("[loopback] signal failed on channel {}: {}", channel, err);
            return false;
        }

        let seq = entry.next_seq;
        entry.next_seq += 1;
        entry.pending.push_back(seq);
        entry.fired += 1;
        true
    }

    /// Take the oldest pending frame of `channel`.
    ///
    /// In acquire mode, taking the last frame resets the ready signal.
    pub fn read(&self, channel: ChannelHandle) -> Option<u64> {
        let mut channels = self.channels.lock();
        let entry = channels.get_mut(&channel)?;
        let frame = entry.pending.pop_front();
        if self.mode == LoopbackMode::Acquire && entry.pending.is_empty() {
            if let Some(event) = entry.event.as_ref() {
                event.drain();
            }
        }
        frame
    }

    /// Take every pending frame of `channel`.
    pub fn read_all(&self, channel: ChannelHandle) -> Vec<u64> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read(channel) {
            frames.push(frame);
        }
        frames
    }

    /// Number of frames queued and not yet read.
    pub fn pending(&self, channel: ChannelHandle) -> usize {
        self.channels
            .lock()
            .get(&channel)
            .map_or(0, |entry| entry.pending.len())
    }

    /// Number of frames accepted by `fire` so far.
    pub fn fired(&self, channel: ChannelHandle) -> u64 {
        self.channels
            .lock()
            .get(&channel)
            .map_or(0, |entry| entry.fired)
    }

    /// `true` while a ready signal is bound to `channel`.
    pub fn is_bound(&self, channel: ChannelHandle) -> bool {
        self.channels
            .lock()
            .get(&channel)
            .is_some_and(|entry| entry.bound)
    }
}

impl ReceiveEventDriver for LoopbackDriver {
    fn acquire_ready_signal(
        &self,
        channel: ChannelHandle,
    ) -> Result<Option<ReadySignal>, DriverError> {
        if let Some(err) = self.fail_acquire.lock().take() {
            return Err(err);
        }

        match self.mode {
            LoopbackMode::Bind => Ok(None),
            LoopbackMode::Acquire => {
                let mut channels = self.channels.lock();
                let entry = channels.entry(channel).or_default();
                let event = match entry.event.as_ref() {
                    Some(event) => Arc::clone(event),
                    None => {
                        let event = Arc::new(
                            EventSignal::new()
                                .map_err(|_| DriverError::new(status::PCAN_ERROR_RESOURCE))?,
                        );
                        entry.event = Some(Arc::clone(&event));
                        event
                    }
                };
                entry.bound = true;
                log::debug!(
                    "[loopback] channel {} handing out ready signal {:?}",
                    channel,
                    event.raw()
                );
                // SAFETY: the event stays in the channel table until the driver
                // is dropped, and the bridge keeps the driver alive while its
                // waiter thread runs.
                Ok(Some(unsafe {
                    ReadySignal::borrowed(event.raw(), ResetMode::Manual)
                }))
            }
        }
    }

    fn bind_ready_signal(
        &self,
        channel: ChannelHandle,
        signal: &ReadySignal,
    ) -> Result<(), DriverError> {
        if let Some(err) = self.fail_bind.lock().take() {
            return Err(err);
        }
        if self.mode == LoopbackMode::Acquire {
            return Ok(());
        }

        let event = signal
            .event()
            .cloned()
            .ok_or(DriverError::new(status::PCAN_ERROR_ILLPARAMVAL))?;
        let mut channels = self.channels.lock();
        let entry = channels.entry(channel).or_default();
        entry.event = Some(event);
        entry.bound = true;
        log::debug!("[loopback] channel {} bound to {:?}", channel, signal.raw());
        Ok(())
    }

    fn unbind_ready_signal(&self, channel: ChannelHandle) -> Result<(), DriverError> {
        let mut channels = self.channels.lock();
        let entry = channels
            .get_mut(&channel)
            .ok_or(DriverError::new(status::PCAN_ERROR_ILLHANDLE))?;
        entry.bound = false;
        if self.mode == LoopbackMode::Bind {
            entry.event = None;
        }
        log::debug!("[loopback] channel {} unbound", channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const CH: ChannelHandle = ChannelHandle::new(0x51);

    #[test]
    fn test_fire_without_binding_drops_frame() {
        let driver = LoopbackDriver::new(LoopbackMode::Bind);
        assert!(!driver.fire(CH));
        assert_eq!(driver.pending(CH), 0);
        assert_eq!(driver.fired(CH), 0);
    }

    #[test]
    fn test_acquire_mode_hands_out_manual_signal() {
        let driver = LoopbackDriver::new(LoopbackMode::Acquire);
        let signal = driver
            .acquire_ready_signal(CH)
            .expect("acquire should succeed")
            .expect("acquire mode returns a signal");

        assert!(signal.is_borrowed());
        assert_eq!(signal.reset_mode(), ResetMode::Manual);
        assert!(driver.is_bound(CH));
    }

    #[test]
    fn test_acquire_mode_read_resets_signal() {
        let driver = LoopbackDriver::new(LoopbackMode::Acquire);
        let signal = driver
            .acquire_ready_signal(CH)
            .expect("acquire should succeed")
            .expect("acquire mode returns a signal");
        let shutdown = EventSignal::new().expect("event creation should succeed");

        assert!(driver.fire(CH));
        assert!(driver.fire(CH));
        let outcome = crate::platform::wait_any(
            signal.raw(),
            shutdown.raw(),
            Some(Duration::from_millis(100)),
        )
        .expect("wait should succeed");
        assert_eq!(outcome, crate::platform::WaitOutcome::Ready);

        assert_eq!(driver.read_all(CH), vec![0, 1]);
        let outcome = crate::platform::wait_any(
            signal.raw(),
            shutdown.raw(),
            Some(Duration::from_millis(10)),
        )
        .expect("wait should succeed");
        assert_eq!(outcome, crate::platform::WaitOutcome::Idle);
    }

    #[test]
    fn test_bind_mode_requires_owned_event() {
        let driver = LoopbackDriver::new(LoopbackMode::Bind);
        assert!(driver
            .acquire_ready_signal(CH)
            .expect("acquire should succeed")
            .is_none());

        let event = Arc::new(EventSignal::new().expect("event creation should succeed"));
        let signal = ReadySignal::owned(Arc::clone(&event), ResetMode::Auto);
        driver
            .bind_ready_signal(CH, &signal)
            .expect("bind should succeed");
        assert!(driver.fire(CH));
        assert!(event
            .wait_timeout(Duration::from_millis(100))
            .expect("wait should succeed"));

        driver
            .unbind_ready_signal(CH)
            .expect("unbind should succeed");
        assert!(!driver.fire(CH));
    }

    #[test]
    fn test_injected_failures_are_one_shot() {
        let driver = LoopbackDriver::new(LoopbackMode::Acquire);
        driver.fail_next_acquire(DriverError::new(status::PCAN_ERROR_NODRIVER));

        let err = driver
            .acquire_ready_signal(CH)
            .expect_err("first acquire should fail");
        assert_eq!(err.code, status::PCAN_ERROR_NODRIVER);
        assert!(driver.acquire_ready_signal(CH).is_ok());
    }

    #[test]
    fn test_unbind_unknown_channel_fails() {
        let driver = LoopbackDriver::new(LoopbackMode::Bind);
        let err = driver
            .unbind_ready_signal(ChannelHandle::new(0x7F))
            .expect_err("unknown channel should fail");
        assert_eq!(err.name(), "PCAN_ERROR_ILLCLIENT");
    }
}
