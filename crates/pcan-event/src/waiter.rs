// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waiter thread: turns ready-signal activations into callback invocations.
//!
//! # Lifecycle
//! ```text
//! Spawned -> signal startup -> WaitingForEvent <-> ready: invoke callback
//!                                    |
//!                                    v shutdown
//!                               Exiting -> Terminal (exit completion)
//! ```
//!
//! The thread never calls into the driver. It only waits on the two raw
//! signals, consumes auto-reset wake-ups and runs the callback behind the
//! dispatch gate.

use crate::driver::{ChannelHandle, ReadySignal, ReceiveEventDriver, ResetMode};
use crate::error::WaitFault;
use crate::platform::{self, EventSignal, WaitOutcome};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Callback invoked on the waiter thread with the bridged channel.
pub type Callback = Box<dyn FnMut(ChannelHandle) + Send + 'static>;

// Poll period used while the gate is closed and shutdown is pending.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Waiter metrics for diagnostics
#[derive(Debug, Default)]
pub(crate) struct BridgeMetrics {
    /// Waits that ended on the ready signal
    pub wakeups: AtomicU64,
    /// Callback invocations started
    pub callbacks: AtomicU64,
    /// Callback panics (caught)
    pub callback_panics: AtomicU64,
    /// Extra firings folded into a single wake-up by auto-reset draining
    pub coalesced_drains: AtomicU64,
    /// Waits that ended on the wait interval
    pub idle_timeouts: AtomicU64,
}

/// Point-in-time copy of [`BridgeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub wakeups: u64,
    pub callbacks: u64,
    pub callback_panics: u64,
    pub coalesced_drains: u64,
    pub idle_timeouts: u64,
}

impl BridgeMetrics {
    /// Get snapshot of metrics
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            wakeups: self.wakeups.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            coalesced_drains: self.coalesced_drains.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the bridge and its waiter thread.
pub(crate) struct WaiterShared {
    /// Held across every callback invocation.
    gate: Mutex<()>,
    /// Set by `close_gate`; read by the waiter with `gate` held.
    closed: AtomicBool,
    fault: Mutex<Option<WaitFault>>,
    exited: Mutex<bool>,
    exit_cv: Condvar,
}

impl WaiterShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Mutex::new(()),
            closed: AtomicBool::new(false),
            fault: Mutex::new(None),
            exited: Mutex::new(false),
            exit_cv: Condvar::new(),
        })
    }

    fn record_fault(&self, fault: WaitFault) {
        log::error!("[waiter] {}", fault);
        let mut slot = self.fault.lock();
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    fn mark_exited(&self) {
        *self.exited.lock() = true;
        self.exit_cv.notify_all();
    }

    /// Wait for the exit completion; `false` if `deadline` passed first.
    fn wait_exited(&self, deadline: Instant) -> bool {
        let mut exited = self.exited.lock();
        while !*exited {
            if self.exit_cv.wait_until(&mut exited, deadline).timed_out() {
                return *exited;
            }
        }
        true
    }
}

// Signals the exit completion however the thread ends.
struct ExitGuard(Arc<WaiterShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

/// Everything the waiter thread owns for its lifetime.
pub(crate) struct WaiterParams {
    pub channel: ChannelHandle,
    pub callback: Callback,
    pub ready: Arc<ReadySignal>,
    pub shutdown: Arc<EventSignal>,
    pub startup: Arc<EventSignal>,
    pub wait_interval: Option<Duration>,
    pub shared: Arc<WaiterShared>,
    pub metrics: Arc<BridgeMetrics>,
    /// Keeps driver-owned primitives open until the thread is gone.
    pub _driver: Arc<dyn ReceiveEventDriver>,
    #[cfg(test)]
    pub startup_delay: Option<Duration>,
}

impl fmt::Debug for WaiterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterParams")
            .field("channel", &self.channel)
            .field("ready", &self.ready)
            .field("shutdown", &self.shutdown.raw())
            .field("startup", &self.startup.raw())
            .field("wait_interval", &self.wait_interval)
            .finish_non_exhaustive()
    }
}

impl WaiterParams {
    fn run(mut self) {
        let _exit = ExitGuard(Arc::clone(&self.shared));
        log::trace!("[waiter] starting {:?}", self);

        #[cfg(test)]
        if let Some(delay) = self.startup_delay {
            thread::sleep(delay);
        }

        if let Err(err) = self.startup.signal() {
            self.shared
                .record_fault(WaitFault::from_io("startup signal failed", &err));
            return;
        }

        let ready = self.ready.raw();
        let shutdown = self.shutdown.raw();
        loop {
            match platform::wait_any(ready, shutdown, self.wait_interval) {
                Ok(WaitOutcome::Shutdown) => break,
                Ok(WaitOutcome::Idle) => {
                    self.metrics.idle_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                Ok(WaitOutcome::Ready) => {
                    if !self.dispatch() {
                        // Gate closed: a manual-reset signal may stay active,
                        // so only the shutdown signal is waited on from here.
                        if let Err(err) = self.wait_for_shutdown() {
                            self.shared
                                .record_fault(WaitFault::from_io("shutdown wait failed", &err));
                            return;
                        }
                        break;
                    }
                }
                Err(err) => {
                    self.shared
                        .record_fault(WaitFault::from_io("wait on ready/shutdown failed", &err));
                    return;
                }
            }
        }

        log::debug!("[waiter] channel {} exiting", self.channel);
    }

    /// Handle one ready wake-up. Returns `false` if the gate is closed.
    fn dispatch(&mut self) -> bool {
        self.metrics.wakeups.fetch_add(1, Ordering::Relaxed);

        if self.ready.reset_mode() == ResetMode::Auto {
            let folded = platform::drain(self.ready.raw());
            if folded > 1 {
                self.metrics
                    .coalesced_drains
                    .fetch_add(folded - 1, Ordering::Relaxed);
            }
        }

        let gate = self.shared.gate.lock();
        if self.shared.closed.load(Ordering::Acquire) {
            return false;
        }

        self.metrics.callbacks.fetch_add(1, Ordering::Relaxed);
        let channel = self.channel;
        let callback = &mut self.callback;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(channel))) {
            self.metrics.callback_panics.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "[waiter] callback panicked on channel {}: {}",
                channel,
                panic_message(payload.as_ref())
            );
        }
        drop(gate);
        true
    }

    fn wait_for_shutdown(&self) -> io::Result<()> {
        let interval = self.wait_interval.unwrap_or(SHUTDOWN_POLL);
        while !self.shutdown.wait_timeout(interval)? {}
        Ok(())
    }
}

/// Why a waiter thread could not be joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JoinError {
    /// The join deadline passed; the thread was detached.
    TimedOut,
    /// The thread terminated by panicking.
    Panicked(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::TimedOut => f.write_str("waiter did not exit before the deadline, detached"),
            JoinError::Panicked(msg) => write!(f, "waiter panicked: {}", msg),
        }
    }
}

/// Handle held by the bridge on a running waiter thread.
pub(crate) struct WaiterHandle {
    thread: JoinHandle<()>,
    shared: Arc<WaiterShared>,
}

impl WaiterHandle {
    /// Spawn the named waiter thread, moving `params` into it.
    pub(crate) fn spawn(name: &str, params: WaiterParams) -> io::Result<Self> {
        let shared = Arc::clone(&params.shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || params.run())?;
        Ok(Self { thread, shared })
    }

    /// Close the dispatch gate and wait out an invocation in flight.
    ///
    /// Returns `false` if the invocation was still running at `deadline`;
    /// the gate is closed either way.
    pub(crate) fn close_gate(&self, deadline: Option<Instant>) -> bool {
        let guard = match deadline {
            Some(deadline) => self.shared.gate.try_lock_until(deadline),
            None => Some(self.shared.gate.lock()),
        };
        self.shared.closed.store(true, Ordering::Release);
        guard.is_some()
    }

    /// Fault recorded by the thread, if any.
    pub(crate) fn fault(&self) -> Option<WaitFault> {
        self.shared.fault.lock().clone()
    }

    /// `true` if the thread has terminated.
    pub(crate) fn has_exited(&self) -> bool {
        *self.shared.exited.lock()
    }

    /// `true` when called from the waiter thread itself.
    pub(crate) fn is_current(&self) -> bool {
        self.thread_id() == thread::current().id()
    }

    fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }

    /// Join the thread, bounded by `deadline` when given, and return the
    /// fault it recorded, if any.
    ///
    /// Past the deadline the thread is detached; it still holds its own
    /// references to every primitive it waits on.
    pub(crate) fn join(self, deadline: Option<Instant>) -> Result<Option<WaitFault>, JoinError> {
        if let Some(deadline) = deadline {
            if !self.shared.wait_exited(deadline) {
                log::error!(
                    "[waiter] thread {:?} still running at join deadline, detaching",
                    self.thread.thread().name()
                );
                return Err(JoinError::TimedOut);
            }
        }

        self.thread
            .join()
            .map_err(|payload| JoinError::Panicked(panic_message(payload.as_ref()).to_string()))?;
        Ok(self.shared.fault.lock().take())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
