// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event bridge: enable/disable protocol around one waiter thread.
//!
//! # Enable
//! ```text
//! acquire ready signal (driver) or create an auto-reset one
//!     v
//! create shutdown + startup signals
//!     v
//! spawn waiter ---> waiter signals startup, starts waiting
//!     v
//! wait for startup (bounded)
//!     v
//! bind ready signal (driver)
//! ```
//!
//! # Disable
//! ```text
//! close dispatch gate -> unbind (driver) -> signal shutdown -> join -> release
//! ```
//!
//! Every primitive is created inside `enable` and released by the matching
//! `disable`, or by `enable` itself when it fails part-way.

use crate::config::BridgeConfig;
use crate::driver::{ChannelHandle, ReadySignal, ReceiveEventDriver, ResetMode};
use crate::error::{BridgeError, Result};
use crate::platform::EventSignal;
use crate::waiter::{
    BridgeMetrics, Callback, MetricsSnapshot, WaiterHandle, WaiterParams, WaiterShared,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(test)]
mod tests;

/// Lifecycle state of an [`EventBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeState {
    /// No waiter thread, no primitives.
    Disabled,
    /// `enable` in progress.
    Enabling,
    /// Waiter thread running and bound to the driver.
    Enabled,
    /// `disable` in progress.
    Disabling,
    /// The waiter thread stopped on its own; `disable` reports why.
    Faulted,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BridgeState::Disabled => "disabled",
            BridgeState::Enabling => "enabling",
            BridgeState::Enabled => "enabled",
            BridgeState::Disabling => "disabling",
            BridgeState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

// Resources owned by an enabled bridge.
struct ActiveBridge {
    channel: ChannelHandle,
    ready: Arc<ReadySignal>,
    shutdown: Arc<EventSignal>,
    startup: Arc<EventSignal>,
    waiter: WaiterHandle,
    // The driver may signal `ready` and must be unbound on teardown.
    bound: bool,
}

/// Bridges a driver's receive-event signal to a callback.
///
/// At most one waiter thread runs per bridge. Independent bridges may run
/// concurrently on different channels.
///
/// # Examples
/// ```no_run
/// use pcan_event::{ChannelHandle, EventBridge, LoopbackDriver};
///
/// let driver = LoopbackDriver::binding();
/// let mut bridge = EventBridge::new(driver.clone());
/// bridge
///     .enable(ChannelHandle::new(0x51), |channel| {
///         println!("data ready on {}", channel);
///     })
///     .expect("enable should succeed");
///
/// driver.fire(ChannelHandle::new(0x51));
/// bridge.disable().expect("disable should succeed");
/// ```
pub struct EventBridge {
    driver: Arc<dyn ReceiveEventDriver>,
    config: BridgeConfig,
    metrics: Arc<BridgeMetrics>,
    state: BridgeState,
    active: Option<ActiveBridge>,
    #[cfg(test)]
    startup_delay: Option<Duration>,
}

impl EventBridge {
    /// Create a disabled bridge with the default configuration.
    pub fn new(driver: Arc<dyn ReceiveEventDriver>) -> Self {
        Self::with_config(driver, BridgeConfig::default())
    }

    /// Create a disabled bridge with `config`.
    pub fn with_config(driver: Arc<dyn ReceiveEventDriver>, config: BridgeConfig) -> Self {
        Self {
            driver,
            config,
            metrics: Arc::new(BridgeMetrics::default()),
            state: BridgeState::Disabled,
            active: None,
            #[cfg(test)]
            startup_delay: None,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start delivering ready notifications of `channel` to `callback`.
    ///
    /// Returns once the waiter thread is waiting and the ready signal is
    /// bound, so a signal fired right after this call is not lost. On error
    /// every primitive created so far is released and the bridge stays
    /// disabled.
    ///
    /// `callback` runs on the waiter thread, one invocation at a time.
    pub fn enable<F>(&mut self, channel: ChannelHandle, callback: F) -> Result<()>
    where
        F: FnMut(ChannelHandle) + Send + 'static,
    {
        if self.active.is_some() {
            return Err(BridgeError::AlreadyEnabled);
        }

        self.state = BridgeState::Enabling;
        match self.start(channel, Box::new(callback)) {
            Ok(active) => {
                log::debug!(
                    "[bridge] enabled channel {} (ready {:?})",
                    channel,
                    active.ready
                );
                self.active = Some(active);
                self.state = BridgeState::Enabled;
                Ok(())
            }
            Err(err) => {
                log::debug!("[bridge] enable of channel {} failed: {}", channel, err);
                self.state = BridgeState::Disabled;
                Err(err)
            }
        }
    }

    fn start(
        &self,
        channel: ChannelHandle,
        callback: Callback,
    ) -> Result<ActiveBridge> {
        let acquired = self
            .driver
            .acquire_ready_signal(channel)
            .map_err(BridgeError::DriverSignal)?;
        // A driver that hands out its own signal is already signaling it.
        let implicitly_bound = acquired.is_some();

        let mut active = match self.spawn_waiter(channel, callback, acquired) {
            Ok(active) => active,
            Err(err) => {
                if implicitly_bound {
                    if let Err(unbind) = self.driver.unbind_ready_signal(channel) {
                        log::debug!("[bridge] unbind after failed enable: {}", unbind);
                    }
                }
                return Err(err);
            }
        };
        active.bound = implicitly_bound;

        let timeout = self.config.startup_timeout();
        let started = match active.startup.wait_timeout(timeout) {
            Ok(started) => started,
            Err(err) => {
                self.teardown_quiet(active);
                return Err(BridgeError::ResourceCreation(err));
            }
        };
        if !started {
            log::error!(
                "[bridge] waiter for channel {} did not start within {:?}",
                channel,
                timeout
            );
            self.teardown_quiet(active);
            return Err(BridgeError::StartupTimeout(timeout));
        }

        if let Err(err) = self.driver.bind_ready_signal(channel, &active.ready) {
            log::error!("[bridge] binding channel {} failed: {}", channel, err);
            self.teardown_quiet(active);
            return Err(BridgeError::DriverSignal(err));
        }
        active.bound = true;

        Ok(active)
    }

    fn spawn_waiter(
        &self,
        channel: ChannelHandle,
        callback: Callback,
        acquired: Option<ReadySignal>,
    ) -> Result<ActiveBridge> {
        let ready = match acquired {
            Some(signal) => signal,
            None => ReadySignal::owned(
                Arc::new(EventSignal::new().map_err(BridgeError::ResourceCreation)?),
                ResetMode::Auto,
            ),
        };
        let ready = Arc::new(ready);
        let shutdown = Arc::new(EventSignal::new().map_err(BridgeError::ResourceCreation)?);
        let startup = Arc::new(EventSignal::new().map_err(BridgeError::ResourceCreation)?);

        let params = WaiterParams {
            channel,
            callback,
            ready: Arc::clone(&ready),
            shutdown: Arc::clone(&shutdown),
            startup: Arc::clone(&startup),
            wait_interval: self.config.wait_interval(),
            shared: WaiterShared::new(),
            metrics: Arc::clone(&self.metrics),
            _driver: Arc::clone(&self.driver),
            #[cfg(test)]
            startup_delay: self.startup_delay,
        };
        let waiter = WaiterHandle::spawn(&self.config.thread_name, params)
            .map_err(BridgeError::ThreadSpawn)?;

        Ok(ActiveBridge {
            channel,
            ready,
            shutdown,
            startup,
            waiter,
            bound: false,
        })
    }

    /// Stop delivering notifications and release every primitive.
    ///
    /// Blocks until the waiter thread has exited (bounded by
    /// `join_timeout_ms` when configured). No callback invocation starts
    /// once this call has begun, and none is running when it returns.
    ///
    /// The bridge is disabled afterwards even when an error is returned.
    /// Calling it from inside the callback is rejected with
    /// [`BridgeError::ShutdownJoin`] and leaves the bridge enabled.
    pub fn disable(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Err(BridgeError::NotEnabled);
        };

        if active.waiter.is_current() {
            log::error!(
                "[bridge] disable of channel {} called from its own waiter thread",
                active.channel
            );
            self.active = Some(active);
            return Err(BridgeError::ShutdownJoin(
                "disable called from the waiter thread".to_string(),
            ));
        }

        let channel = active.channel;
        self.state = BridgeState::Disabling;
        let result = self.teardown(active, self.config.join_timeout());
        self.state = BridgeState::Disabled;

        match &result {
            Ok(()) => log::debug!("[bridge] disabled channel {}", channel),
            Err(err) => log::error!("[bridge] disable of channel {}: {}", channel, err),
        }
        result
    }

    fn teardown(&self, active: ActiveBridge, join_bound: Option<Duration>) -> Result<()> {
        let ActiveBridge {
            channel,
            ready,
            shutdown,
            startup,
            waiter,
            bound,
        } = active;

        let deadline = join_bound.map(|timeout| Instant::now() + timeout);
        if !waiter.close_gate(deadline) {
            log::error!(
                "[bridge] callback on channel {} still running at join deadline",
                channel
            );
        }

        let unbind = if bound {
            self.driver.unbind_ready_signal(channel)
        } else {
            Ok(())
        };

        let joined = match shutdown.signal() {
            Ok(()) => waiter.join(deadline),
            Err(err) => {
                // The waiter cannot be told to stop; do not block forever.
                log::error!("[bridge] shutdown signal failed: {}", err);
                let fallback = Instant::now() + self.config.startup_timeout();
                waiter.join(Some(deadline.unwrap_or(fallback)))
            }
        };

        drop(startup);
        drop(shutdown);
        drop(ready);

        match joined {
            Ok(Some(fault)) => Err(BridgeError::WaiterFault(fault)),
            Ok(None) => unbind.map_err(BridgeError::DriverSignal),
            Err(err) => Err(BridgeError::ShutdownJoin(err.to_string())),
        }
    }

    // Unwinds a failed enable. The join is always bounded, by the join
    // timeout or else the startup timeout, and detaches on expiry.
    fn teardown_quiet(&self, active: ActiveBridge) {
        let bound = self
            .config
            .join_timeout()
            .unwrap_or_else(|| self.config.startup_timeout());
        if let Err(err) = self.teardown(active, Some(bound)) {
            log::debug!("[bridge] teardown after failed enable: {}", err);
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        match &self.active {
            Some(active) if active.waiter.fault().is_some() || active.waiter.has_exited() => {
                BridgeState::Faulted
            }
            _ => self.state,
        }
    }

    /// `Ok` while enabled and the waiter thread is healthy.
    pub fn health(&self) -> Result<()> {
        let active = self.active.as_ref().ok_or(BridgeError::NotEnabled)?;
        match active.waiter.fault() {
            Some(fault) => Err(BridgeError::WaiterFault(fault)),
            None => Ok(()),
        }
    }

    /// Counters accumulated over the bridge's lifetime.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Channel currently bridged.
    pub fn channel(&self) -> Option<ChannelHandle> {
        self.active.as_ref().map(|active| active.channel)
    }

    /// `true` while a waiter thread exists.
    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub(crate) fn set_startup_delay(&mut self, delay: Option<Duration>) {
        self.startup_delay = delay;
    }
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("state", &self.state())
            .field("channel", &self.channel())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        if active.waiter.is_current() {
            // Dropped from its own callback: joining would self-deadlock.
            self.detach_from_waiter(active);
            return;
        }

        if let Err(err) = self.teardown(active, self.config.join_timeout()) {
            log::error!("[bridge] disable on drop failed: {}", err);
        }
    }
}

impl EventBridge {
    // Releases the driver side and asks the waiter to exit once the running
    // callback returns. The thread is detached with its own references.
    fn detach_from_waiter(&self, active: ActiveBridge) {
        let ActiveBridge {
            channel,
            shutdown,
            bound,
            ..
        } = active;
        log::error!(
            "[bridge] channel {} dropped from its own waiter thread, detaching",
            channel
        );

        if bound {
            if let Err(err) = self.driver.unbind_ready_signal(channel) {
                log::error!("[bridge] unbind on drop failed: {}", err);
            }
        }
        if let Err(err) = shutdown.signal() {
            log::error!("[bridge] shutdown signal failed: {}", err);
        }
    }
}
