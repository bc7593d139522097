// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Enable/disable protocol tests against the loopback driver.

use super::*;
use crate::driver::{status, DriverError, LoopbackDriver};
use crate::error::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

const CH: ChannelHandle = ChannelHandle::new(0x51);

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn fast_config() -> BridgeConfig {
    BridgeConfig::default().with_wait_interval(Some(Duration::from_millis(20)))
}

#[test]
fn test_disable_without_enable_returns_not_enabled() {
    let mut bridge = EventBridge::new(LoopbackDriver::binding());

    let err = bridge.disable().expect_err("disable should fail");
    assert!(matches!(err, BridgeError::NotEnabled));
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert!(matches!(bridge.health(), Err(BridgeError::NotEnabled)));
}

#[test]
fn test_fire_right_after_enable_invokes_once() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let calls = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&calls);
    let reader = Arc::clone(&driver);
    bridge
        .enable(CH, move |channel| {
            reader.read_all(channel);
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("enable should succeed");
    assert_eq!(bridge.state(), BridgeState::Enabled);
    assert_eq!(bridge.channel(), Some(CH));

    assert!(driver.fire(CH), "signal must already be bound");
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 1));

    // No spurious extra invocation.
    thread::sleep(Duration::from_millis(60));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    bridge.disable().expect("disable should succeed");
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert_eq!(bridge.channel(), None);
}

#[test]
fn test_no_callback_after_disable_across_cycles() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let disabled = Arc::new(AtomicBool::new(true));
    let late_calls = Arc::new(AtomicU64::new(0));

    let cycles = fastrand::usize(3..8);
    for cycle in 0..cycles {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let gate = Arc::clone(&disabled);
        let late = Arc::clone(&late_calls);
        let reader = Arc::clone(&driver);

        bridge
            .enable(CH, move |channel| {
                if gate.load(Ordering::SeqCst) {
                    late.fetch_add(1, Ordering::SeqCst);
                }
                reader.read_all(channel);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap_or_else(|err| panic!("enable #{} failed: {}", cycle, err));
        disabled.store(false, Ordering::SeqCst);

        for _ in 0..fastrand::usize(1..4) {
            driver.fire(CH);
        }
        assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 1));

        bridge.disable().expect("disable should succeed");
        disabled.store(true, Ordering::SeqCst);
        let after_disable = calls.load(Ordering::SeqCst);

        assert!(!driver.fire(CH), "signal must be unbound after disable");
        thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), after_disable);
    }

    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rapid_firings_coalesce() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let channel = ChannelHandle::new(5);
    let calls = Arc::new(AtomicU64::new(0));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let counter = Arc::clone(&calls);
    bridge
        .enable(channel, move |ch| {
            assert_eq!(ch, channel);
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = entered_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(2));
            }
        })
        .expect("enable should succeed");

    driver.fire(channel);
    entered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("first invocation should start");
    for _ in 0..3 {
        driver.fire(channel);
    }
    release_tx.send(()).expect("callback should be waiting");

    // Firings that land during an invocation fold into fewer invocations;
    // only "at least one" is guaranteed.
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 1));

    #[cfg(unix)]
    {
        // Every firing is accounted for either as a wake-up or as folded.
        assert!(wait_until(Duration::from_secs(2), || {
            let metrics = bridge.metrics();
            metrics.wakeups + metrics.coalesced_drains == 4
        }));
        assert!(bridge.metrics().callbacks <= 4);
    }

    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_acquire_failure_leaves_bridge_disabled() {
    let driver = LoopbackDriver::acquiring();
    driver.fail_next_acquire(DriverError::new(status::PCAN_ERROR_NODRIVER));
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());

    let err = bridge
        .enable(CH, |_| {})
        .expect_err("enable should fail");
    match err {
        BridgeError::DriverSignal(inner) => assert_eq!(inner.code, status::PCAN_ERROR_NODRIVER),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert!(!bridge.is_enabled());

    // A later valid enable succeeds.
    bridge.enable(CH, |_| {}).expect("enable should succeed");
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_bind_failure_unwinds() {
    let driver = LoopbackDriver::binding();
    driver.fail_next_bind(DriverError::new(status::PCAN_ERROR_ILLOPERATION));
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());

    let err = bridge
        .enable(CH, |_| {})
        .expect_err("enable should fail");
    assert_eq!(err.status(), crate::StatusCode::ErrorDriverSignal);
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert!(!driver.is_bound(CH));
    assert!(!driver.fire(CH));

    bridge.enable(CH, |_| {}).expect("enable should succeed");
    assert!(driver.is_bound(CH));
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_bind_failure_in_acquire_mode_unbinds() {
    let driver = LoopbackDriver::acquiring();
    driver.fail_next_bind(DriverError::new(status::PCAN_ERROR_ILLOPERATION));
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());

    assert!(bridge.enable(CH, |_| {}).is_err());
    assert!(!driver.is_bound(CH));
}

#[test]
fn test_startup_timeout_then_reenable() {
    let driver = LoopbackDriver::binding();
    let config = fast_config().with_startup_timeout(Duration::from_millis(50));
    let mut bridge = EventBridge::with_config(driver.clone(), config);
    bridge.set_startup_delay(Some(Duration::from_secs(2)));

    let start = Instant::now();
    let err = bridge
        .enable(CH, |_| {})
        .expect_err("enable should time out");
    // Handshake plus a join bounded by the same timeout, not the slow thread.
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(matches!(err, BridgeError::StartupTimeout(t) if t == Duration::from_millis(50)));
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert!(!driver.is_bound(CH));

    bridge.set_startup_delay(None);
    bridge.enable(CH, |_| {}).expect("enable should succeed");
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_second_enable_is_rejected() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver, fast_config());

    bridge.enable(CH, |_| {}).expect("enable should succeed");
    let err = bridge
        .enable(ChannelHandle::new(0x52), |_| {})
        .expect_err("second enable should fail");
    assert!(matches!(err, BridgeError::AlreadyEnabled));
    assert_eq!(bridge.channel(), Some(CH));

    bridge.disable().expect("disable should succeed");
    assert!(matches!(bridge.disable(), Err(BridgeError::NotEnabled)));
}

#[test]
fn test_two_bridges_run_concurrently() {
    let driver = LoopbackDriver::binding();
    let first = ChannelHandle::new(0x51);
    let second = ChannelHandle::new(0x52);
    let (tx, rx) = mpsc::channel();

    let mut bridges = Vec::new();
    for channel in [first, second] {
        let mut bridge = EventBridge::with_config(
            driver.clone(),
            fast_config().with_thread_name(format!("pcan-event-{}", channel)),
        );
        let tx = tx.clone();
        let reader = Arc::clone(&driver);
        bridge
            .enable(channel, move |ch| {
                reader.read_all(ch);
                let _ = tx.send(ch);
            })
            .expect("enable should succeed");
        bridges.push(bridge);
    }

    driver.fire(second);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(second));
    driver.fire(first);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(first));

    for bridge in &mut bridges {
        bridge.disable().expect("disable should succeed");
    }
}

#[test]
fn test_panicking_callback_keeps_waiter_alive() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let (tx, rx) = mpsc::channel();

    let mut calls = 0u32;
    bridge
        .enable(CH, move |_| {
            calls += 1;
            let _ = tx.send(calls);
            if calls == 1 {
                panic!("callback failure");
            }
        })
        .expect("enable should succeed");

    driver.fire(CH);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(1));
    driver.fire(CH);
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(2));

    assert_eq!(bridge.state(), BridgeState::Enabled);
    assert!(bridge.health().is_ok());
    assert_eq!(bridge.metrics().callback_panics, 1);
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_acquire_mode_delivers_frames() {
    let driver = LoopbackDriver::acquiring();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let (tx, rx) = mpsc::channel();

    let reader = Arc::clone(&driver);
    bridge
        .enable(CH, move |ch| {
            for frame in reader.read_all(ch) {
                let _ = tx.send(frame);
            }
        })
        .expect("enable should succeed");
    assert!(driver.is_bound(CH));

    driver.fire(CH);
    driver.fire(CH);
    let mut frames = Vec::new();
    while frames.len() < 2 {
        frames.push(
            rx.recv_timeout(Duration::from_secs(2))
                .expect("frame should be delivered"),
        );
    }
    assert_eq!(frames, vec![0, 1]);

    bridge.disable().expect("disable should succeed");
    assert!(!driver.is_bound(CH));
    assert_eq!(driver.pending(CH), 0);
}

#[test]
fn test_disable_waits_for_running_callback() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let finished = Arc::new(AtomicBool::new(false));
    let (entered_tx, entered_rx) = mpsc::channel();

    let done = Arc::clone(&finished);
    bridge
        .enable(CH, move |_| {
            let _ = entered_tx.send(());
            thread::sleep(Duration::from_millis(80));
            done.store(true, Ordering::SeqCst);
        })
        .expect("enable should succeed");

    driver.fire(CH);
    entered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("callback should start");
    bridge.disable().expect("disable should succeed");
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn test_join_timeout_detaches_stuck_waiter() {
    let driver = LoopbackDriver::binding();
    let config = fast_config().with_join_timeout(Duration::from_millis(50));
    let mut bridge = EventBridge::with_config(driver.clone(), config);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    bridge
        .enable(CH, move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .expect("enable should succeed");

    driver.fire(CH);
    entered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("callback should start");

    let start = Instant::now();
    let err = bridge.disable().expect_err("disable should time out");
    assert!(matches!(err, BridgeError::ShutdownJoin(_)));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(bridge.state(), BridgeState::Disabled);

    let _ = release_tx.send(());
    // The detached waiter does not block a fresh enable.
    bridge.enable(CH, |_| {}).expect("enable should succeed");
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_drop_disables_bridge() {
    let driver = LoopbackDriver::binding();
    {
        let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
        bridge.enable(CH, |_| {}).expect("enable should succeed");
        assert!(driver.is_bound(CH));
    }
    assert!(!driver.is_bound(CH));
}

#[test]
fn test_idle_wait_interval_is_counted() {
    let driver = LoopbackDriver::binding();
    let mut bridge = EventBridge::with_config(driver, fast_config());

    bridge.enable(CH, |_| {}).expect("enable should succeed");
    assert!(wait_until(Duration::from_secs(2), || bridge.metrics().idle_timeouts >= 2));
    bridge.disable().expect("disable should succeed");
}

#[test]
fn test_drop_from_own_callback_unbinds() {
    let driver = LoopbackDriver::binding();
    let slot: Arc<parking_lot::Mutex<Option<EventBridge>>> =
        Arc::new(parking_lot::Mutex::new(None));
    let (tx, rx) = mpsc::channel();

    let mut bridge = EventBridge::with_config(driver.clone(), fast_config());
    let own = Arc::clone(&slot);
    bridge
        .enable(CH, move |_| {
            let taken = own.lock().take();
            drop(taken);
            let _ = tx.send(());
        })
        .expect("enable should succeed");
    *slot.lock() = Some(bridge);

    assert!(driver.fire(CH));
    rx.recv_timeout(Duration::from_secs(2))
        .expect("callback should run");
    assert!(!driver.is_bound(CH));
    assert!(slot.lock().is_none());
}

// Hands out a descriptor that is never open on the first acquire, then
// lets the bridge create its own signal.
#[cfg(unix)]
struct ClosedDescriptorDriver {
    broken: AtomicBool,
}

#[cfg(unix)]
impl ReceiveEventDriver for ClosedDescriptorDriver {
    fn acquire_ready_signal(
        &self,
        _channel: ChannelHandle,
    ) -> std::result::Result<Option<ReadySignal>, DriverError> {
        if !self.broken.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let raw = crate::platform::RawSignal::new(libc::c_int::MAX - 1);
        // SAFETY: the descriptor is never dereferenced, poll reports it invalid.
        Ok(Some(unsafe { ReadySignal::borrowed(raw, ResetMode::Manual) }))
    }
}

#[cfg(unix)]
#[test]
fn test_wait_failure_faults_bridge() {
    let driver = Arc::new(ClosedDescriptorDriver {
        broken: AtomicBool::new(true),
    });
    let mut bridge = EventBridge::with_config(driver, fast_config());

    bridge.enable(CH, |_| {}).expect("enable should succeed");
    assert!(wait_until(Duration::from_secs(2), || {
        bridge.state() == BridgeState::Faulted
    }));
    assert!(matches!(bridge.health(), Err(BridgeError::WaiterFault(_))));

    let result = bridge.disable();
    assert!(matches!(result, Err(BridgeError::WaiterFault(_))));
    assert_eq!(StatusCode::from(&result), StatusCode::ErrorWaiterFault);
    assert_eq!(bridge.state(), BridgeState::Disabled);
    assert!(!bridge.is_enabled());

    bridge.enable(CH, |_| {}).expect("enable after a fault should succeed");
    assert_eq!(bridge.state(), BridgeState::Enabled);
    assert!(bridge.health().is_ok());
    bridge.disable().expect("disable should succeed");
}
