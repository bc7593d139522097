// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OS wait primitives for the receive-event bridge.
//!
//! Exposes one capability to the rest of the crate: block until either the
//! data-ready signal or the shutdown signal becomes active, and report which.
//!
//! - On Linux/Android: eventfd + poll.
//! - On other Unix targets: non-blocking pipe + poll.
//! - On Windows: kernel Event objects + WaitForMultipleObjects.
//!
//! When both signals are observable in the same wait, shutdown wins on every
//! backend. This is a property of the backends, not part of the contract.

use std::fmt;
use std::io;
use std::time::Duration;

/// Which of the two signals ended a [`wait_any`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The data-ready signal is active.
    Ready,
    /// The shutdown signal is active.
    Shutdown,
    /// The wait interval elapsed with nothing signaled.
    Idle,
}

/// Native representation of a waitable primitive.
#[cfg(unix)]
pub type RawPrimitive = std::os::fd::RawFd;

/// Native representation of a waitable primitive.
#[cfg(windows)]
pub type RawPrimitive = std::os::windows::io::RawHandle;

/// Raw, non-owning reference to a waitable OS primitive.
///
/// A file descriptor on Unix, an Event `HANDLE` on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignal(RawPrimitive);

// SAFETY: Windows Event handles are kernel objects usable from any thread.
#[cfg(windows)]
unsafe impl Send for RawSignal {}
#[cfg(windows)]
unsafe impl Sync for RawSignal {}

impl RawSignal {
    /// Wrap a raw descriptor or handle.
    pub const fn new(raw: RawPrimitive) -> Self {
        Self(raw)
    }

    /// The wrapped descriptor or handle.
    pub const fn get(self) -> RawPrimitive {
        self.0
    }
}

/// Owned, process-local event primitive.
///
/// Signals are sticky until consumed: a `signal()` with no waiter is observed
/// by the next wait. Several signals before a consume coalesce into one
/// wake-up; [`EventSignal::drain`] reports how many were folded together.
pub struct EventSignal {
    handle: imp::EventHandle,
}

impl EventSignal {
    /// Create an unsignaled, non-inheritable event.
    pub fn new() -> io::Result<Self> {
        let handle = imp::create_event()?;
        log::trace!("[platform] created event {:?}", imp::waitable(&handle));
        Ok(Self { handle })
    }

    /// Move the event to the signaled state.
    pub fn signal(&self) -> io::Result<()> {
        imp::signal_event(&self.handle)
    }

    /// Block up to `timeout` for the event; consumes the signal on success.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let fired = imp::wait_one(imp::waitable(&self.handle), timeout)?;
        if fired {
            imp::drain(imp::waitable(&self.handle));
        }
        Ok(fired)
    }

    /// Reset the event, returning the number of signals consumed.
    pub fn drain(&self) -> u64 {
        imp::drain(imp::waitable(&self.handle))
    }

    /// Raw reference to the waitable end of the event.
    pub fn raw(&self) -> RawSignal {
        RawSignal(imp::waitable(&self.handle))
    }
}

impl fmt::Debug for EventSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSignal")
            .field("raw", &imp::waitable(&self.handle))
            .finish()
    }
}

impl Drop for EventSignal {
    fn drop(&mut self) {
        log::trace!("[platform] closing event {:?}", imp::waitable(&self.handle));
        imp::close_event(&self.handle);
    }
}

/// Block until `ready` or `shutdown` is signaled, or `timeout` elapses.
///
/// `None` blocks indefinitely. The ready signal is not consumed; callers that
/// want auto-reset behavior follow up with [`drain`].
pub fn wait_any(
    ready: RawSignal,
    shutdown: RawSignal,
    timeout: Option<Duration>,
) -> io::Result<WaitOutcome> {
    imp::wait_any(ready.0, shutdown.0, timeout)
}

/// Consume pending wake-ups on `signal`, returning how many were folded.
///
/// Counts are exact for primitives created by [`EventSignal`]; for foreign
/// descriptors every non-empty read counts at least once.
pub fn drain(signal: RawSignal) -> u64 {
    imp::drain(signal.0)
}

// =============================================================================
// Unix implementation (eventfd or pipe + poll)
// =============================================================================
#[cfg(unix)]
mod imp {
    use std::io;
    use std::os::fd::RawFd;
    use std::time::Duration;

    use super::WaitOutcome;

    pub struct EventHandle {
        read_fd: RawFd,
        write_fd: RawFd,
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn create_event() -> io::Result<EventHandle> {
        // SAFETY: eventfd is invoked with valid flags and no shared state.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EventHandle {
            read_fd: fd,
            write_fd: fd,
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn create_event() -> io::Result<EventHandle> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: fds is a two-element array as pipe(2) requires.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let handle = EventHandle {
            read_fd: fds[0],
            write_fd: fds[1],
        };
        for fd in fds {
            if let Err(err) = set_nonblocking_cloexec(fd) {
                close_event(&handle);
                return Err(err);
            }
        }
        Ok(handle)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
        // SAFETY: fcntl on a descriptor created by the caller and still open.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
            let fd_flags = libc::fcntl(fd, libc::F_GETFD);
            if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub fn waitable(handle: &EventHandle) -> RawFd {
        handle.read_fd
    }

    pub fn signal_event(handle: &EventHandle) -> io::Result<()> {
        let payload = 1u64.to_ne_bytes();
        loop {
            // SAFETY: payload references a stack buffer with the 8-byte event payload.
            let ret =
                unsafe { libc::write(handle.write_fd, payload.as_ptr().cast(), payload.len()) };
            if ret >= 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                // Counter saturated or pipe full: the event is already signaled.
                io::ErrorKind::WouldBlock => return Ok(()),
                _ => return Err(err),
            }
        }
    }

    pub fn drain(fd: RawFd) -> u64 {
        let mut consumed = 0u64;
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: buf is a stack buffer larger than the 8-byte eventfd read requirement.
            let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if ret > 0 {
                let len = ret as usize;
                let mut chunks = buf[..len].chunks_exact(8);
                for chunk in chunks.by_ref() {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(chunk);
                    consumed = consumed.saturating_add(u64::from_ne_bytes(word).max(1));
                }
                if !chunks.remainder().is_empty() {
                    consumed = consumed.saturating_add(1);
                }
                continue;
            }
            if ret == 0 {
                break;
            }

            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => break,
                _ => {
                    log::debug!("[platform] drain read failed on fd {}: {}", fd, err);
                    break;
                }
            }
        }
        consumed
    }

    pub fn close_event(handle: &EventHandle) {
        // SAFETY: both descriptors were obtained from eventfd/pipe and are closed once here.
        unsafe {
            libc::close(handle.read_fd);
            if handle.write_fd != handle.read_fd {
                libc::close(handle.write_fd);
            }
        }
    }

    fn poll_timeout_ms(timeout: Option<Duration>) -> libc::c_int {
        match timeout {
            None => -1,
            Some(d) if d.is_zero() => 0,
            Some(d) => {
                // Round sub-millisecond waits up so they still block.
                let ms = d.as_millis().max(1);
                libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
            }
        }
    }

    fn poll_fds(fds: &mut [libc::pollfd], timeout_ms: libc::c_int) -> io::Result<bool> {
        loop {
            // SAFETY: fds is a valid, exclusively borrowed slice of pollfd structures.
            let res = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if res == 0 {
                return Ok(false);
            }
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(true);
        }
    }

    pub fn wait_one(fd: RawFd, timeout: Duration) -> io::Result<bool> {
        let mut fds = [libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        }];
        if !poll_fds(&mut fds, poll_timeout_ms(Some(timeout)))? {
            return Ok(false);
        }
        if fds[0].revents & libc::POLLNVAL != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "event descriptor is not open",
            ));
        }
        Ok(fds[0].revents & libc::POLLIN != 0)
    }

    pub fn wait_any(
        ready: RawFd,
        shutdown: RawFd,
        timeout: Option<Duration>,
    ) -> io::Result<WaitOutcome> {
        // Shutdown first: it is inspected first when both fire.
        let mut fds = [
            libc::pollfd {
                fd: shutdown,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: ready,
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        if !poll_fds(&mut fds, poll_timeout_ms(timeout))? {
            return Ok(WaitOutcome::Idle);
        }

        let [shutdown_fd, ready_fd] = fds;
        if shutdown_fd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shutdown signal descriptor is not open",
            ));
        }
        if shutdown_fd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
            return Ok(WaitOutcome::Shutdown);
        }
        if ready_fd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ready signal descriptor is not open",
            ));
        }
        if ready_fd.revents & libc::POLLIN != 0 {
            return Ok(WaitOutcome::Ready);
        }
        if ready_fd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "ready signal descriptor hung up",
            ));
        }
        Ok(WaitOutcome::Idle)
    }
}

// =============================================================================
// Windows implementation (kernel Event objects)
// =============================================================================
#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::io;
    use std::os::windows::io::RawHandle;
    use std::time::Duration;

    use super::WaitOutcome;

    // Win32 constants
    const INFINITE: u32 = 0xFFFF_FFFF;
    const WAIT_OBJECT_0: u32 = 0;
    const WAIT_ABANDONED_0: u32 = 0x80;
    const WAIT_TIMEOUT: u32 = 258;
    const WAIT_FAILED: u32 = 0xFFFF_FFFF;

    pub struct EventHandle(RawHandle);

    // SAFETY: Windows Event objects are inherently thread-safe kernel objects.
    unsafe impl Send for EventHandle {}
    unsafe impl Sync for EventHandle {}

    extern "system" {
        fn CreateEventW(
            lpEventAttributes: *const c_void,
            bManualReset: i32,
            bInitialState: i32,
            lpName: *const u16,
        ) -> *mut c_void;

        fn SetEvent(hEvent: *mut c_void) -> i32;
        fn ResetEvent(hEvent: *mut c_void) -> i32;
        fn WaitForSingleObject(hHandle: *mut c_void, dwMilliseconds: u32) -> u32;
        fn WaitForMultipleObjects(
            nCount: u32,
            lpHandles: *const *mut c_void,
            bWaitAll: i32,
            dwMilliseconds: u32,
        ) -> u32;
        fn CloseHandle(hObject: *mut c_void) -> i32;
    }

    pub fn create_event() -> io::Result<EventHandle> {
        // Auto-reset (bManualReset = 0), initially non-signaled, unnamed,
        // null security attributes so the handle is not inheritable.
        // SAFETY: CreateEventW FFI with null security attributes and name (valid for unnamed event)
        let handle = unsafe { CreateEventW(std::ptr::null(), 0, 0, std::ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(EventHandle(handle as RawHandle))
    }

    pub fn waitable(handle: &EventHandle) -> RawHandle {
        handle.0
    }

    pub fn signal_event(handle: &EventHandle) -> io::Result<()> {
        // SAFETY: SetEvent FFI with valid event handle from CreateEventW
        if unsafe { SetEvent(handle.0 as *mut _) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn drain(handle: RawHandle) -> u64 {
        // Auto-reset events are already consumed by the wait that observed
        // them; resetting also covers manual-reset events handed in by drivers.
        // SAFETY: ResetEvent FFI with a handle the caller keeps open
        unsafe {
            ResetEvent(handle as *mut _);
        }
        1
    }

    pub fn close_event(handle: &EventHandle) {
        // SAFETY: CloseHandle FFI with valid event handle from CreateEventW, called once in Drop
        unsafe {
            CloseHandle(handle.0 as *mut _);
        }
    }

    fn timeout_ms(timeout: Option<Duration>) -> u32 {
        timeout
            .map(|d| {
                let ms = d.as_millis();
                // Clamp to u32::MAX - 1, INFINITE is reserved
                u32::try_from(ms).unwrap_or(INFINITE - 1)
            })
            .unwrap_or(INFINITE)
    }

    pub fn wait_one(handle: RawHandle, timeout: Duration) -> io::Result<bool> {
        // SAFETY: WaitForSingleObject FFI with valid event handle
        let result = unsafe { WaitForSingleObject(handle as *mut _, timeout_ms(Some(timeout))) };
        match result {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            WAIT_ABANDONED_0 => Err(io::Error::new(io::ErrorKind::Other, "wait abandoned")),
            WAIT_FAILED => Err(io::Error::last_os_error()),
            other => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wait result 0x{:02X}", other),
            )),
        }
    }

    pub fn wait_any(
        ready: RawHandle,
        shutdown: RawHandle,
        timeout: Option<Duration>,
    ) -> io::Result<WaitOutcome> {
        // WaitForMultipleObjects reports the lowest signaled index, so the
        // shutdown handle goes first.
        let handles: [*mut c_void; 2] = [shutdown as *mut _, ready as *mut _];
        // SAFETY: handles points to two valid event handles for the duration of the call
        let result =
            unsafe { WaitForMultipleObjects(2, handles.as_ptr(), 0, timeout_ms(timeout)) };
        match result {
            WAIT_OBJECT_0 => Ok(WaitOutcome::Shutdown),
            r if r == WAIT_OBJECT_0 + 1 => Ok(WaitOutcome::Ready),
            WAIT_TIMEOUT => Ok(WaitOutcome::Idle),
            r if (WAIT_ABANDONED_0..WAIT_ABANDONED_0 + 2).contains(&r) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("wait abandoned on handle index {}", r - WAIT_ABANDONED_0),
            )),
            WAIT_FAILED => Err(io::Error::last_os_error()),
            other => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected wait result 0x{:02X}", other),
            )),
        }
    }
}
