//! Cancelable waits for capture events.
//!
//! A [`WaitHandle`] is shared between two roles: one thread blocks in
//! [`WaitHandle::start`] while another may call [`WaitHandle::abort`] to
//! release it early. Only one `start` may be pending per handle; a second
//! concurrent call fails with `Busy` without reaching the subsystem.
//!
//! An abort counts from the moment [`WaitHandle::is_waiting`] reports true,
//! even if the waiter has not entered the subsystem yet. Aborts issued
//! while nobody waits are dropped.
//!
//! ```
//! use daq_driver_dcam::{driver::DriverContext, mock::SimulatedDcam};
//! use daq_driver_dcam::{capture::CaptureMode, wait::CaptureEvent};
//! use std::sync::Arc;
//!
//! # fn main() -> daq_driver_dcam::Result<()> {
//! let driver = DriverContext::init(Arc::new(SimulatedDcam::new()))?;
//! let mut session = driver.open(0)?;
//! session.buffers_mut().alloc(1)?;
//! let wait = session.wait_handle()?;
//! session.capture().start(CaptureMode::Snap)?;
//! let fired = wait.start(CaptureEvent::FRAME_READY, 2000)?;
//! assert!(fired.contains(CaptureEvent::FRAME_READY));
//! # Ok(())
//! # }
//! ```

use crate::error::{ErrorKind, ErrorReporter, Result};
use crate::sdk::consts::capevent;
use crate::sdk::{RawWaitStart, WaitToken};
use crate::session::{DeviceSession, DeviceSlot};
use bitflags::bitflags;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Timeout that never expires.
pub const TIMEOUT_INFINITE: u32 = u32::MAX;

/// Vendor encoding of an infinite timeout.
const RAW_TIMEOUT_INFINITE: i32 = i32::MIN;

const IDLE: u8 = 0;
const WAITING: u8 = 1;
const ABORTING: u8 = 2;

/// Interval between repeated aborts while the waiter has not left.
const ABORT_RETRY: Duration = Duration::from_millis(1);
const ABORT_RETRY_LIMIT: u32 = 1000;

bitflags! {
    /// Capture events a wait can be released by.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CaptureEvent: i32 {
        /// A frame finished transferring to host memory.
        const TRANSFERRED = capevent::TRANSFERRED;
        /// A frame is ready to be locked.
        const FRAME_READY = capevent::FRAMEREADY;
        /// The buffer set was filled once.
        const CYCLE_END = capevent::CYCLEEND;
        /// Exposure of a frame ended.
        const EXPOSURE_END = capevent::EXPOSUREEND;
        /// Capture stopped.
        const STOPPED = capevent::STOPPED;
    }
}

fn raw_timeout(timeout_ms: u32) -> i32 {
    i32::try_from(timeout_ms).unwrap_or(RAW_TIMEOUT_INFINITE)
}

/// A wait object bound to one session's device.
pub struct WaitHandle {
    slot: Arc<DeviceSlot>,
    reporter: ErrorReporter,
    token: RwLock<Option<WaitToken>>,
    supported: CaptureEvent,
    state: AtomicU8,
    default_timeout_ms: u32,
}

impl std::fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandle")
            .field("index", &self.slot.index())
            .field("supported", &self.supported)
            .field("waiting", &self.is_waiting())
            .finish_non_exhaustive()
    }
}

impl WaitHandle {
    /// Open a wait object on `session`'s device.
    pub fn open(session: &DeviceSession) -> Result<Self> {
        let handle = session.handle("dcamwait_open")?;
        let mut token = WaitToken::default();
        let mut supported = 0;
        let status = session.api().wait_open(handle, &mut token, &mut supported);
        tracing::debug!(index = session.index(), %status, supported, "dcamwait_open");
        session
            .reporter()
            .check(status, "dcamwait_open", Some(handle))?;
        Ok(Self {
            slot: session.slot().clone(),
            reporter: session.reporter().clone(),
            token: RwLock::new(Some(token)),
            supported: CaptureEvent::from_bits_truncate(supported),
            state: AtomicU8::new(IDLE),
            default_timeout_ms: session.wait_timeout_ms(),
        })
    }

    /// Events the device can signal.
    pub fn supported_events(&self) -> CaptureEvent {
        self.supported
    }

    /// False once closed.
    pub fn is_open(&self) -> bool {
        self.token.read().is_some()
    }

    /// True while a thread is inside [`start`](Self::start).
    pub fn is_waiting(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// Block until one of `events` happens or `timeout_ms` elapses.
    ///
    /// Returns the events that released the wait. Fails with `Timeout`,
    /// with `Abort` when [`abort`](Self::abort) was called meanwhile, and
    /// with `Busy` if another thread is already waiting on this handle.
    /// [`TIMEOUT_INFINITE`] (or anything above `i32::MAX`) never expires.
    pub fn start(&self, events: CaptureEvent, timeout_ms: u32) -> Result<CaptureEvent> {
        let handle = self.slot.handle("dcamwait_start")?;
        let token = self.token.read();
        let wait = token.ok_or_else(|| {
            ErrorReporter::local(ErrorKind::InvalidHandle, "dcamwait_start")
        })?;
        if self
            .state
            .compare_exchange(IDLE, WAITING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ErrorReporter::local(ErrorKind::Busy, "dcamwait_start"));
        }

        let mut request = RawWaitStart {
            event_mask: events.bits(),
            timeout_ms: raw_timeout(timeout_ms),
            event_happened: 0,
        };
        tracing::trace!(mask = ?events, timeout_ms, "dcamwait_start");
        let status = (self.state.load(Ordering::Acquire) != ABORTING)
            .then(|| self.reporter.api().wait_start(wait, &mut request));
        self.state.store(IDLE, Ordering::Release);
        drop(token);

        let Some(status) = status else {
            tracing::debug!(index = self.slot.index(), "Wait aborted before it started");
            return Err(ErrorReporter::local(ErrorKind::Abort, "dcamwait_start"));
        };
        self.reporter
            .check(status, "dcamwait_start", Some(handle))?;
        let fired = CaptureEvent::from_bits_truncate(request.event_happened);
        tracing::trace!(?fired, "Wait released");
        Ok(fired)
    }

    /// [`start`](Self::start) with the configured default timeout.
    pub fn start_default(&self, events: CaptureEvent) -> Result<CaptureEvent> {
        self.start(events, self.default_timeout_ms)
    }

    /// Release a thread blocked in [`start`](Self::start).
    ///
    /// Has no effect when nobody is waiting. The handle stays usable.
    /// Returns once the waiter has been released, re-sending the abort to
    /// the subsystem if the waiter had not reached it yet.
    pub fn abort(&self) -> Result<()> {
        let handle = self.slot.handle("dcamwait_abort")?;
        let wait = self.token.read().ok_or_else(|| {
            ErrorReporter::local(ErrorKind::InvalidHandle, "dcamwait_abort")
        })?;
        let requested = self
            .state
            .compare_exchange(WAITING, ABORTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        for _ in 0..ABORT_RETRY_LIMIT {
            let status = self.reporter.api().wait_abort(wait);
            tracing::debug!(index = self.slot.index(), %status, "dcamwait_abort");
            self.reporter
                .check(status, "dcamwait_abort", Some(handle))?;
            if !requested || self.state.load(Ordering::Acquire) != ABORTING {
                return Ok(());
            }
            thread::sleep(ABORT_RETRY);
        }
        tracing::warn!(index = self.slot.index(), "Waiter did not leave after repeated aborts");
        Ok(())
    }

    /// Release the wait object. Later calls fail with `InvalidHandle`.
    ///
    /// Fails with `Busy` while another thread is blocked in `start`.
    pub fn close(&self) -> Result<()> {
        let Some(mut token) = self.token.try_write() else {
            return Err(ErrorReporter::local(ErrorKind::Busy, "dcamwait_close"));
        };
        let wait = token.take().ok_or_else(|| {
            ErrorReporter::local(ErrorKind::InvalidHandle, "dcamwait_close")
        })?;
        // closing the device already discarded the wait object
        let Ok(handle) = self.slot.handle("dcamwait_close") else {
            return Ok(());
        };
        let status = self.reporter.api().wait_close(wait);
        tracing::debug!(index = self.slot.index(), %status, "dcamwait_close");
        self.reporter.check(status, "dcamwait_close", Some(handle))
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        if self.token.get_mut().is_none() || !self.slot.is_open() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(index = self.slot.index(), error = %e, "Failed to close wait handle on drop");
        }
    }
}
