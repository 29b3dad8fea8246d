//! Process-wide driver lifecycle.
//!
//! The DCAM-API may be initialised once per process. [`DriverContext::init`]
//! claims that right through a global flag and hands back the only context;
//! a second `init` while one is alive fails with [`ErrorKind::Busy`].
//!
//! The context keeps a registry of the sessions it opened so that
//! [`DriverContext::uninit`] (or dropping the context) can close whatever
//! the caller left open before shutting the subsystem down. Those sessions
//! stay valid values; every later call on them reports `InvalidHandle`.
//!
//! Teardown never waits for locked frames. A device whose frames are still
//! viewed is invalidated at once, but its handle and the DCAM-API itself
//! are released when the last [`FrameView`](crate::buffer::FrameView)
//! drops; until then a new `init` reports `Busy`.
//!
//! # Example
//! ```
//! use daq_driver_dcam::{driver::DriverContext, mock::SimulatedDcam};
//! use std::sync::Arc;
//!
//! # fn main() -> daq_driver_dcam::Result<()> {
//! let driver = DriverContext::init(Arc::new(SimulatedDcam::new()))?;
//! let mut session = driver.open(0)?;
//! println!("{:?}", session.info()?.model);
//! driver.close(&mut session)?;
//! driver.uninit()?;
//! # Ok(())
//! # }
//! ```

use crate::config::DriverConfig;
use crate::error::{ErrorKind, ErrorReporter, Result};
use crate::sdk::{DcamApi, DeviceHandle};
use crate::session::{DeviceInfo, DeviceSession, DeviceSlot, SlotClose};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Set while the DCAM-API is initialised by this process.
static DRIVER_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The initialised DCAM-API, shared by the context and live frame views.
///
/// Uninitialised by [`Subsystem::finish`], or on drop of the last reference.
pub(crate) struct Subsystem {
    reporter: ErrorReporter,
    deferred: Mutex<Vec<(i32, DeviceHandle)>>,
    finished: AtomicBool,
}

impl std::fmt::Debug for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subsystem")
            .field("deferred", &self.deferred.lock().len())
            .field("finished", &self.finished.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Subsystem {
    fn close_device(&self, index: i32, handle: DeviceHandle) {
        let status = self.reporter.api().dev_close(handle);
        match self.reporter.check(status, "dcamdev_close", Some(handle)) {
            Ok(()) => tracing::debug!(index, "Closed camera left open"),
            Err(e) => tracing::warn!(index, error = %e, "Failed to close camera during uninit"),
        }
    }

    /// Close deferred devices and uninitialise the DCAM-API, once.
    fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let deferred: Vec<_> = self.deferred.lock().drain(..).collect();
        for (index, handle) in deferred {
            self.close_device(index, handle);
        }

        let status = self.reporter.api().api_uninit();
        DRIVER_ACTIVE.store(false, Ordering::Release);
        tracing::info!(%status, "DCAM-API uninitialized");
        self.reporter.check(status, "dcamapi_uninit", None)
    }
}

impl Drop for Subsystem {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::warn!(error = %e, "Deferred DCAM-API shutdown failed");
        }
    }
}

/// The initialised DCAM-API.
pub struct DriverContext {
    reporter: ErrorReporter,
    config: DriverConfig,
    device_count: i32,
    sessions: Mutex<Vec<Weak<DeviceSlot>>>,
    subsystem: Option<Arc<Subsystem>>,
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("device_count", &self.device_count)
            .field("active", &self.subsystem.is_some())
            .finish_non_exhaustive()
    }
}

impl DriverContext {
    /// Initialise the subsystem with default driver settings.
    pub fn init(api: Arc<dyn DcamApi>) -> Result<Self> {
        Self::init_with_config(api, &DriverConfig::default())
    }

    /// Initialise the subsystem.
    ///
    /// Fails with `Busy` if another context is alive in this process, or
    /// with the subsystem's own error if initialisation fails.
    pub fn init_with_config(api: Arc<dyn DcamApi>, config: &DriverConfig) -> Result<Self> {
        if DRIVER_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ErrorReporter::local(ErrorKind::Busy, "dcamapi_init"));
        }

        let reporter = ErrorReporter::with_text_bytes(api, config.error_text_bytes);
        let mut device_count = 0;
        let status = reporter.api().api_init(&mut device_count);
        tracing::debug!(%status, device_count, "dcamapi_init");
        if let Err(e) = reporter.check(status, "dcamapi_init", None) {
            DRIVER_ACTIVE.store(false, Ordering::Release);
            return Err(e);
        }

        tracing::info!(device_count, "DCAM-API initialized");
        let subsystem = Arc::new(Subsystem {
            reporter: reporter.clone(),
            deferred: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        });
        Ok(Self {
            reporter,
            config: config.clone(),
            device_count,
            sessions: Mutex::new(Vec::new()),
            subsystem: Some(subsystem),
        })
    }

    /// Number of cameras reported at init.
    pub fn device_count(&self) -> i32 {
        self.device_count
    }

    /// Driver settings this context was created with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Open camera `index`.
    ///
    /// An index outside `0..device_count` fails with `NoCamera` before any
    /// subsystem call.
    pub fn open(&self, index: i32) -> Result<DeviceSession> {
        if !(0..self.device_count).contains(&index) {
            return Err(ErrorReporter::local(ErrorKind::NoCamera, "dcamdev_open"));
        }

        let mut handle = DeviceHandle::default();
        let status = self.reporter.api().dev_open(index, &mut handle);
        tracing::debug!(index, %status, "dcamdev_open");
        self.reporter.check(status, "dcamdev_open", None)?;

        let subsystem = self.subsystem.as_ref().map(Arc::downgrade).unwrap_or_default();
        let slot = Arc::new(DeviceSlot::new(handle, index, subsystem));
        {
            let mut sessions = self.sessions.lock();
            sessions.retain(|s| s.strong_count() > 0);
            sessions.push(Arc::downgrade(&slot));
        }

        tracing::info!(index, "Camera opened");
        Ok(DeviceSession::new(slot, self.reporter.clone(), &self.config))
    }

    /// Close a session. A second close fails with `InvalidHandle`.
    pub fn close(&self, session: &mut DeviceSession) -> Result<()> {
        session.close_handle()?;
        tracing::info!(index = session.index(), "Camera closed");
        Ok(())
    }

    /// Open, identify and close camera `index`.
    pub fn device_info(&self, index: i32) -> Result<DeviceInfo> {
        let mut session = self.open(index)?;
        let info = session.info();
        self.close(&mut session)?;
        info
    }

    /// Close every open session and shut the subsystem down.
    ///
    /// Does not wait for locked frames; see the module docs.
    pub fn uninit(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(subsystem) = self.subsystem.take() else {
            return Ok(());
        };

        let slots: Vec<_> = self.sessions.lock().drain(..).collect();
        for slot in slots.iter().filter_map(Weak::upgrade) {
            match slot.close_without_waiting() {
                SlotClose::Free(handle) => subsystem.close_device(slot.index(), handle),
                SlotClose::InUse(handle) => {
                    tracing::warn!(
                        index = slot.index(),
                        "Camera has locked frames, closing it once they are dropped"
                    );
                    subsystem.deferred.lock().push((slot.index(), handle));
                }
                SlotClose::AlreadyClosed => {}
            }
        }

        match Arc::try_unwrap(subsystem) {
            Ok(subsystem) => subsystem.finish(),
            Err(_shared) => {
                tracing::warn!("Frame views still alive, DCAM-API shutdown deferred");
                Ok(())
            }
        }
    }
}

impl Drop for DriverContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "DCAM-API shutdown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::SimulatedDcam;
    use serial_test::serial;
    use tracing_test::traced_test;

    fn api() -> Arc<dyn DcamApi> {
        Arc::new(SimulatedDcam::new())
    }

    #[test]
    #[serial]
    fn test_second_init_is_busy() {
        let driver = DriverContext::init(api()).unwrap();
        let err = DriverContext::init(api()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Busy));
        driver.uninit().unwrap();

        // released again after uninit
        let driver = DriverContext::init(api()).unwrap();
        drop(driver);
        DriverContext::init(api()).unwrap().uninit().unwrap();
    }

    #[test]
    #[serial]
    fn test_open_out_of_range() {
        let driver = DriverContext::init(api()).unwrap();
        assert_eq!(driver.device_count(), 1);
        let err = driver.open(1).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoCamera));
        let err = driver.open(-1).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoCamera));
    }

    #[test]
    #[serial]
    fn test_uninit_closes_open_sessions() {
        let driver = DriverContext::init(api()).unwrap();
        let session = driver.open(0).unwrap();
        driver.uninit().unwrap();
        assert!(!session.is_open());
    }

    #[test]
    #[serial]
    #[traced_test]
    fn test_lifecycle_is_logged() {
        let driver = DriverContext::init(api()).unwrap();
        let mut session = driver.open(0).unwrap();
        driver.close(&mut session).unwrap();
        driver.uninit().unwrap();

        assert!(logs_contain("DCAM-API initialized"));
        assert!(logs_contain("Camera opened"));
        assert!(logs_contain("Camera closed"));
        assert!(logs_contain("DCAM-API uninitialized"));
    }

    #[test]
    #[serial]
    fn test_close_twice_is_invalid_handle() {
        let driver = DriverContext::init(api()).unwrap();
        let mut session = driver.open(0).unwrap();
        driver.close(&mut session).unwrap();
        let err = driver.close(&mut session).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidHandle));
    }
}
