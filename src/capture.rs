//! Capture control.
//!
//! Capture needs a buffer set (allocated or attached) on the same session.
//! A snap fills every frame of the set once and then stops by itself; a
//! sequence keeps overwriting the set as a ring until [`CaptureController::stop`].

use crate::error::{DcamError, ErrorReporter, Result};
use crate::sdk::consts::{capstart, capstatus};
use crate::sdk::RawTransferInfo;
use crate::session::DeviceSlot;
use serde::Serialize;
use std::sync::Arc;

/// How a capture runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Continuous capture into the buffer ring.
    Sequence,
    /// Fill the buffer set once, then stop.
    Snap,
}

impl CaptureMode {
    /// Vendor start mode.
    pub fn raw(self) -> i32 {
        match self {
            Self::Sequence => capstart::SEQUENCE,
            Self::Snap => capstart::SNAP,
        }
    }
}

/// Capture state reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    /// The device is in an error state.
    Error,
    /// Capturing.
    Busy,
    /// Buffers are ready, not capturing.
    Ready,
    /// Idle without buffers.
    Stable,
    /// Settings are changing.
    Unstable,
}

impl CaptureStatus {
    /// Map a vendor status value.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            capstatus::ERROR => Ok(Self::Error),
            capstatus::BUSY => Ok(Self::Busy),
            capstatus::READY => Ok(Self::Ready),
            capstatus::STABLE => Ok(Self::Stable),
            capstatus::UNSTABLE => Ok(Self::Unstable),
            other => Err(DcamError::Value(format!("unknown capture status {other}"))),
        }
    }
}

/// Progress of the running (or last) capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferInfo {
    /// Slot of the newest completed frame, -1 before the first.
    pub newest_frame_index: i32,
    /// Frames completed since capture start.
    pub frame_count: i32,
}

impl From<RawTransferInfo> for TransferInfo {
    fn from(raw: RawTransferInfo) -> Self {
        Self {
            newest_frame_index: raw.newest_frame_index,
            frame_count: raw.frame_count,
        }
    }
}

/// Starts, stops and observes capture on one session.
pub struct CaptureController {
    slot: Arc<DeviceSlot>,
    reporter: ErrorReporter,
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("index", &self.slot.index())
            .finish_non_exhaustive()
    }
}

impl CaptureController {
    pub(crate) fn new(slot: Arc<DeviceSlot>, reporter: ErrorReporter) -> Self {
        Self { slot, reporter }
    }

    /// Start capturing into the current buffer set.
    ///
    /// Fails with `Busy` if a capture is already running and `NotReady`
    /// without buffers.
    pub fn start(&self, mode: CaptureMode) -> Result<()> {
        let handle = self.slot.handle("dcamcap_start")?;
        let status = self.reporter.api().cap_start(handle, mode.raw());
        tracing::debug!(index = self.slot.index(), ?mode, %status, "dcamcap_start");
        self.reporter.check(status, "dcamcap_start", Some(handle))?;
        tracing::info!(index = self.slot.index(), ?mode, "Capture started");
        Ok(())
    }

    /// Stop capturing. Stopping an idle device succeeds.
    pub fn stop(&self) -> Result<()> {
        let handle = self.slot.handle("dcamcap_stop")?;
        let status = self.reporter.api().cap_stop(handle);
        tracing::debug!(index = self.slot.index(), %status, "dcamcap_stop");
        self.reporter.check(status, "dcamcap_stop", Some(handle))?;
        tracing::info!(index = self.slot.index(), "Capture stopped");
        Ok(())
    }

    /// Current capture state.
    pub fn status(&self) -> Result<CaptureStatus> {
        let handle = self.slot.handle("dcamcap_status")?;
        let mut raw = 0;
        let status = self.reporter.api().cap_status(handle, &mut raw);
        self.reporter.check(status, "dcamcap_status", Some(handle))?;
        CaptureStatus::from_raw(raw)
    }

    /// Newest frame slot and number of frames captured so far.
    pub fn transfer_info(&self) -> Result<TransferInfo> {
        let handle = self.slot.handle("dcamcap_transferinfo")?;
        let mut raw = RawTransferInfo {
            newest_frame_index: -1,
            frame_count: 0,
        };
        let status = self.reporter.api().cap_transfer_info(handle, &mut raw);
        self.reporter
            .check(status, "dcamcap_transferinfo", Some(handle))?;
        Ok(raw.into())
    }

    /// Issue a software trigger.
    ///
    /// Fails with `NotBusy` when not capturing and `NoTrigger` when the
    /// trigger source is not software.
    pub fn fire_trigger(&self) -> Result<()> {
        let handle = self.slot.handle("dcamcap_firetrigger")?;
        let status = self.reporter.api().cap_fire_trigger(handle);
        tracing::debug!(index = self.slot.index(), %status, "dcamcap_firetrigger");
        self.reporter
            .check(status, "dcamcap_firetrigger", Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::driver::DriverContext;
    use crate::error::ErrorKind;
    use crate::mock::SimulatedDcam;
    use serial_test::serial;

    fn driver() -> DriverContext {
        let config = SimulatorConfig {
            sensor_width: 16,
            sensor_height: 8,
            exposure_s: 0.002,
            ..SimulatorConfig::default()
        };
        DriverContext::init(Arc::new(SimulatedDcam::from_config(&config))).unwrap()
    }

    #[test]
    fn test_status_from_raw() {
        assert_eq!(CaptureStatus::from_raw(1).unwrap(), CaptureStatus::Busy);
        assert_eq!(CaptureStatus::from_raw(3).unwrap(), CaptureStatus::Stable);
        assert!(matches!(
            CaptureStatus::from_raw(42),
            Err(DcamError::Value(_))
        ));
    }

    #[test]
    #[serial]
    fn test_start_without_buffers_is_not_ready() {
        let driver = driver();
        let session = driver.open(0).unwrap();
        assert_eq!(session.capture().status().unwrap(), CaptureStatus::Stable);
        let err = session.capture().start(CaptureMode::Snap).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotReady));
    }

    #[test]
    #[serial]
    fn test_double_start_is_busy() {
        let driver = driver();
        let mut session = driver.open(0).unwrap();
        session.buffers_mut().alloc(4).unwrap();
        assert_eq!(session.capture().status().unwrap(), CaptureStatus::Ready);

        session.capture().start(CaptureMode::Sequence).unwrap();
        let err = session.capture().start(CaptureMode::Sequence).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Busy));
        assert_eq!(session.capture().status().unwrap(), CaptureStatus::Busy);

        session.capture().stop().unwrap();
        // idempotent
        session.capture().stop().unwrap();
        assert_eq!(session.capture().status().unwrap(), CaptureStatus::Ready);
    }

    #[test]
    #[serial]
    fn test_fire_trigger_requires_capture() {
        let driver = driver();
        let mut session = driver.open(0).unwrap();
        let err = session.capture().fire_trigger().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotBusy));

        session.buffers_mut().alloc(2).unwrap();
        session.capture().start(CaptureMode::Sequence).unwrap();
        // internal trigger source
        let err = session.capture().fire_trigger().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NoTrigger));
        session.capture().stop().unwrap();
    }

    #[test]
    #[serial]
    fn test_closed_session_is_invalid_handle() {
        let driver = driver();
        let mut session = driver.open(0).unwrap();
        driver.close(&mut session).unwrap();
        let err = session.capture().status().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidHandle));
    }
}
