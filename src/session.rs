//! An open camera.
//!
//! A [`DeviceSession`] owns one device handle issued by
//! [`DriverContext::open`](crate::driver::DriverContext::open). Property
//! access lives in [`property`](crate::property), capability queries in
//! [`capability`](crate::capability); this module holds the handle
//! bookkeeping and the device information strings.
//!
//! Once a session is closed, explicitly or because the driver context was
//! torn down, every operation on it fails with
//! [`ErrorKind::InvalidHandle`] without reaching the subsystem.

use crate::buffer::BufferManager;
use crate::capture::CaptureController;
use crate::config::DriverConfig;
use crate::driver::Subsystem;
use crate::error::{ErrorKind, ErrorReporter, Result};
use crate::sdk::{consts::idstr, decode_text, DcamApi, DeviceHandle};
use crate::wait::WaitHandle;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Liveness record shared by a session and everything created from it.
///
/// Locked frames hold `access` for reading; closing takes it for writing,
/// so a handle is never closed under a live frame view.
#[derive(Debug)]
pub(crate) struct DeviceSlot {
    handle: DeviceHandle,
    index: i32,
    open: AtomicBool,
    access: RwLock<()>,
    subsystem: Weak<Subsystem>,
}

/// Outcome of [`DeviceSlot::close_without_waiting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotClose {
    /// Closed here; the handle can be released now.
    Free(DeviceHandle),
    /// Closed here, but frame views still read from the device. The handle
    /// must stay valid until they are dropped.
    InUse(DeviceHandle),
    /// Someone else closed it.
    AlreadyClosed,
}

/// Held by a locked frame: keeps the device open and the subsystem
/// initialised until the frame is dropped.
#[derive(Debug)]
pub(crate) struct FrameAccess<'a> {
    // released before the subsystem reference
    _guard: RwLockReadGuard<'a, ()>,
    _subsystem: Option<Arc<Subsystem>>,
}

impl DeviceSlot {
    pub(crate) fn new(handle: DeviceHandle, index: i32, subsystem: Weak<Subsystem>) -> Self {
        Self {
            handle,
            index,
            open: AtomicBool::new(true),
            access: RwLock::new(()),
            subsystem,
        }
    }

    /// The handle, or a local `InvalidHandle` error once closed.
    pub(crate) fn handle(&self, operation: &'static str) -> Result<DeviceHandle> {
        if self.open.load(Ordering::Acquire) {
            Ok(self.handle)
        } else {
            Err(ErrorReporter::local(ErrorKind::InvalidHandle, operation))
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark closed. Returns the handle if this call performed the transition.
    ///
    /// Frame views borrow their session, so none can be alive when the
    /// owning session closes itself.
    pub(crate) fn take(&self) -> Option<DeviceHandle> {
        let _closing = self.access.write();
        self.open
            .swap(false, Ordering::AcqRel)
            .then_some(self.handle)
    }

    /// Mark closed without waiting for frame views, which may live on the
    /// calling thread.
    pub(crate) fn close_without_waiting(&self) -> SlotClose {
        let closing = self.access.try_write();
        if !self.open.swap(false, Ordering::AcqRel) {
            return SlotClose::AlreadyClosed;
        }
        match closing {
            Some(_) => SlotClose::Free(self.handle),
            None => SlotClose::InUse(self.handle),
        }
    }

    /// Shared access held by a locked frame.
    pub(crate) fn read_access(&self) -> FrameAccess<'_> {
        // taken before the guard, so teardown sees the reference whenever
        // it finds the slot locked
        let subsystem = self.subsystem.upgrade();
        FrameAccess {
            // a thread may lock several frames while a close is pending
            _guard: self.access.read_recursive(),
            _subsystem: subsystem,
        }
    }

    pub(crate) fn index(&self) -> i32 {
        self.index
    }
}

/// Capacities of the text buffers handed to the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TextLimits {
    pub(crate) name: usize,
    pub(crate) value: usize,
    pub(crate) device: usize,
}

impl From<&DriverConfig> for TextLimits {
    fn from(config: &DriverConfig) -> Self {
        Self {
            name: config.name_text_bytes.max(1),
            value: config.value_text_bytes.max(1),
            device: config.device_text_bytes.max(1),
        }
    }
}

/// Device information strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringId {
    /// Interface the camera is attached through.
    Bus,
    /// Serial number.
    CameraId,
    /// Manufacturer.
    Vendor,
    /// Model name.
    Model,
    /// Firmware version.
    CameraVersion,
    /// Driver version.
    DriverVersion,
    /// Interface module version.
    ModuleVersion,
    /// DCAM-API version.
    ApiVersion,
}

impl StringId {
    /// Vendor string id.
    pub fn raw(self) -> i32 {
        match self {
            Self::Bus => idstr::BUS,
            Self::CameraId => idstr::CAMERAID,
            Self::Vendor => idstr::VENDOR,
            Self::Model => idstr::MODEL,
            Self::CameraVersion => idstr::CAMERAVERSION,
            Self::DriverVersion => idstr::DRIVERVERSION,
            Self::ModuleVersion => idstr::MODULEVERSION,
            Self::ApiVersion => idstr::DCAMAPIVERSION,
        }
    }
}

/// Identification of a camera. Strings the device does not provide are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device index used to open the camera.
    pub index: i32,
    /// Manufacturer.
    pub vendor: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// Serial number.
    pub camera_id: Option<String>,
    /// Bus.
    pub bus: Option<String>,
    /// Firmware version.
    pub camera_version: Option<String>,
    /// Driver version.
    pub driver_version: Option<String>,
    /// Module version.
    pub module_version: Option<String>,
    /// DCAM-API version.
    pub api_version: Option<String>,
}

/// An open camera.
pub struct DeviceSession {
    slot: Arc<DeviceSlot>,
    reporter: ErrorReporter,
    limits: TextLimits,
    wait_timeout_ms: u32,
    buffers: BufferManager,
    capture: CaptureController,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("index", &self.slot.index())
            .field("open", &self.slot.is_open())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub(crate) fn new(slot: Arc<DeviceSlot>, reporter: ErrorReporter, config: &DriverConfig) -> Self {
        Self {
            buffers: BufferManager::new(slot.clone(), reporter.clone()),
            capture: CaptureController::new(slot.clone(), reporter.clone()),
            slot,
            reporter,
            limits: TextLimits::from(config),
            wait_timeout_ms: config.wait_timeout_ms,
        }
    }

    /// Index this session was opened with.
    pub fn index(&self) -> i32 {
        self.slot.index()
    }

    /// False once the session was closed or the driver torn down.
    pub fn is_open(&self) -> bool {
        self.slot.is_open()
    }

    /// Frame buffers of this device.
    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    /// Frame buffers of this device, for allocation and release.
    pub fn buffers_mut(&mut self) -> &mut BufferManager {
        &mut self.buffers
    }

    /// Capture control of this device.
    pub fn capture(&self) -> &CaptureController {
        &self.capture
    }

    /// Open a wait object on this device.
    pub fn wait_handle(&self) -> Result<WaitHandle> {
        WaitHandle::open(self)
    }

    /// Read one identification string.
    pub fn get_string(&self, id: StringId) -> Result<String> {
        let handle = self.handle("dcamdev_getstring")?;
        let mut text = vec![0u8; self.limits.device];
        let status = self.api().dev_get_string(Some(handle), id.raw(), &mut text);
        self.reporter
            .check(status, "dcamdev_getstring", Some(handle))?;
        Ok(decode_text(&text))
    }

    /// Read every identification string.
    pub fn info(&self) -> Result<DeviceInfo> {
        let optional = |id| match self.get_string(id) {
            Ok(text) => Ok(Some(text)),
            Err(e)
                if matches!(
                    e.kind(),
                    Some(ErrorKind::NotSupport | ErrorKind::InvalidParam | ErrorKind::NotImplement)
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        };
        Ok(DeviceInfo {
            index: self.index(),
            vendor: optional(StringId::Vendor)?,
            model: optional(StringId::Model)?,
            camera_id: optional(StringId::CameraId)?,
            bus: optional(StringId::Bus)?,
            camera_version: optional(StringId::CameraVersion)?,
            driver_version: optional(StringId::DriverVersion)?,
            module_version: optional(StringId::ModuleVersion)?,
            api_version: optional(StringId::ApiVersion)?,
        })
    }

    pub(crate) fn handle(&self, operation: &'static str) -> Result<DeviceHandle> {
        self.slot.handle(operation)
    }

    pub(crate) fn slot(&self) -> &Arc<DeviceSlot> {
        &self.slot
    }

    pub(crate) fn reporter(&self) -> &ErrorReporter {
        &self.reporter
    }

    pub(crate) fn api(&self) -> &Arc<dyn DcamApi> {
        self.reporter.api()
    }

    pub(crate) fn limits(&self) -> TextLimits {
        self.limits
    }

    pub(crate) fn wait_timeout_ms(&self) -> u32 {
        self.wait_timeout_ms
    }

    /// Close the handle. Fails with `InvalidHandle` if already closed.
    pub(crate) fn close_handle(&mut self) -> Result<()> {
        let handle = self
            .slot
            .take()
            .ok_or_else(|| ErrorReporter::local(ErrorKind::InvalidHandle, "dcamdev_close"))?;
        let status = self.api().dev_close(handle);
        tracing::debug!(index = self.index(), %status, "dcamdev_close");
        // the subsystem dropped its buffers with the handle
        self.buffers.forget();
        self.reporter.check(status, "dcamdev_close", Some(handle))
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Some(handle) = self.slot.take() {
            let status = self.api().dev_close(handle);
            match self.reporter.check(status, "dcamdev_close", Some(handle)) {
                Ok(()) => tracing::debug!(index = self.index(), "Camera closed on drop"),
                Err(e) => tracing::warn!(index = self.index(), error = %e, "Failed to close camera on drop"),
            }
        }
    }
}
