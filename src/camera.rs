//! High-level camera driver.
//!
//! [`Camera`] wraps a [`DeviceSession`] with name-based property access,
//! exposure and region-of-interest helpers, one-shot [`Camera::snap`] and a
//! small continuous-acquisition workflow:
//!
//! ```
//! use daq_driver_dcam::{camera::Camera, driver::DriverContext, mock::SimulatedDcam};
//! use std::sync::Arc;
//!
//! # fn main() -> daq_driver_dcam::Result<()> {
//! let driver = DriverContext::init(Arc::new(SimulatedDcam::new()))?;
//! let mut camera = Camera::open(&driver, 0)?;
//! camera.set_exposure_time(0.005)?;
//! camera.set_property("binning", "2x2")?;
//!
//! camera.configure_acquisition(4)?;
//! camera.start_acquisition()?;
//! let frame = camera.get_image(2000)?;
//! assert_eq!(frame.width, 1024);
//! camera.stop_acquisition()?;
//! camera.unconfigure_acquisition()?;
//! camera.close(&driver)?;
//! # Ok(())
//! # }
//! ```

use crate::buffer::{Frame, NEWEST_FRAME};
use crate::capture::CaptureMode;
use crate::driver::DriverContext;
use crate::error::{DcamError, Result};
use crate::property::{normalize_label, PropertyAttribute, PropertyKind};
use crate::sdk::consts::{mode, prop};
use crate::session::{DeviceInfo, DeviceSession};
use crate::wait::{CaptureEvent, WaitHandle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A property value, as read or as requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Label of a Mode value, normalised.
    Text(String),
    /// Integer value.
    Long(i64),
    /// Floating-point value.
    Real(f64),
}

impl PropertyValue {
    /// Numeric value, if this is not a label.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Text(_) => None,
            Self::Long(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Long(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(label: &str) -> Self {
        Self::Text(label.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(label: String) -> Self {
        Self::Text(label)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Long(i64::from(v))
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

/// Region of interest on the sensor, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

/// An open camera with name-based property access.
pub struct Camera {
    // dropped before the session so the wait object closes first
    acquisition: Option<WaitHandle>,
    session: DeviceSession,
    properties: BTreeMap<String, i32>,
}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("session", &self.session)
            .field("acquisition_configured", &self.acquisition.is_some())
            .field("properties", &self.properties.len())
            .finish()
    }
}

impl Camera {
    /// Open camera `index` and read its property table.
    pub fn open(driver: &DriverContext, index: i32) -> Result<Self> {
        let mut session = driver.open(index)?;
        let properties = match Self::read_properties(&session) {
            Ok(properties) => properties,
            Err(e) => {
                if let Err(close) = driver.close(&mut session) {
                    tracing::warn!(index, error = %close, "Failed to close camera after open error");
                }
                return Err(e);
            }
        };
        tracing::info!(index, properties = properties.len(), "Camera ready");
        Ok(Self {
            acquisition: None,
            session,
            properties,
        })
    }

    fn read_properties(session: &DeviceSession) -> Result<BTreeMap<String, i32>> {
        session
            .properties()
            .map(|entry| entry.map(|(id, name)| (normalize_label(&name), id)))
            .collect()
    }

    /// The underlying session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// The underlying session, mutably.
    pub fn session_mut(&mut self) -> &mut DeviceSession {
        &mut self.session
    }

    /// Identification strings.
    pub fn info(&self) -> Result<DeviceInfo> {
        self.session.info()
    }

    /// Normalised property names and their ids, read again from the device.
    pub fn enumerate_properties(&mut self) -> Result<&BTreeMap<String, i32>> {
        self.properties = Self::read_properties(&self.session)?;
        Ok(&self.properties)
    }

    /// Id of the property called `name` (normalised before lookup).
    pub fn property_id(&self, name: &str) -> Result<i32> {
        let key = normalize_label(name);
        self.properties
            .get(&key)
            .copied()
            .ok_or_else(|| DcamError::Value(format!("unknown property '{name}'")))
    }

    /// Attributes of property `name`.
    pub fn property_attributes(&self, name: &str) -> Result<PropertyAttribute> {
        self.session.get_attribute(self.property_id(name)?)
    }

    /// Current value of property `name`. Mode properties read as their label.
    pub fn get_property(&self, name: &str) -> Result<PropertyValue> {
        let id = self.property_id(name)?;
        let attribute = self.session.get_attribute(id)?;
        let value = self.session.get_value(id)?;
        Ok(match attribute.kind {
            PropertyKind::Mode => match attribute.label_of(value) {
                Some(label) => PropertyValue::Text(label.to_string()),
                None => PropertyValue::Text(normalize_label(
                    &self.session.get_value_text(id, value)?,
                )),
            },
            PropertyKind::Long => PropertyValue::Long(value as i64),
            PropertyKind::Real => PropertyValue::Real(value),
        })
    }

    /// Write property `name`.
    ///
    /// Mode properties accept a label or a numeric value; numeric properties
    /// reject labels with a value error.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let id = self.property_id(name)?;
        let value = value.into();
        let raw = match &value {
            PropertyValue::Text(label) => {
                let attribute = self.session.get_attribute(id)?;
                if attribute.kind != PropertyKind::Mode {
                    return Err(DcamError::Value(format!(
                        "property '{name}' is not a mode property, got label '{label}'"
                    )));
                }
                attribute.value_of(label).ok_or_else(|| {
                    DcamError::Value(format!("'{label}' is not a value of property '{name}'"))
                })?
            }
            numeric => numeric.as_f64().unwrap_or_default(),
        };
        tracing::debug!(property = name, %value, raw, "Setting property");
        self.session.set_value(id, raw)
    }

    /// Exposure time in seconds.
    pub fn exposure_time(&self) -> Result<f64> {
        self.session.get_value(prop::EXPOSURETIME)
    }

    /// Set the exposure time and return the value the device applied.
    pub fn set_exposure_time(&self, seconds: f64) -> Result<f64> {
        let applied = self.session.set_get_value(prop::EXPOSURETIME, seconds)?;
        tracing::debug!(requested = seconds, applied, "Exposure time set");
        Ok(applied)
    }

    /// Current region of interest.
    pub fn roi(&self) -> Result<Roi> {
        if self.session.get_value(prop::SUBARRAYMODE)? == mode::ON {
            Ok(Roi {
                x: self.session.get_value(prop::SUBARRAYHPOS)? as u32,
                y: self.session.get_value(prop::SUBARRAYVPOS)? as u32,
                width: self.session.get_value(prop::SUBARRAYHSIZE)? as u32,
                height: self.session.get_value(prop::SUBARRAYVSIZE)? as u32,
            })
        } else {
            let (width, height) = self.sensor_size()?;
            Ok(Roi {
                x: 0,
                y: 0,
                width,
                height,
            })
        }
    }

    /// Restrict readout to `roi`. A region covering the whole sensor turns
    /// sub-array readout off.
    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        let (sensor_width, sensor_height) = self.sensor_size()?;
        if roi.width == 0
            || roi.height == 0
            || roi.x.saturating_add(roi.width) > sensor_width
            || roi.y.saturating_add(roi.height) > sensor_height
        {
            return Err(DcamError::Value(format!(
                "{roi:?} does not fit the {sensor_width}x{sensor_height} sensor"
            )));
        }

        self.session.set_value(prop::SUBARRAYMODE, mode::OFF)?;
        if roi.x == 0 && roi.y == 0 && roi.width == sensor_width && roi.height == sensor_height {
            tracing::debug!("ROI covers the sensor, sub-array off");
            return Ok(());
        }
        // position first so the size range is not clipped by the old origin
        self.session
            .set_value(prop::SUBARRAYHPOS, f64::from(roi.x))?;
        self.session
            .set_value(prop::SUBARRAYHSIZE, f64::from(roi.width))?;
        self.session
            .set_value(prop::SUBARRAYVPOS, f64::from(roi.y))?;
        self.session
            .set_value(prop::SUBARRAYVSIZE, f64::from(roi.height))?;
        self.session.set_value(prop::SUBARRAYMODE, mode::ON)?;
        tracing::debug!(?roi, "ROI set");
        Ok(())
    }

    fn sensor_size(&self) -> Result<(u32, u32)> {
        let max_of = |id| -> Result<u32> {
            let attribute = self.session.get_attribute(id)?;
            attribute
                .range
                .map(|(_, max)| max as u32)
                .ok_or_else(|| DcamError::Value(format!("property 0x{id:08X} has no range")))
        };
        Ok((max_of(prop::SUBARRAYHSIZE)?, max_of(prop::SUBARRAYVSIZE)?))
    }

    /// Capture one frame.
    ///
    /// Allocates a single-frame buffer, snaps, waits up to `timeout_ms` for
    /// the frame and returns a copy. The buffer is released on every path.
    pub fn snap(&mut self, timeout_ms: u32) -> Result<Frame> {
        self.session.buffers_mut().alloc(1)?;
        let frame = self.snap_into_buffer(timeout_ms);
        let stopped = self.session.capture().stop();
        let released = self.session.buffers_mut().release();
        let frame = frame?;
        stopped?;
        released?;
        tracing::debug!(framestamp = frame.framestamp, "Snap complete");
        Ok(frame)
    }

    fn snap_into_buffer(&self, timeout_ms: u32) -> Result<Frame> {
        let wait = self.session.wait_handle()?;
        self.session.capture().start(CaptureMode::Snap)?;
        wait.start(CaptureEvent::FRAME_READY, timeout_ms)?;
        let view = self.session.buffers().lock_frame(NEWEST_FRAME)?;
        Ok(view.to_frame())
    }

    /// Allocate a ring of `frame_count` frames for continuous acquisition.
    pub fn configure_acquisition(&mut self, frame_count: i32) -> Result<()> {
        if self.acquisition.is_some() {
            return Err(DcamError::Value(
                "acquisition is already configured".to_string(),
            ));
        }
        self.session.buffers_mut().alloc(frame_count)?;
        match self.session.wait_handle() {
            Ok(wait) => {
                self.acquisition = Some(wait);
                tracing::info!(frame_count, "Acquisition configured");
                Ok(())
            }
            Err(e) => {
                if let Err(release) = self.session.buffers_mut().release() {
                    tracing::warn!(error = %release, "Failed to release buffers");
                }
                Err(e)
            }
        }
    }

    /// Start sequence capture into the configured ring.
    pub fn start_acquisition(&self) -> Result<()> {
        self.acquisition_wait()?;
        self.session.capture().start(CaptureMode::Sequence)
    }

    /// Wait up to `timeout_ms` for a frame and copy out the newest one.
    pub fn get_image(&self, timeout_ms: u32) -> Result<Frame> {
        let wait = self.acquisition_wait()?;
        wait.start(CaptureEvent::FRAME_READY, timeout_ms)?;
        let view = self.session.buffers().lock_frame(NEWEST_FRAME)?;
        Ok(view.to_frame())
    }

    /// Stop sequence capture. The ring stays allocated.
    pub fn stop_acquisition(&self) -> Result<()> {
        self.session.capture().stop()
    }

    /// Stop capture if needed, then release the ring and its wait object.
    ///
    /// Every step is attempted even when an earlier one fails; the first
    /// error is returned.
    pub fn unconfigure_acquisition(&mut self) -> Result<()> {
        let Some(wait) = self.acquisition.take() else {
            return Ok(());
        };
        let stopped = self.session.capture().stop();
        let closed = wait.close();
        let released = self.session.buffers_mut().release().map(drop);
        stopped.and(closed).and(released)?;
        tracing::info!("Acquisition unconfigured");
        Ok(())
    }

    fn acquisition_wait(&self) -> Result<&WaitHandle> {
        self.acquisition.as_ref().ok_or_else(|| {
            DcamError::Value("acquisition is not configured".to_string())
        })
    }

    /// Release any acquisition and close the camera.
    pub fn close(mut self, driver: &DriverContext) -> Result<()> {
        let unconfigured = self.unconfigure_acquisition();
        driver.close(&mut self.session)?;
        unconfigured
    }

    /// Give up the convenience layer and keep the session.
    pub fn into_session(self) -> DeviceSession {
        let Self {
            acquisition,
            session,
            ..
        } = self;
        drop(acquisition);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelType;
    use crate::config::SimulatorConfig;
    use crate::error::ErrorKind;
    use crate::mock::SimulatedDcam;
    use serial_test::serial;
    use std::sync::Arc;

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
    fn test_property_value_conversions() {
        assert_eq!(PropertyValue::from("2x2"), PropertyValue::Text("2x2".into()));
        assert_eq!(PropertyValue::from(4).as_f64(), Some(4.0));
        assert_eq!(PropertyValue::from(0.5).to_string(), "0.5");
        assert_eq!(serde_json::to_string(&PropertyValue::Long(3)).unwrap(), "3");
    }

    #[test]
    #[serial]
    fn test_property_lookup_by_name() {
        let driver = driver();
        let camera = Camera::open(&driver, 0).unwrap();
        assert_eq!(camera.property_id("EXPOSURE TIME").unwrap(), prop::EXPOSURETIME);
        assert_eq!(camera.property_id("exposure_time").unwrap(), prop::EXPOSURETIME);
        let err = camera.property_id("no such thing").unwrap_err();
        assert!(matches!(err, DcamError::Value(_)));
    }

    #[test]
    #[serial]
    fn test_mode_property_by_label() {
        let driver = driver();
        let camera = Camera::open(&driver, 0).unwrap();
        camera.set_property("trigger_source", "software").unwrap();
        assert_eq!(
            camera.get_property("trigger_source").unwrap(),
            PropertyValue::Text("software".into())
        );
        let err = camera.set_property("trigger_source", "bogus").unwrap_err();
        assert!(matches!(err, DcamError::Value(_)));
        let err = camera.set_property("exposure_time", "fast").unwrap_err();
        assert!(matches!(err, DcamError::Value(_)));
    }

    #[test]
    #[serial]
    fn test_roi_round_trip() {
        let driver = driver();
        let camera = Camera::open(&driver, 0).unwrap();
        let full = camera.roi().unwrap();
        assert_eq!((full.width, full.height), (16, 8));

        let roi = Roi {
            x: 4,
            y: 0,
            width: 8,
            height: 4,
        };
        camera.set_roi(roi).unwrap();
        assert_eq!(camera.roi().unwrap(), roi);

        camera.set_roi(full).unwrap();
        assert_eq!(camera.session().get_value(prop::SUBARRAYMODE).unwrap(), mode::OFF);

        let too_wide = Roi { width: 32, ..full };
        assert!(matches!(camera.set_roi(too_wide), Err(DcamError::Value(_))));
    }

    #[test]
    #[serial]
    fn test_snap_returns_frame_and_releases() {
        let driver = driver();
        let mut camera = Camera::open(&driver, 0).unwrap();
        let frame = camera.snap(1000).unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        assert_eq!(frame.pixel_type, PixelType::Mono16);
        assert_eq!(frame.pixel(3, 2), Some(SimulatedDcam::pixel_value(3, 2, frame.framestamp as u32)));
        assert_eq!(camera.session().buffers().frame_count(), 0);
    }

    #[test]
    #[serial]
    fn test_acquisition_workflow() {
        let driver = driver();
        let mut camera = Camera::open(&driver, 0).unwrap();
        let err = camera.start_acquisition().unwrap_err();
        assert!(matches!(err, DcamError::Value(_)));

        camera.configure_acquisition(3).unwrap();
        camera.start_acquisition().unwrap();
        let first = camera.get_image(1000).unwrap();
        let second = camera.get_image(1000).unwrap();
        assert!(second.framestamp >= first.framestamp);
        camera.stop_acquisition().unwrap();
        camera.unconfigure_acquisition().unwrap();
        assert_eq!(camera.session().buffers().frame_count(), 0);

        camera.close(&driver).unwrap();
    }

    #[test]
    #[serial]
    fn test_snap_while_configured_is_busy() {
        let driver = driver();
        let mut camera = Camera::open(&driver, 0).unwrap();
        camera.configure_acquisition(2).unwrap();
        let err = camera.snap(100).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Busy));
    }
}
