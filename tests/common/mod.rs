//! Shared helpers for the integration tests.

#![allow(dead_code)]

use daq_driver_dcam::config::SimulatorConfig;
use daq_driver_dcam::mock::SimulatedDcam;
use daq_driver_dcam::DriverContext;
use std::sync::Arc;

/// Sensor width of the small test camera.
pub const WIDTH: u32 = 16;
/// Sensor height of the small test camera.
pub const HEIGHT: u32 = 8;

/// Two small, fast cameras.
pub fn small_config() -> SimulatorConfig {
    SimulatorConfig {
        devices: 2,
        sensor_width: WIDTH,
        sensor_height: HEIGHT,
        exposure_s: 0.002,
        ..SimulatorConfig::default()
    }
}

/// Simulator built from [`small_config`].
pub fn simulator() -> Arc<SimulatedDcam> {
    Arc::new(SimulatedDcam::from_config(&small_config()))
}

/// Initialise the driver on a fresh simulator. Callers must be `#[serial]`.
pub fn driver() -> DriverContext {
    DriverContext::init(simulator()).unwrap()
}
