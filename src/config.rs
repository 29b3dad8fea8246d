//! Configuration loading using Figment.
//!
//! Configuration is layered from:
//! 1. `config/dcam.toml` (or a path given to [`DcamConfig::load_from`])
//! 2. Environment variables prefixed with `DCAM_`, with `__` separating
//!    nested keys
//!
//! Every field has a default, so an absent file yields a usable config.
//!
//! # Example
//! ```no_run
//! use daq_driver_dcam::config::DcamConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // DCAM_DRIVER__WAIT_TIMEOUT_MS=250 overrides the file
//! let config = DcamConfig::load()?;
//! config.validate()?;
//! println!("wait timeout: {} ms", config.driver.wait_timeout_ms);
//! # Ok(())
//! # }
//! ```

use crate::error::{DcamError, Result};
use crate::logging::{parse_log_level, LoggingConfig};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/dcam.toml";

/// Smallest accepted text buffer capacity.
pub const MIN_TEXT_BYTES: usize = 16;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DcamConfig {
    /// Tracing subscriber settings.
    pub logging: LoggingConfig,
    /// Driver-core settings.
    pub driver: DriverConfig,
    /// Simulated camera model.
    pub simulator: SimulatorConfig,
}

/// Settings used by the driver core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Timeout used by [`WaitHandle::start_default`](crate::wait::WaitHandle::start_default).
    pub wait_timeout_ms: u32,
    /// Capacity of the error description buffer.
    pub error_text_bytes: usize,
    /// Capacity of the property name buffer.
    pub name_text_bytes: usize,
    /// Capacity of the value text buffer.
    pub value_text_bytes: usize,
    /// Capacity of the device string buffer.
    pub device_text_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 1000,
            error_text_bytes: 1024,
            name_text_bytes: 64,
            value_text_bytes: 64,
            device_text_bytes: 256,
        }
    }
}

/// Parameters of the simulated camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Number of cameras reported by init.
    pub devices: u32,
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Initial exposure time in seconds.
    pub exposure_s: f64,
    /// Reported vendor string.
    pub vendor: String,
    /// Reported model string.
    pub model: String,
    /// Reported bus string.
    pub bus: String,
    /// Upper bound on memory the simulator will allocate for frames.
    pub memory_limit_bytes: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            sensor_width: 2048,
            sensor_height: 2048,
            exposure_s: 0.01,
            vendor: "Hamamatsu".to_string(),
            model: "C13440-20CU".to_string(),
            bus: "USB3".to_string(),
            memory_limit_bytes: 2 << 30,
        }
    }
}

impl DcamConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider, exposed for callers that merge extra sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DCAM_").split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.logging.level)?;

        let texts = [
            ("error_text_bytes", self.driver.error_text_bytes),
            ("name_text_bytes", self.driver.name_text_bytes),
            ("value_text_bytes", self.driver.value_text_bytes),
            ("device_text_bytes", self.driver.device_text_bytes),
        ];
        for (name, bytes) in texts {
            if bytes < MIN_TEXT_BYTES {
                return Err(DcamError::Config(format!(
                    "Invalid {name} {bytes}. Must be at least {MIN_TEXT_BYTES}"
                )));
            }
        }

        let sim = &self.simulator;
        if sim.devices == 0 {
            return Err(DcamError::Config(
                "Invalid simulator.devices 0. At least one camera is required".into(),
            ));
        }
        if sim.sensor_width == 0 || sim.sensor_height == 0 {
            return Err(DcamError::Config(format!(
                "Invalid sensor size {}x{}",
                sim.sensor_width, sim.sensor_height
            )));
        }
        if sim.sensor_width % 4 != 0 || sim.sensor_height % 4 != 0 {
            return Err(DcamError::Config(format!(
                "Invalid sensor size {}x{}. Dimensions must be multiples of 4",
                sim.sensor_width, sim.sensor_height
            )));
        }
        if !(sim.exposure_s.is_finite() && sim.exposure_s > 0.0) {
            return Err(DcamError::Config(format!(
                "Invalid simulator.exposure_s {}. Must be positive",
                sim.exposure_s
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DcamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.driver.wait_timeout_ms, 1000);
        assert_eq!(config.driver.error_text_bytes, 1024);
        assert_eq!(config.driver.name_text_bytes, 64);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DcamConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_devices_rejected() {
        let mut config = DcamConfig::default();
        config.simulator.devices = 0;
        assert!(matches!(config.validate(), Err(DcamError::Config(_))));
    }

    #[test]
    fn test_small_text_buffer_rejected() {
        let mut config = DcamConfig::default();
        config.driver.name_text_bytes = 8;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("name_text_bytes"));
    }

    #[test]
    fn test_non_positive_exposure_rejected() {
        let mut config = DcamConfig::default();
        config.simulator.exposure_s = 0.0;
        assert!(config.validate().is_err());
        config.simulator.exposure_s = f64::NAN;
        assert!(config.validate().is_err());
    }
}
