//! Layered configuration: defaults, TOML file, then `DCAM_` environment.
#![cfg(feature = "mock")]

use daq_driver_dcam::config::{DcamConfig, DriverConfig};
use daq_driver_dcam::logging::OutputFormat;
use daq_driver_dcam::mock::SimulatedDcam;
use daq_driver_dcam::{DcamError, DriverContext};
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = DcamConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, DcamConfig::default());
    config.validate().unwrap();
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let file = toml_file(
        r#"
        [logging]
        level = "debug"
        format = "json"

        [driver]
        wait_timeout_ms = 250

        [simulator]
        devices = 3
        sensor_width = 64
        sensor_height = 32
        model = "C15550-20UP"
        "#,
    );
    let config = DcamConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, OutputFormat::Json);
    assert_eq!(config.driver.wait_timeout_ms, 250);
    // untouched keys keep their defaults
    assert_eq!(config.driver.error_text_bytes, 1024);
    assert_eq!(config.simulator.devices, 3);
    assert_eq!(config.simulator.model, "C15550-20UP");
    assert_eq!(config.simulator.vendor, "Hamamatsu");
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = toml_file("[driver]\nwait_timeout_ms = 250\n");
    std::env::set_var("DCAM_DRIVER__WAIT_TIMEOUT_MS", "75");
    std::env::set_var("DCAM_SIMULATOR__DEVICES", "4");
    let loaded = DcamConfig::load_from(file.path());
    std::env::remove_var("DCAM_DRIVER__WAIT_TIMEOUT_MS");
    std::env::remove_var("DCAM_SIMULATOR__DEVICES");

    let config = loaded.unwrap();
    assert_eq!(config.driver.wait_timeout_ms, 75);
    assert_eq!(config.simulator.devices, 4);
}

#[test]
#[serial]
fn malformed_values_are_config_errors() {
    let file = toml_file("[driver]\nwait_timeout_ms = \"soon\"\n");
    let err = DcamConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, DcamError::Config(_)), "{err:?}");
}

#[test]
#[serial]
fn validation_rejects_bad_values() {
    let file = toml_file("[simulator]\nsensor_width = 30\n");
    let config = DcamConfig::load_from(file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, DcamError::Config(_)));
    assert!(err.to_string().contains("multiples of 4"), "{err}");

    let file = toml_file("[driver]\nerror_text_bytes = 4\n");
    let err = DcamConfig::load_from(file.path())
        .unwrap()
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("error_text_bytes"), "{err}");
}

#[test]
#[serial]
fn loaded_config_drives_the_simulator() {
    let file = toml_file(
        "[driver]\nwait_timeout_ms = 20\n[simulator]\ndevices = 2\nsensor_width = 8\nsensor_height = 8\n",
    );
    let config = DcamConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();

    let driver = DriverContext::init_with_config(
        Arc::new(SimulatedDcam::from_config(&config.simulator)),
        &config.driver,
    )
    .unwrap();
    assert_eq!(driver.device_count(), 2);
    assert_eq!(driver.config(), &DriverConfig { wait_timeout_ms: 20, ..Default::default() });

    let session = driver.open(1).unwrap();
    let wait = session.wait_handle().unwrap();
    let err = wait
        .start_default(daq_driver_dcam::CaptureEvent::FRAME_READY)
        .unwrap_err();
    assert!(err.is_timeout());
}
