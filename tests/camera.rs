//! The name-based camera layer.
#![cfg(feature = "mock")]

mod common;

use daq_driver_dcam::sdk::consts::{err, prop};
use daq_driver_dcam::{
    Camera, DcamError, DriverContext, ErrorKind, PixelType, PropertyValue, Roi,
};
use serial_test::serial;

#[test]
#[serial]
fn properties_by_normalised_name() {
    let driver = common::driver();
    let mut camera = Camera::open(&driver, 0).unwrap();

    let names = camera.enumerate_properties().unwrap().clone();
    assert_eq!(names.get("exposure_time"), Some(&prop::EXPOSURETIME));
    assert_eq!(names.get("trigger_source"), Some(&prop::TRIGGERSOURCE));
    assert!(names.keys().all(|k| !k.contains(' ') && k.to_lowercase() == *k));

    assert_eq!(camera.get_property("binning").unwrap(), PropertyValue::Text("1x1".into()));
    camera.set_property("binning", "4X4").unwrap();
    assert_eq!(camera.get_property("BINNING").unwrap(), PropertyValue::Text("4x4".into()));
    // numeric values work for Mode properties too
    camera.set_property("binning", 2.0).unwrap();
    assert_eq!(camera.get_property("binning").unwrap(), PropertyValue::Text("2x2".into()));

    camera.set_property("readout_speed", 1).unwrap();
    assert_eq!(camera.get_property("readout_speed").unwrap(), PropertyValue::Long(1));

    let attr = camera.property_attributes("subarray_hsize").unwrap();
    assert_eq!(attr.step, Some(4.0));
}

#[test]
#[serial]
fn exposure_time() {
    let driver = common::driver();
    let camera = Camera::open(&driver, 0).unwrap();
    assert_eq!(camera.exposure_time().unwrap(), 0.002);
    assert_eq!(camera.set_exposure_time(0.02).unwrap(), 0.02);
    assert_eq!(
        camera.get_property("exposure_time").unwrap(),
        PropertyValue::Real(0.02)
    );
    let err = camera.set_exposure_time(60.0).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::OutOfRange));
}

#[test]
#[serial]
fn roi_shapes_the_snapped_frame() {
    let driver = common::driver();
    let mut camera = Camera::open(&driver, 0).unwrap();
    let roi = Roi {
        x: 4,
        y: 4,
        width: 8,
        height: 4,
    };
    camera.set_roi(roi).unwrap();
    assert_eq!(camera.roi().unwrap(), roi);

    let frame = camera.snap(1000).unwrap();
    assert_eq!((frame.width, frame.height), (8, 4));
    assert_eq!(frame.pixel_type, PixelType::Mono16);
    assert_eq!(frame.pixels_u16().len(), 32);
}

#[test]
#[serial]
fn repeated_snaps() {
    let driver = common::driver();
    let mut camera = Camera::open(&driver, 0).unwrap();
    for _ in 0..3 {
        let frame = camera.snap(1000).unwrap();
        assert_eq!((frame.width, frame.height), (common::WIDTH, common::HEIGHT));
        // every snap starts a fresh capture
        assert_eq!(frame.framestamp, 0);
    }
    assert_eq!(camera.session().buffers().frame_count(), 0);
}

#[test]
#[serial]
fn snap_timeout_still_releases_buffers() {
    let driver = common::driver();
    let mut camera = Camera::open(&driver, 0).unwrap();
    camera.set_property("trigger_source", "external").unwrap();

    let err = camera.snap(30).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(camera.session().buffers().frame_count(), 0);

    camera.set_property("trigger_source", "internal").unwrap();
    camera.snap(1000).unwrap();
}

#[test]
#[serial]
fn continuous_acquisition() {
    let driver = common::driver();
    let mut camera = Camera::open(&driver, 1).unwrap();
    assert_eq!(camera.info().unwrap().camera_id.as_deref(), Some("S/N: 000002"));

    camera.configure_acquisition(4).unwrap();
    assert!(matches!(
        camera.configure_acquisition(4),
        Err(DcamError::Value(_))
    ));
    camera.start_acquisition().unwrap();
    let mut stamps = Vec::new();
    for _ in 0..5 {
        stamps.push(camera.get_image(1000).unwrap().framestamp);
    }
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

    // unconfigure stops a running capture
    camera.unconfigure_acquisition().unwrap();
    assert!(matches!(camera.get_image(10), Err(DcamError::Value(_))));
    camera.close(&driver).unwrap();
}

#[test]
#[serial]
fn unconfigure_releases_the_ring_when_a_step_fails() {
    let sim = common::simulator();
    let driver = DriverContext::init(sim.clone()).unwrap();
    let mut camera = Camera::open(&driver, 0).unwrap();
    camera.configure_acquisition(4).unwrap();
    camera.start_acquisition().unwrap();
    camera.get_image(1000).unwrap();

    sim.fail_next("wait_close", err::NOCONNECTION);
    let err = camera.unconfigure_acquisition().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NoConnection));
    assert_eq!(camera.session().buffers().frame_count(), 0);
    assert!(matches!(camera.get_image(10), Err(DcamError::Value(_))));

    // the camera is usable again
    camera.configure_acquisition(2).unwrap();
    camera.start_acquisition().unwrap();
    camera.get_image(1000).unwrap();
    camera.unconfigure_acquisition().unwrap();

    sim.fail_next("cap_stop", err::NOCONNECTION);
    camera.configure_acquisition(2).unwrap();
    let err = camera.unconfigure_acquisition().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NoConnection));
    assert_eq!(camera.session().buffers().frame_count(), 0);
    camera.close(&driver).unwrap();
}

#[test]
#[serial]
fn into_session_keeps_the_device_open() {
    let driver = common::driver();
    let camera = Camera::open(&driver, 0).unwrap();
    let mut session = camera.into_session();
    assert!(session.is_open());
    assert_eq!(session.get_value(prop::BINNING).unwrap(), 1.0);
    driver.close(&mut session).unwrap();
}
