//! Buffer and capture lifecycle against the simulated camera.
#![cfg(feature = "mock")]

mod common;

use common::{HEIGHT, WIDTH};
use daq_driver_dcam::buffer::NEWEST_FRAME;
use daq_driver_dcam::config::SimulatorConfig;
use daq_driver_dcam::mock::SimulatedDcam;
use daq_driver_dcam::sdk::consts::{mode, pixeltype, prop};
use daq_driver_dcam::{
    CaptureEvent, CaptureMode, CaptureStatus, DcamError, DriverContext, ErrorKind, PixelType,
};
use serial_test::serial;
use std::sync::Arc;

const FRAME_BYTES: usize = (WIDTH * HEIGHT * 2) as usize;

#[test]
#[serial]
fn snap_fills_every_slot_then_stops() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session.buffers_mut().alloc(3).unwrap();
    assert_eq!(session.buffers().frame_count(), 3);
    let wait = session.wait_handle().unwrap();

    session.capture().start(CaptureMode::Snap).unwrap();
    let fired = wait.start(CaptureEvent::STOPPED, 1000).unwrap();
    assert!(fired.contains(CaptureEvent::STOPPED));

    assert_eq!(session.capture().status().unwrap(), CaptureStatus::Ready);
    let info = session.capture().transfer_info().unwrap();
    assert_eq!((info.newest_frame_index, info.frame_count), (2, 3));

    for slot in 0..3 {
        let view = session.buffers().lock_frame(slot).unwrap();
        assert_eq!(view.frame_index, slot);
        assert_eq!(view.framestamp, slot);
        assert_eq!((view.width, view.height), (WIDTH, HEIGHT));
        assert_eq!(view.pixel_type, PixelType::Mono16);
        let frame = view.to_frame();
        for (x, y) in [(0, 0), (5, 3), (WIDTH - 1, HEIGHT - 1)] {
            assert_eq!(
                frame.pixel(x, y),
                Some(SimulatedDcam::pixel_value(x, y, slot as u32))
            );
        }
    }

    session.buffers_mut().release().unwrap();
    assert_eq!(session.capture().status().unwrap(), CaptureStatus::Stable);
}

#[test]
#[serial]
fn mono16_rows_are_unpadded() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    // full sensor, then a binned sub-array
    for (binning, hsize) in [(1.0, WIDTH), (2.0, WIDTH / 2)] {
        session.set_value(prop::BINNING, binning).unwrap();
        session.set_value(prop::SUBARRAYHSIZE, f64::from(hsize)).unwrap();
        session.set_value(prop::SUBARRAYMODE, mode::ON).unwrap();

        session.buffers_mut().alloc(2).unwrap();
        let wait = session.wait_handle().unwrap();
        session.capture().start(CaptureMode::Snap).unwrap();
        wait.start(CaptureEvent::STOPPED, 1000).unwrap();

        for slot in 0..2 {
            let view = session.buffers().lock_frame(slot).unwrap();
            assert_eq!(view.pixel_type, PixelType::Mono16);
            let height = view.height as usize;
            assert_eq!(
                view.width as usize * height * view.pixel_type.bytes_per_pixel(),
                view.rowbytes * height
            );
            assert_eq!(view.data().len(), view.rowbytes * height);
        }
        drop(wait);
        session.buffers_mut().release().unwrap();
    }
}

#[test]
#[serial]
fn sequence_wraps_around_the_ring() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session.buffers_mut().alloc(2).unwrap();
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Sequence).unwrap();

    let mut last_count = 0;
    while last_count < 5 {
        wait.start(CaptureEvent::FRAME_READY, 1000).unwrap();
        let info = session.capture().transfer_info().unwrap();
        assert!(info.frame_count >= last_count);
        assert_eq!(info.newest_frame_index, (info.frame_count - 1) % 2);
        last_count = info.frame_count;
    }
    assert_eq!(session.capture().status().unwrap(), CaptureStatus::Busy);

    session.capture().stop().unwrap();
    let fired = wait.start(CaptureEvent::STOPPED, 1000).unwrap();
    assert!(fired.contains(CaptureEvent::STOPPED));
    assert_eq!(session.capture().status().unwrap(), CaptureStatus::Ready);

    let newest = session.buffers().lock_frame(NEWEST_FRAME).unwrap();
    assert!(newest.framestamp >= 4);
}

#[test]
#[serial]
fn start_requires_buffers_and_is_not_reentrant() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();

    let err = session.capture().start(CaptureMode::Sequence).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotReady));

    session.buffers_mut().alloc(2).unwrap();
    session.capture().start(CaptureMode::Sequence).unwrap();
    let err = session.capture().start(CaptureMode::Sequence).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Busy));
    assert_eq!(session.capture().status().unwrap(), CaptureStatus::Busy);
    session.capture().stop().unwrap();
}

#[test]
#[serial]
fn buffer_state_errors() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();

    let err = session.buffers_mut().alloc(0).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidParam));
    assert_eq!(session.buffers().frame_count(), 0);

    session.buffers_mut().alloc(2).unwrap();
    let err = session.buffers_mut().alloc(2).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Busy));

    // geometry is frozen while buffers exist
    let err = session.set_value(prop::BINNING, 2.0).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::AccessDeny));

    session.capture().start(CaptureMode::Sequence).unwrap();
    let err = session.buffers_mut().release().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Busy));
    let err = session.set_value(prop::BINNING, 2.0).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Busy));
    // exposure may change during capture
    session.set_value(prop::EXPOSURETIME, 0.003).unwrap();

    session.capture().stop().unwrap();
    session.buffers_mut().release().unwrap();
    session.set_value(prop::BINNING, 2.0).unwrap();
}

#[test]
#[serial]
fn lock_frame_errors() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();

    let err = session.buffers().lock_frame(0).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotReady));

    session.buffers_mut().alloc(2).unwrap();
    let err = session.buffers().lock_frame(NEWEST_FRAME).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotReady));
    let err = session.buffers().lock_frame(2).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::InvalidFrameIndex));
}

#[test]
#[serial]
fn attach_validates_before_reaching_the_device() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    assert_eq!(session.buffers().frame_bytes().unwrap(), FRAME_BYTES);

    let err = session.buffers_mut().attach_owned(Vec::new()).unwrap_err();
    assert!(matches!(err, DcamError::Value(_)));
    // SAFETY: nothing is attached, the call fails before the device sees it.
    let err = unsafe { session.buffers_mut().attach(&mut []) }.unwrap_err();
    assert!(matches!(err, DcamError::Value(_)));

    let uneven = vec![vec![0u8; FRAME_BYTES], vec![0u8; FRAME_BYTES + 2]];
    let err = session.buffers_mut().attach_owned(uneven).unwrap_err();
    assert!(matches!(err, DcamError::Value(_)));

    let short = vec![vec![0u8; FRAME_BYTES - 1]; 2];
    let err = session.buffers_mut().attach_owned(short).unwrap_err();
    assert!(matches!(err, DcamError::Value(_)));

    assert_eq!(session.buffers().frame_count(), 0);
    assert!(!session.buffers().is_attached());
}

#[test]
#[serial]
fn attached_frames_are_filled_and_returned() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .buffers_mut()
        .attach_owned(vec![vec![0u8; FRAME_BYTES]; 2])
        .unwrap();
    assert!(session.buffers().is_attached());
    assert_eq!(session.buffers().frame_count(), 2);

    let err = session.buffers_mut().alloc(1).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Busy));

    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Snap).unwrap();
    wait.start(CaptureEvent::CYCLE_END, 1000).unwrap();

    let frames = session.buffers_mut().release().unwrap();
    assert_eq!(frames.len(), 2);
    for (stamp, data) in frames.iter().enumerate() {
        let first = u16::from_le_bytes([data[0], data[1]]);
        assert_eq!(first, SimulatedDcam::pixel_value(0, 0, stamp as u32));
    }
    assert!(!session.buffers().is_attached());
}

#[test]
#[serial]
fn borrowed_frames_can_be_attached() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    let mut storage = vec![0u8; FRAME_BYTES];
    {
        let mut frames = [storage.as_mut_slice()];
        // SAFETY: `storage` outlives the attachment, which is released below.
        unsafe { session.buffers_mut().attach(&mut frames) }.unwrap();
    }
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Snap).unwrap();
    wait.start(CaptureEvent::FRAME_READY, 1000).unwrap();
    assert!(session.buffers_mut().release().unwrap().is_empty());

    let last = FRAME_BYTES - 2;
    assert_eq!(
        u16::from_le_bytes([storage[last], storage[last + 1]]),
        SimulatedDcam::pixel_value(WIDTH - 1, HEIGHT - 1, 0)
    );
}

#[test]
#[serial]
fn mono8_frames() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .set_value(prop::IMAGE_PIXELTYPE, f64::from(pixeltype::MONO8))
        .unwrap();
    session.buffers_mut().alloc(1).unwrap();
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Snap).unwrap();
    wait.start(CaptureEvent::FRAME_READY, 1000).unwrap();

    let frame = session.buffers().lock_frame(0).unwrap().to_frame();
    assert_eq!(frame.pixel_type, PixelType::Mono8);
    assert_eq!(frame.data.len(), (WIDTH * HEIGHT) as usize);
    assert_eq!(frame.pixel(7, 3), Some(10));
}

#[test]
#[serial]
fn unsupported_pixel_type_is_not_implemented() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .set_value(prop::IMAGE_PIXELTYPE, f64::from(pixeltype::RGB24))
        .unwrap();
    session.buffers_mut().alloc(1).unwrap();
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Snap).unwrap();
    wait.start(CaptureEvent::FRAME_READY, 1000).unwrap();

    let err = session.buffers().lock_frame(0).unwrap_err();
    assert!(matches!(err, DcamError::NotImplemented(_)));
}

#[test]
#[serial]
fn software_trigger_releases_one_frame() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .set_value(prop::TRIGGERSOURCE, mode::TRIGGERSOURCE_SOFTWARE)
        .unwrap();
    session.buffers_mut().alloc(2).unwrap();
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Sequence).unwrap();

    let err = wait.start(CaptureEvent::FRAME_READY, 50).unwrap_err();
    assert!(err.is_timeout());

    session.capture().fire_trigger().unwrap();
    wait.start(CaptureEvent::FRAME_READY, 1000).unwrap();
    assert_eq!(session.capture().transfer_info().unwrap().frame_count, 1);
    session.capture().stop().unwrap();
}

#[test]
#[serial]
fn external_trigger_without_signal_times_out() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .set_value(prop::TRIGGERSOURCE, mode::TRIGGERSOURCE_EXTERNAL)
        .unwrap();
    session.buffers_mut().alloc(1).unwrap();
    let wait = session.wait_handle().unwrap();
    session.capture().start(CaptureMode::Snap).unwrap();

    let err = wait.start(CaptureEvent::FRAME_READY, 50).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    let err = session.capture().fire_trigger().unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NoTrigger));
    session.capture().stop().unwrap();
}

#[test]
#[serial]
fn close_while_capturing() {
    let driver = common::driver();
    let mut session = driver.open(0).unwrap();
    session
        .buffers_mut()
        .attach_owned(vec![vec![0u8; FRAME_BYTES]; 2])
        .unwrap();
    session.capture().start(CaptureMode::Sequence).unwrap();
    driver.close(&mut session).unwrap();
    assert_eq!(session.buffers().frame_count(), 0);
}

#[test]
#[serial]
fn allocation_respects_memory_limit() {
    let config = SimulatorConfig {
        memory_limit_bytes: FRAME_BYTES as u64 * 4,
        ..common::small_config()
    };
    let driver = DriverContext::init(Arc::new(SimulatedDcam::from_config(&config))).unwrap();
    let mut session = driver.open(0).unwrap();
    let err = session.buffers_mut().alloc(5).unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NoMemory));
    session.buffers_mut().alloc(4).unwrap();
}
