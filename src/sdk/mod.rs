//! The DCAM-API subsystem boundary.
//!
//! [`DcamApi`] mirrors the vendor entry points one-to-one: every method takes
//! plain integers, handles and caller-owned structs, and returns the raw
//! status word the subsystem produced. Nothing in this module interprets a
//! status beyond [`DcamStatus::is_failure`]; translation into
//! [`DcamError`](crate::error::DcamError) is the job of
//! [`ErrorReporter`](crate::error::ErrorReporter).
//!
//! Two implementations exist:
//! - [`SimulatedDcam`](crate::mock::SimulatedDcam) (feature `mock`, default)
//! - [`NativeDcam`](native::NativeDcam) (feature `dcam_sdk`), which forwards to
//!   the vendor library through `dcam-sys`.

pub mod consts;
#[cfg(feature = "dcam_sdk")]
pub mod native;

use std::fmt;

/// Raw status word returned by a subsystem call.
///
/// Any value with the high bit set denotes failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DcamStatus(pub i32);

impl DcamStatus {
    /// The canonical success value.
    pub const SUCCESS: DcamStatus = DcamStatus(consts::err::SUCCESS);

    /// Raw status code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// True when the high bit of the status word is set.
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for DcamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Opaque device handle issued by `dcamdev_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceHandle(usize);

impl DeviceHandle {
    /// Wrap a raw handle value. Only subsystem implementations should need this.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Opaque wait-object handle issued by `dcamwait_open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WaitToken(usize);

impl WaitToken {
    /// Wrap a raw wait handle value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Raw wait handle value.
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Property attribute record (`DCAMPROP_ATTR`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawPropAttr {
    /// Flag word, see [`consts::attr`].
    pub attribute: u32,
    /// Second flag word (array flags).
    pub attribute2: u32,
    /// Unit code, see [`consts::unit`].
    pub unit: i32,
    /// Lower bound, valid with `HASRANGE`.
    pub value_min: f64,
    /// Upper bound, valid with `HASRANGE`.
    pub value_max: f64,
    /// Step, valid with `HASSTEP`.
    pub value_step: f64,
    /// Default, valid with `HASDEFAULT`.
    pub value_default: f64,
    /// Property id holding the element count of an array property.
    pub number_of_element_prop: i32,
    /// Base property id of an array element.
    pub array_base_prop: i32,
    /// Id stride between array elements.
    pub element_step: i32,
}

/// Frame lock record (`DCAMBUF_FRAME`).
///
/// `frame_index` is an input; everything else is filled by the subsystem.
/// `buf` points into memory owned by the subsystem or by the caller's
/// attached frames and is only valid until the next buffer operation.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame {
    /// Requested frame slot, or -1 for the newest.
    pub frame_index: i32,
    /// First byte of the frame.
    pub buf: *const u8,
    /// Bytes per row, including padding.
    pub rowbytes: i32,
    /// Pixel encoding, see [`consts::pixeltype`].
    pub pixel_type: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in rows.
    pub height: i32,
    /// Horizontal offset of the frame on the sensor.
    pub left: i32,
    /// Vertical offset of the frame on the sensor.
    pub top: i32,
    /// Seconds part of the capture timestamp.
    pub timestamp_sec: u32,
    /// Microseconds part of the capture timestamp.
    pub timestamp_usec: i32,
    /// Running frame counter within the capture.
    pub framestamp: i32,
}

impl RawFrame {
    /// A request for `frame_index` with all outputs cleared.
    pub const fn request(frame_index: i32) -> Self {
        Self {
            frame_index,
            buf: std::ptr::null(),
            rowbytes: 0,
            pixel_type: consts::pixeltype::NONE,
            width: 0,
            height: 0,
            left: 0,
            top: 0,
            timestamp_sec: 0,
            timestamp_usec: 0,
            framestamp: 0,
        }
    }
}

/// Transfer progress (`DCAMCAP_TRANSFERINFO`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawTransferInfo {
    /// Slot of the newest completed frame, -1 before the first.
    pub newest_frame_index: i32,
    /// Frames completed since capture start.
    pub frame_count: i32,
}

/// Capability record for `dcamdev_getcapability`.
///
/// The variant selects domain and kind; the payload fields are outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawCapability {
    /// `DCAMDEV_CAPABILITY_REGION`
    Region {
        /// Supported region type flags.
        capflag: i32,
        /// Horizontal granularity in pixels.
        horz_unit: i32,
        /// Vertical granularity in pixels.
        vert_unit: i32,
    },
    /// `DCAMDEV_CAPABILITY_LUT`
    Lut {
        /// Supported LUT type flags.
        capflag: i32,
        /// Maximum number of linear points.
        linear_point_max: i32,
    },
    /// `DCAMDEV_CAPABILITY_FRAMEOPTION`
    FrameOption {
        /// Capability flag word.
        capflag: i32,
        /// Supported processing types.
        support_proc: i32,
    },
}

impl RawCapability {
    /// Capability domain code.
    pub const fn domain(&self) -> i32 {
        match self {
            Self::Region { .. } | Self::Lut { .. } => consts::capability::DOMAIN_DCAMDATA,
            Self::FrameOption { .. } => consts::capability::DOMAIN_FRAMEOPTION,
        }
    }

    /// Capability kind code within the domain.
    pub const fn kind(&self) -> i32 {
        match self {
            Self::Region { .. } => consts::capability::KIND_REGION,
            Self::Lut { .. } => consts::capability::KIND_LUT,
            Self::FrameOption { .. } => consts::capability::KIND_NONE,
        }
    }

    /// Capability flag word.
    pub const fn capflag(&self) -> i32 {
        match self {
            Self::Region { capflag, .. }
            | Self::Lut { capflag, .. }
            | Self::FrameOption { capflag, .. } => *capflag,
        }
    }
}

/// Wait record (`DCAMWAIT_START`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawWaitStart {
    /// Events the caller is interested in.
    pub event_mask: i32,
    /// Upper bound on the wait in milliseconds.
    pub timeout_ms: i32,
    /// Event that released the wait, filled on success.
    pub event_happened: i32,
}

/// One-to-one view of the DCAM-API entry points.
///
/// Implementations must be thread-safe: `wait_abort` is called from a
/// different thread than the one blocked in `wait_start`.
pub trait DcamApi: Send + Sync {
    /// `dcamapi_init`
    fn api_init(&self, device_count: &mut i32) -> DcamStatus;
    /// `dcamapi_uninit`
    fn api_uninit(&self) -> DcamStatus;

    /// `dcamdev_open`
    fn dev_open(&self, index: i32, handle: &mut DeviceHandle) -> DcamStatus;
    /// `dcamdev_close`
    fn dev_close(&self, handle: DeviceHandle) -> DcamStatus;
    /// `dcamdev_getcapability`
    fn dev_get_capability(&self, handle: DeviceHandle, capability: &mut RawCapability)
        -> DcamStatus;
    /// `dcamdev_getstring`. `handle` may be absent for error texts and API strings.
    fn dev_get_string(
        &self,
        handle: Option<DeviceHandle>,
        string_id: i32,
        text: &mut [u8],
    ) -> DcamStatus;

    /// `dcamprop_getattr`
    fn prop_get_attr(&self, handle: DeviceHandle, prop: i32, attr: &mut RawPropAttr)
        -> DcamStatus;
    /// `dcamprop_getvalue`
    fn prop_get_value(&self, handle: DeviceHandle, prop: i32, value: &mut f64) -> DcamStatus;
    /// `dcamprop_setvalue`
    fn prop_set_value(&self, handle: DeviceHandle, prop: i32, value: f64) -> DcamStatus;
    /// `dcamprop_setgetvalue`
    fn prop_set_get_value(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: &mut f64,
        option: i32,
    ) -> DcamStatus;
    /// `dcamprop_queryvalue`
    fn prop_query_value(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: &mut f64,
        option: i32,
    ) -> DcamStatus;
    /// `dcamprop_getnextid`
    fn prop_get_next_id(&self, handle: DeviceHandle, prop: &mut i32, option: i32) -> DcamStatus;
    /// `dcamprop_getname`
    fn prop_get_name(&self, handle: DeviceHandle, prop: i32, text: &mut [u8]) -> DcamStatus;
    /// `dcamprop_getvaluetext`
    fn prop_get_value_text(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: f64,
        text: &mut [u8],
    ) -> DcamStatus;

    /// `dcambuf_alloc`
    fn buf_alloc(&self, handle: DeviceHandle, frame_count: i32) -> DcamStatus;
    /// `dcambuf_attach`
    ///
    /// # Safety
    ///
    /// Every address must point to at least `IMAGE_FRAMEBYTES` writable bytes
    /// that stay valid, and are not otherwise accessed, until `buf_release`
    /// succeeds or the device is closed.
    unsafe fn buf_attach(&self, handle: DeviceHandle, frames: &[*mut u8]) -> DcamStatus;
    /// `dcambuf_release`
    fn buf_release(&self, handle: DeviceHandle) -> DcamStatus;
    /// `dcambuf_lockframe`
    fn buf_lock_frame(&self, handle: DeviceHandle, frame: &mut RawFrame) -> DcamStatus;

    /// `dcamcap_start`
    fn cap_start(&self, handle: DeviceHandle, mode: i32) -> DcamStatus;
    /// `dcamcap_stop`
    fn cap_stop(&self, handle: DeviceHandle) -> DcamStatus;
    /// `dcamcap_status`
    fn cap_status(&self, handle: DeviceHandle, status: &mut i32) -> DcamStatus;
    /// `dcamcap_transferinfo`
    fn cap_transfer_info(&self, handle: DeviceHandle, info: &mut RawTransferInfo) -> DcamStatus;
    /// `dcamcap_firetrigger`
    fn cap_fire_trigger(&self, handle: DeviceHandle) -> DcamStatus;

    /// `dcamwait_open`
    fn wait_open(
        &self,
        handle: DeviceHandle,
        wait: &mut WaitToken,
        supported_events: &mut i32,
    ) -> DcamStatus;
    /// `dcamwait_start`
    fn wait_start(&self, wait: WaitToken, start: &mut RawWaitStart) -> DcamStatus;
    /// `dcamwait_abort`
    fn wait_abort(&self, wait: WaitToken) -> DcamStatus;
    /// `dcamwait_close`
    fn wait_close(&self, wait: WaitToken) -> DcamStatus;
}

/// Decode a NUL-terminated text buffer filled by the subsystem.
///
/// Stops at the first NUL (or the end of the buffer) and replaces invalid
/// UTF-8 instead of failing.
pub fn decode_text(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Copy `text` into a caller buffer, truncating and NUL-terminating it.
///
/// Used by subsystem implementations that produce strings in Rust.
pub fn encode_text(text: &str, buf: &mut [u8]) {
    let Some(room) = buf.len().checked_sub(1) else {
        return;
    };
    let n = text.len().min(room);
    buf[..n].copy_from_slice(&text.as_bytes()[..n]);
    buf[n] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_failure_bit() {
        assert!(!DcamStatus::SUCCESS.is_failure());
        assert!(!DcamStatus(consts::err::NONE).is_failure());
        assert!(DcamStatus(consts::err::BUSY).is_failure());
        assert_eq!(DcamStatus(consts::err::TIMEOUT).to_string(), "0x80000106");
    }

    #[test]
    fn test_decode_text_stops_at_nul() {
        assert_eq!(decode_text(b"EXPOSURE TIME\0garbage"), "EXPOSURE TIME");
        assert_eq!(decode_text(b"no terminator"), "no terminator");
        assert_eq!(decode_text(b"\0"), "");
        assert_eq!(decode_text(&[0x41, 0xFF, 0x42, 0]), "A\u{FFFD}B");
    }

    #[test]
    fn test_encode_text_truncates() {
        let mut buf = [0xAAu8; 4];
        encode_text("EXPOSURE", &mut buf);
        assert_eq!(&buf, b"EXP\0");

        let mut empty: [u8; 0] = [];
        encode_text("x", &mut empty);
    }

    #[test]
    fn test_capability_domain_and_kind() {
        let region = RawCapability::Region {
            capflag: 2,
            horz_unit: 4,
            vert_unit: 4,
        };
        assert_eq!(region.domain(), consts::capability::DOMAIN_DCAMDATA);
        assert_eq!(region.kind(), consts::capability::KIND_REGION);
        assert_eq!(region.capflag(), 2);
    }
}
