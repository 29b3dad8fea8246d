//! Native DCAM-API backend.
//!
//! Forwards every [`DcamApi`] method to the vendor library through the
//! bindgen declarations in `dcam-sys`. Each call zero-initialises the vendor
//! parameter struct, sets its `size` field and copies results back into the
//! crate's raw types. Status words are passed through untouched.

#![allow(unsafe_code)]

use super::{
    DcamApi, DcamStatus, DeviceHandle, RawCapability, RawFrame, RawPropAttr, RawTransferInfo,
    RawWaitStart, WaitToken,
};
use dcam_sys::*;
use std::ffi::c_void;
use std::mem;
use std::os::raw::c_char;

/// Frame-kind selector shared by the buffer and transfer calls.
const KIND_FRAME: i32 = 0;

/// Zero-initialised vendor struct with its `size` field set.
macro_rules! sized {
    ($ty:ty) => {{
        // SAFETY: vendor parameter structs are plain C data; all-zero is a
        // valid initial state.
        let mut value: $ty = unsafe { mem::zeroed() };
        value.size = mem::size_of::<$ty>() as i32;
        value
    }};
}

fn hdcam(handle: DeviceHandle) -> HDCAM {
    handle.as_raw() as HDCAM
}

fn hwait(wait: WaitToken) -> HDCAMWAIT {
    wait.as_raw() as HDCAMWAIT
}

fn text_len(text: &[u8]) -> i32 {
    i32::try_from(text.len()).unwrap_or(i32::MAX)
}

/// DCAM-API backed by the vendor shared library.
#[derive(Debug, Default)]
pub struct NativeDcam;

impl NativeDcam {
    /// Native backend. The library itself is initialised by `api_init`.
    pub fn new() -> Self {
        Self
    }
}

impl DcamApi for NativeDcam {
    fn api_init(&self, device_count: &mut i32) -> DcamStatus {
        let mut param = sized!(DCAMAPI_INIT);
        // SAFETY: param is a valid, sized DCAMAPI_INIT.
        let status = unsafe { dcamapi_init(&mut param) } as i32;
        *device_count = param.iDeviceCount;
        DcamStatus(status)
    }

    fn api_uninit(&self) -> DcamStatus {
        // SAFETY: no arguments; the vendor tolerates uninit after init only,
        // which the driver context guarantees.
        DcamStatus(unsafe { dcamapi_uninit() } as i32)
    }

    fn dev_open(&self, index: i32, handle: &mut DeviceHandle) -> DcamStatus {
        let mut param = sized!(DCAMDEV_OPEN);
        param.index = index;
        // SAFETY: param is a valid, sized DCAMDEV_OPEN.
        let status = unsafe { dcamdev_open(&mut param) } as i32;
        *handle = DeviceHandle::from_raw(param.hdcam as usize);
        DcamStatus(status)
    }

    fn dev_close(&self, handle: DeviceHandle) -> DcamStatus {
        // SAFETY: the handle came from dcamdev_open; the session layer never
        // closes a handle twice.
        DcamStatus(unsafe { dcamdev_close(hdcam(handle)) } as i32)
    }

    fn dev_get_capability(
        &self,
        handle: DeviceHandle,
        capability: &mut RawCapability,
    ) -> DcamStatus {
        let (domain, kind) = (capability.domain(), capability.kind());
        match capability {
            RawCapability::Region {
                capflag,
                horz_unit,
                vert_unit,
            } => {
                // SAFETY: plain C data, zero is valid.
                let mut param: DCAMDEV_CAPABILITY_REGION = unsafe { mem::zeroed() };
                param.hdr.size = mem::size_of::<DCAMDEV_CAPABILITY_REGION>() as i32;
                param.hdr.domain = domain;
                param.hdr.kind = kind;
                // SAFETY: the region struct starts with the capability header.
                let status = unsafe {
                    dcamdev_getcapability(hdcam(handle), &mut param.hdr as *mut DCAMDEV_CAPABILITY)
                } as i32;
                *capflag = param.hdr.capflag;
                *horz_unit = param.horzunit;
                *vert_unit = param.vertunit;
                DcamStatus(status)
            }
            RawCapability::Lut {
                capflag,
                linear_point_max,
            } => {
                // SAFETY: plain C data, zero is valid.
                let mut param: DCAMDEV_CAPABILITY_LUT = unsafe { mem::zeroed() };
                param.hdr.size = mem::size_of::<DCAMDEV_CAPABILITY_LUT>() as i32;
                param.hdr.domain = domain;
                param.hdr.kind = kind;
                // SAFETY: the LUT struct starts with the capability header.
                let status = unsafe {
                    dcamdev_getcapability(hdcam(handle), &mut param.hdr as *mut DCAMDEV_CAPABILITY)
                } as i32;
                *capflag = param.hdr.capflag;
                *linear_point_max = param.linearpointmax;
                DcamStatus(status)
            }
            RawCapability::FrameOption {
                capflag,
                support_proc,
            } => {
                // SAFETY: plain C data, zero is valid.
                let mut param: DCAMDEV_CAPABILITY_FRAMEOPTION = unsafe { mem::zeroed() };
                param.hdr.size = mem::size_of::<DCAMDEV_CAPABILITY_FRAMEOPTION>() as i32;
                param.hdr.domain = domain;
                param.hdr.kind = kind;
                // SAFETY: the frame-option struct starts with the capability header.
                let status = unsafe {
                    dcamdev_getcapability(hdcam(handle), &mut param.hdr as *mut DCAMDEV_CAPABILITY)
                } as i32;
                *capflag = param.hdr.capflag;
                *support_proc = param.supportproc;
                DcamStatus(status)
            }
        }
    }

    fn dev_get_string(
        &self,
        handle: Option<DeviceHandle>,
        string_id: i32,
        text: &mut [u8],
    ) -> DcamStatus {
        let mut param = sized!(DCAMDEV_STRING);
        param.iString = string_id;
        param.text = text.as_mut_ptr().cast::<c_char>();
        param.textbytes = text_len(text);
        let h = handle.map_or(std::ptr::null_mut(), hdcam);
        // SAFETY: text outlives the call and textbytes matches its length.
        DcamStatus(unsafe { dcamdev_getstring(h, &mut param) } as i32)
    }

    fn prop_get_attr(&self, handle: DeviceHandle, prop: i32, attr: &mut RawPropAttr) -> DcamStatus {
        // SAFETY: plain C data, zero is valid.
        let mut param: DCAMPROP_ATTR = unsafe { mem::zeroed() };
        param.cbSize = mem::size_of::<DCAMPROP_ATTR>() as i32;
        param.iProp = prop;
        // SAFETY: param is a valid, sized DCAMPROP_ATTR.
        let status = unsafe { dcamprop_getattr(hdcam(handle), &mut param) } as i32;
        *attr = RawPropAttr {
            attribute: param.attribute as u32,
            attribute2: param.attribute2 as u32,
            unit: param.iUnit,
            value_min: param.valuemin,
            value_max: param.valuemax,
            value_step: param.valuestep,
            value_default: param.valuedefault,
            number_of_element_prop: param.iProp_NumberOfElement,
            array_base_prop: param.iProp_ArrayBase,
            element_step: param.iPropStep_Element,
        };
        DcamStatus(status)
    }

    fn prop_get_value(&self, handle: DeviceHandle, prop: i32, value: &mut f64) -> DcamStatus {
        // SAFETY: value is a valid out pointer.
        DcamStatus(unsafe { dcamprop_getvalue(hdcam(handle), prop, value) } as i32)
    }

    fn prop_set_value(&self, handle: DeviceHandle, prop: i32, value: f64) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcamprop_setvalue(hdcam(handle), prop, value) } as i32)
    }

    fn prop_set_get_value(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: &mut f64,
        option: i32,
    ) -> DcamStatus {
        // SAFETY: value is a valid in/out pointer.
        DcamStatus(unsafe { dcamprop_setgetvalue(hdcam(handle), prop, value, option) } as i32)
    }

    fn prop_query_value(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: &mut f64,
        option: i32,
    ) -> DcamStatus {
        // SAFETY: value is a valid in/out pointer.
        DcamStatus(unsafe { dcamprop_queryvalue(hdcam(handle), prop, value, option) } as i32)
    }

    fn prop_get_next_id(&self, handle: DeviceHandle, prop: &mut i32, option: i32) -> DcamStatus {
        // SAFETY: prop is a valid in/out pointer.
        DcamStatus(unsafe { dcamprop_getnextid(hdcam(handle), prop, option) } as i32)
    }

    fn prop_get_name(&self, handle: DeviceHandle, prop: i32, text: &mut [u8]) -> DcamStatus {
        // SAFETY: text outlives the call and textbytes matches its length.
        DcamStatus(unsafe {
            dcamprop_getname(
                hdcam(handle),
                prop,
                text.as_mut_ptr().cast::<c_char>(),
                text_len(text),
            )
        } as i32)
    }

    fn prop_get_value_text(
        &self,
        handle: DeviceHandle,
        prop: i32,
        value: f64,
        text: &mut [u8],
    ) -> DcamStatus {
        // SAFETY: plain C data, zero is valid.
        let mut param: DCAMPROP_VALUETEXT = unsafe { mem::zeroed() };
        param.cbSize = mem::size_of::<DCAMPROP_VALUETEXT>() as i32;
        param.iProp = prop;
        param.value = value;
        param.text = text.as_mut_ptr().cast::<c_char>();
        param.textbytes = text_len(text);
        // SAFETY: text outlives the call and textbytes matches its length.
        DcamStatus(unsafe { dcamprop_getvaluetext(hdcam(handle), &mut param) } as i32)
    }

    fn buf_alloc(&self, handle: DeviceHandle, frame_count: i32) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcambuf_alloc(hdcam(handle), frame_count) } as i32)
    }

    unsafe fn buf_attach(&self, handle: DeviceHandle, frames: &[*mut u8]) -> DcamStatus {
        let mut addresses: Vec<*mut c_void> = frames.iter().map(|p| p.cast::<c_void>()).collect();
        let mut param = sized!(DCAMBUF_ATTACH);
        param.iKind = KIND_FRAME;
        param.buffer = addresses.as_mut_ptr();
        param.buffercount = i32::try_from(addresses.len()).unwrap_or(i32::MAX);
        // SAFETY: the vendor copies the address array during the call; the
        // frame memory itself is covered by this method's contract.
        let status = unsafe { dcambuf_attach(hdcam(handle), &param) } as i32;
        DcamStatus(status)
    }

    fn buf_release(&self, handle: DeviceHandle) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcambuf_release(hdcam(handle), KIND_FRAME) } as i32)
    }

    fn buf_lock_frame(&self, handle: DeviceHandle, frame: &mut RawFrame) -> DcamStatus {
        let mut param = sized!(DCAMBUF_FRAME);
        param.iKind = KIND_FRAME;
        param.iFrame = frame.frame_index;
        // SAFETY: param is a valid, sized DCAMBUF_FRAME.
        let status = unsafe { dcambuf_lockframe(hdcam(handle), &mut param) } as i32;
        frame.frame_index = param.iFrame;
        frame.buf = param.buf.cast::<u8>().cast_const();
        frame.rowbytes = param.rowbytes;
        frame.pixel_type = param.type_ as i32;
        frame.width = param.width;
        frame.height = param.height;
        frame.left = param.left;
        frame.top = param.top;
        frame.timestamp_sec = param.timestamp.sec as u32;
        frame.timestamp_usec = param.timestamp.microsec as i32;
        frame.framestamp = param.framestamp;
        DcamStatus(status)
    }

    fn cap_start(&self, handle: DeviceHandle, mode: i32) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcamcap_start(hdcam(handle), mode) } as i32)
    }

    fn cap_stop(&self, handle: DeviceHandle) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcamcap_stop(hdcam(handle)) } as i32)
    }

    fn cap_status(&self, handle: DeviceHandle, status: &mut i32) -> DcamStatus {
        // SAFETY: status is a valid out pointer.
        DcamStatus(unsafe { dcamcap_status(hdcam(handle), status) } as i32)
    }

    fn cap_transfer_info(&self, handle: DeviceHandle, info: &mut RawTransferInfo) -> DcamStatus {
        let mut param = sized!(DCAMCAP_TRANSFERINFO);
        param.iKind = KIND_FRAME;
        // SAFETY: param is a valid, sized DCAMCAP_TRANSFERINFO.
        let status = unsafe { dcamcap_transferinfo(hdcam(handle), &mut param) } as i32;
        info.newest_frame_index = param.nNewestFrameIndex;
        info.frame_count = param.nFrameCount;
        DcamStatus(status)
    }

    fn cap_fire_trigger(&self, handle: DeviceHandle) -> DcamStatus {
        // SAFETY: scalar arguments only.
        DcamStatus(unsafe { dcamcap_firetrigger(hdcam(handle), 0) } as i32)
    }

    fn wait_open(
        &self,
        handle: DeviceHandle,
        wait: &mut WaitToken,
        supported_events: &mut i32,
    ) -> DcamStatus {
        let mut param = sized!(DCAMWAIT_OPEN);
        param.hdcam = hdcam(handle);
        // SAFETY: param is a valid, sized DCAMWAIT_OPEN.
        let status = unsafe { dcamwait_open(&mut param) } as i32;
        *wait = WaitToken::from_raw(param.hwait as usize);
        *supported_events = param.supportevent;
        DcamStatus(status)
    }

    fn wait_start(&self, wait: WaitToken, start: &mut RawWaitStart) -> DcamStatus {
        let mut param = sized!(DCAMWAIT_START);
        param.eventmask = start.event_mask;
        param.timeout = start.timeout_ms;
        // SAFETY: param is a valid, sized DCAMWAIT_START; the vendor allows
        // dcamwait_abort from another thread while this call blocks.
        let status = unsafe { dcamwait_start(hwait(wait), &mut param) } as i32;
        start.event_happened = param.eventhappened;
        DcamStatus(status)
    }

    fn wait_abort(&self, wait: WaitToken) -> DcamStatus {
        // SAFETY: the wait handle came from dcamwait_open.
        DcamStatus(unsafe { dcamwait_abort(hwait(wait)) } as i32)
    }

    fn wait_close(&self, wait: WaitToken) -> DcamStatus {
        // SAFETY: the wait handle came from dcamwait_open and is not in use.
        DcamStatus(unsafe { dcamwait_close(hwait(wait)) } as i32)
    }
}
