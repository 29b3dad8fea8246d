//! In-process simulated DCAM subsystem.
//!
//! [`SimulatedDcam`] implements [`DcamApi`] against an in-memory camera
//! model so the driver core can be exercised without hardware. It follows
//! the vendor contracts closely enough that the same code paths run against
//! both the simulator and the native library:
//!
//! - frames arrive on a wall-clock schedule (`exposure + readout` per frame)
//!   and are produced lazily whenever a call observes the device,
//! - wait objects latch capture events until a matching wait consumes them,
//!   and `wait_abort` wakes a blocked waiter from any thread,
//! - property writes honour access flags, ranges and Mode value lists,
//! - [`SimulatedDcam::fail_next`] injects a vendor error into the next call
//!   of a chosen operation.
//!
//! Frame content is a deterministic ramp, see [`SimulatedDcam::pixel_value`].

#![allow(unsafe_code)]

use crate::config::SimulatorConfig;
use crate::error::ErrorKind;
use crate::sdk::consts::{
    attr, capability, capevent, capstart, capstatus, err, idstr, mode, option, pixeltype, prop,
    unit,
};
use crate::sdk::{
    encode_text, DcamApi, DcamStatus, DeviceHandle, RawCapability, RawFrame, RawPropAttr,
    RawTransferInfo, RawWaitStart, WaitToken,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const ALL_EVENTS: i32 = capevent::TRANSFERRED
    | capevent::FRAMEREADY
    | capevent::CYCLEEND
    | capevent::EXPOSUREEND
    | capevent::STOPPED;

/// Readout time per sensor row, in seconds.
const ROW_READOUT_S: f64 = 1e-5;

const TRIGGER_SOURCES: &[(f64, &str)] = &[
    (mode::TRIGGERSOURCE_INTERNAL, "INTERNAL"),
    (mode::TRIGGERSOURCE_EXTERNAL, "EXTERNAL"),
    (mode::TRIGGERSOURCE_SOFTWARE, "SOFTWARE"),
    (mode::TRIGGERSOURCE_MASTERPULSE, "MASTER PULSE"),
];
const TRIGGER_MODES: &[(f64, &str)] = &[
    (mode::TRIGGER_MODE_NORMAL, "NORMAL"),
    (mode::TRIGGER_MODE_START, "START"),
];
const OUTPUT_TRIGGER_SOURCES: &[(f64, &str)] = &[
    (mode::OUTPUTTRIGGER_SOURCE_EXPOSURE, "EXPOSURE"),
    (mode::OUTPUTTRIGGER_SOURCE_READOUTEND, "READOUT END"),
    (mode::OUTPUTTRIGGER_SOURCE_VSYNC, "VSYNC"),
    (mode::OUTPUTTRIGGER_SOURCE_TRIGGER, "TRIGGER"),
];
const BINNINGS: &[(f64, &str)] = &[(1.0, "1X1"), (2.0, "2X2"), (4.0, "4X4")];
const OFF_ON: &[(f64, &str)] = &[(mode::OFF, "OFF"), (mode::ON, "ON")];
const PIXEL_TYPES: &[(f64, &str)] = &[
    (pixeltype::MONO8 as f64, "MONO8"),
    (pixeltype::MONO16 as f64, "MONO16"),
    (pixeltype::RGB24 as f64, "RGB24"),
];
const HOT_PIXEL_LEVELS: &[(f64, &str)] = &[(1.0, "STANDARD"), (2.0, "MINIMUM"), (3.0, "AGGRESSIVE")];

/// Simulated DCAM-API.
pub struct SimulatedDcam {
    config: SimulatorConfig,
    state: Mutex<SimState>,
    events: Condvar,
    faults: Mutex<Vec<(&'static str, i32)>>,
}

impl Default for SimulatedDcam {
    fn default() -> Self {
        Self::from_config(&SimulatorConfig::default())
    }
}

impl std::fmt::Debug for SimulatedDcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDcam")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SimulatedDcam {
    /// Simulator with default parameters (one 2048x2048 camera).
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulator built from configuration.
    pub fn from_config(config: &SimulatorConfig) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(SimState::default()),
            events: Condvar::new(),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Parameters this simulator was built with.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Mono16 value at `(x, y)` of the frame with framestamp `frame`.
    ///
    /// Mono8 frames carry the low byte of the same ramp before the offset,
    /// i.e. `(x + y + frame) % 256`.
    pub fn pixel_value(x: u32, y: u32, frame: u32) -> u16 {
        let ramp = (u64::from(x) + u64::from(y) + u64::from(frame)) % 4096;
        (ramp + 100) as u16
    }

    /// Make the next call of `operation` fail with vendor `code`.
    ///
    /// `operation` names a [`DcamApi`] method. Injection is honoured by
    /// `buf_release`, `cap_stop`, `prop_query_value` and `wait_close`.
    /// Faults queue up and each fires once.
    pub fn fail_next(&self, operation: &'static str, code: i32) {
        tracing::debug!(operation, code, "Fault injected");
        self.faults.lock().push((operation, code));
    }

    fn injected(&self, operation: &str) -> Option<DcamStatus> {
        let mut faults = self.faults.lock();
        let at = faults.iter().position(|(op, _)| *op == operation)?;
        Some(status(faults.remove(at).1))
    }

    fn advance_and_notify(&self, state: &mut SimState, handle: usize) {
        if state.advance(handle, Instant::now()) {
            self.events.notify_all();
        }
    }
}

fn status(code: i32) -> DcamStatus {
    DcamStatus(code)
}

fn ok() -> DcamStatus {
    DcamStatus::SUCCESS
}

#[derive(Default)]
struct SimState {
    initialized: bool,
    next_handle: usize,
    devices: HashMap<usize, SimDevice>,
    waits: HashMap<usize, SimWait>,
}

impl SimState {
    fn issue_handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    /// Deliver every frame due at `now` and latch the resulting events.
    /// Returns true if any event was raised.
    fn advance(&mut self, handle: usize, now: Instant) -> bool {
        let Some(device) = self.devices.get_mut(&handle) else {
            return false;
        };
        let raised = device.deliver_due(now);
        self.raise(handle, raised)
    }

    fn raise(&mut self, handle: usize, events: i32) -> bool {
        if events == 0 {
            return false;
        }
        for wait in self.waits.values_mut().filter(|w| w.device == handle) {
            wait.latched |= events;
        }
        true
    }

    fn clear_latched(&mut self, handle: usize) {
        for wait in self.waits.values_mut().filter(|w| w.device == handle) {
            wait.latched = 0;
        }
    }
}

struct SimWait {
    device: usize,
    latched: i32,
    waiting: bool,
    aborted: bool,
}

#[derive(Clone)]
struct SimProperty {
    name: &'static str,
    attr: RawPropAttr,
    value: f64,
    texts: &'static [(f64, &'static str)],
}

impl SimProperty {
    fn kind(&self) -> u32 {
        self.attr.attribute & attr::TYPE_MASK
    }

    fn has(&self, flag: u32) -> bool {
        self.attr.attribute & flag != 0
    }

    fn in_range(&self, value: f64) -> bool {
        !self.has(attr::HASRANGE) || (self.attr.value_min..=self.attr.value_max).contains(&value)
    }

    fn text_for(&self, value: f64) -> Option<&'static str> {
        self.texts
            .iter()
            .find(|(v, _)| (*v - value).abs() < f64::EPSILON)
            .map(|(_, text)| *text)
    }

    fn next_value(&self, value: f64) -> Option<f64> {
        match self.kind() {
            attr::TYPE_MODE => self.texts.iter().map(|(v, _)| *v).find(|v| *v > value),
            _ if self.has(attr::HASSTEP) && self.attr.value_step > 0.0 => {
                let next = value + self.attr.value_step;
                self.in_range(next).then_some(next)
            }
            _ => None,
        }
    }

    fn prior_value(&self, value: f64) -> Option<f64> {
        match self.kind() {
            attr::TYPE_MODE => self.texts.iter().rev().map(|(v, _)| *v).find(|v| *v < value),
            _ if self.has(attr::HASSTEP) && self.attr.value_step > 0.0 => {
                let prior = value - self.attr.value_step;
                self.in_range(prior).then_some(prior)
            }
            _ => None,
        }
    }

    /// Validate and normalize a value for storage.
    fn accept(&self, value: f64) -> Result<f64, i32> {
        if !value.is_finite() {
            return Err(err::INVALIDVALUE);
        }
        if !self.in_range(value) {
            return Err(err::OUTOFRANGE);
        }
        match self.kind() {
            attr::TYPE_MODE => self.text_for(value).map(|_| value).ok_or(err::INVALIDVALUE),
            attr::TYPE_LONG => {
                let step = if self.has(attr::HASSTEP) && self.attr.value_step > 0.0 {
                    self.attr.value_step
                } else {
                    1.0
                };
                let base = self.attr.value_min;
                Ok(base + ((value - base) / step).round() * step)
            }
            _ => Ok(value),
        }
    }
}

fn mode_prop(
    name: &'static str,
    value: f64,
    texts: &'static [(f64, &'static str)],
    flags: u32,
) -> SimProperty {
    let min = texts.first().map_or(0.0, |(v, _)| *v);
    let max = texts.last().map_or(0.0, |(v, _)| *v);
    SimProperty {
        name,
        attr: RawPropAttr {
            attribute: attr::TYPE_MODE
                | attr::READABLE
                | attr::HASRANGE
                | attr::HASDEFAULT
                | attr::HASVALUETEXT
                | flags,
            value_min: min,
            value_max: max,
            value_default: value,
            ..Default::default()
        },
        value,
        texts,
    }
}

fn long_prop(name: &'static str, value: f64, range: (f64, f64), step: f64, flags: u32) -> SimProperty {
    SimProperty {
        name,
        attr: RawPropAttr {
            attribute: attr::TYPE_LONG
                | attr::READABLE
                | attr::HASRANGE
                | attr::HASSTEP
                | attr::HASDEFAULT
                | flags,
            value_min: range.0,
            value_max: range.1,
            value_step: step,
            value_default: value,
            ..Default::default()
        },
        value,
        texts: &[],
    }
}

fn real_prop(name: &'static str, value: f64, range: (f64, f64), unit: i32, flags: u32) -> SimProperty {
    SimProperty {
        name,
        attr: RawPropAttr {
            attribute: attr::TYPE_REAL | attr::READABLE | attr::HASRANGE | flags,
            unit,
            value_min: range.0,
            value_max: range.1,
            value_default: value,
            ..Default::default()
        },
        value,
        texts: &[],
    }
}

fn property_table(config: &SimulatorConfig) -> BTreeMap<i32, SimProperty> {
    let rw = attr::WRITABLE | attr::ACCESSREADY;
    let w = f64::from(config.sensor_width);
    let h = f64::from(config.sensor_height);

    let mut output_source = mode_prop(
        "OUTPUT TRIGGER SOURCE",
        mode::OUTPUTTRIGGER_SOURCE_EXPOSURE,
        OUTPUT_TRIGGER_SOURCES,
        rw,
    );
    output_source.attr.attribute2 = attr::ARRAYBASE;
    output_source.attr.number_of_element_prop = prop::NUMBEROF_OUTPUTTRIGGERCONNECTOR;

    let mut exposure = real_prop(
        "EXPOSURE TIME",
        config.exposure_s,
        (1e-3, 10.0),
        unit::SECOND,
        rw | attr::ACCESSBUSY | attr::HASDEFAULT,
    );
    exposure.attr.attribute |= attr::AUTOROUNDING;

    let mut temperature = real_prop(
        "SENSOR TEMPERATURE",
        -10.0,
        (-50.0, 50.0),
        unit::CELSIUS,
        attr::VOLATILE,
    );
    temperature.attr.attribute |= attr::ACCESSBUSY;

    let derived = |name| long_prop(name, 0.0, (0.0, f64::from(i32::MAX)), 1.0, attr::VOLATILE);

    BTreeMap::from([
        (
            prop::NUMBEROF_OUTPUTTRIGGERCONNECTOR,
            long_prop("NUMBER OF OUTPUT TRIGGER CONNECTOR", 1.0, (1.0, 1.0), 1.0, 0),
        ),
        (prop::OUTPUTTRIGGER_SOURCE, output_source),
        (
            prop::TRIGGERSOURCE,
            mode_prop("TRIGGER SOURCE", mode::TRIGGERSOURCE_INTERNAL, TRIGGER_SOURCES, rw),
        ),
        (
            prop::TRIGGER_MODE,
            mode_prop("TRIGGER MODE", mode::TRIGGER_MODE_NORMAL, TRIGGER_MODES, rw),
        ),
        (prop::EXPOSURETIME, exposure),
        (prop::SENSORTEMPERATURE, temperature),
        (prop::READOUTSPEED, long_prop("READOUT SPEED", 2.0, (1.0, 2.0), 1.0, rw)),
        (prop::BINNING, mode_prop("BINNING", 1.0, BINNINGS, rw)),
        (
            prop::SUBARRAYHPOS,
            long_prop("SUBARRAY HPOS", 0.0, (0.0, w - 4.0), 4.0, rw),
        ),
        (
            prop::SUBARRAYHSIZE,
            long_prop("SUBARRAY HSIZE", w, (4.0, w), 4.0, rw),
        ),
        (
            prop::SUBARRAYVPOS,
            long_prop("SUBARRAY VPOS", 0.0, (0.0, h - 4.0), 4.0, rw),
        ),
        (
            prop::SUBARRAYVSIZE,
            long_prop("SUBARRAY VSIZE", h, (4.0, h), 4.0, rw),
        ),
        (prop::SUBARRAYMODE, mode_prop("SUBARRAY MODE", mode::OFF, OFF_ON, rw)),
        (
            prop::TIMING_READOUTTIME,
            real_prop("TIMING READOUT TIME", 0.0, (0.0, 10.0), unit::SECOND, attr::VOLATILE),
        ),
        (prop::IMAGE_WIDTH, derived("IMAGE WIDTH")),
        (prop::IMAGE_HEIGHT, derived("IMAGE HEIGHT")),
        (prop::IMAGE_ROWBYTES, derived("IMAGE ROWBYTES")),
        (prop::IMAGE_FRAMEBYTES, derived("IMAGE FRAMEBYTES")),
        (
            prop::IMAGE_PIXELTYPE,
            mode_prop("IMAGE PIXEL TYPE", pixeltype::MONO16 as f64, PIXEL_TYPES, rw),
        ),
        (
            prop::BITSPERCHANNEL,
            long_prop("BIT PER CHANNEL", 16.0, (8.0, 16.0), 8.0, attr::VOLATILE),
        ),
        (
            prop::DEFECTCORRECT_MODE,
            mode_prop("DEFECT CORRECT MODE", mode::ON, OFF_ON, rw),
        ),
        (
            prop::HOTPIXELCORRECT_LEVEL,
            mode_prop("HOT PIXEL CORRECT LEVEL", 1.0, HOT_PIXEL_LEVELS, rw),
        ),
    ])
}

fn affects_geometry(id: i32) -> bool {
    matches!(
        id,
        prop::BINNING
            | prop::SUBARRAYHPOS
            | prop::SUBARRAYHSIZE
            | prop::SUBARRAYVPOS
            | prop::SUBARRAYVSIZE
            | prop::SUBARRAYMODE
            | prop::IMAGE_PIXELTYPE
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    sensor_rows: u32,
    pixel_type: i32,
    bytes_per_pixel: usize,
}

impl Geometry {
    fn rowbytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    fn frame_bytes(&self) -> usize {
        self.rowbytes() * self.height as usize
    }

    fn fill(&self, dst: &mut [u8], frame: u32) {
        let rowbytes = self.rowbytes();
        for (y, row) in dst.chunks_exact_mut(rowbytes).take(self.height as usize).enumerate() {
            for (x, px) in row.chunks_exact_mut(self.bytes_per_pixel).enumerate() {
                let value = SimulatedDcam::pixel_value(x as u32, y as u32, frame);
                match self.pixel_type {
                    pixeltype::MONO16 => px.copy_from_slice(&value.to_le_bytes()),
                    _ => px.fill(((value - 100) % 256) as u8),
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
struct FrameStamp {
    framestamp: i32,
    timestamp: Duration,
}

enum FrameStorage {
    Internal(Vec<Box<[u8]>>),
    /// Caller-owned frame addresses.
    Attached(Vec<usize>),
}

struct SimBuffers {
    geometry: Geometry,
    storage: FrameStorage,
    stamps: Vec<Option<FrameStamp>>,
}

impl SimBuffers {
    fn len(&self) -> usize {
        self.stamps.len()
    }

    fn slot_ptr(&mut self, slot: usize) -> *mut u8 {
        match &mut self.storage {
            FrameStorage::Internal(frames) => frames[slot].as_mut_ptr(),
            FrameStorage::Attached(addresses) => addresses[slot] as *mut u8,
        }
    }

    fn write(&mut self, slot: usize, framestamp: u32) {
        let geometry = self.geometry;
        let len = geometry.frame_bytes();
        let ptr = self.slot_ptr(slot);
        // SAFETY: internal frames are `len` bytes long; attached frames were
        // validated by the caller of `buf_attach` to hold at least `len`
        // bytes and stay valid until release.
        let dst = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
        geometry.fill(dst, framestamp);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.stamps[slot] = Some(FrameStamp {
            framestamp: framestamp as i32,
            timestamp,
        });
    }
}

#[derive(Default)]
struct SimCapture {
    busy: bool,
    mode: i32,
    period: Duration,
    next_arrival: Option<Instant>,
    triggered: VecDeque<Instant>,
    frames: u32,
    newest: i32,
}

struct SimDevice {
    index: i32,
    sensor: (u32, u32),
    props: BTreeMap<i32, SimProperty>,
    buffers: Option<SimBuffers>,
    capture: SimCapture,
}

impl SimDevice {
    fn new(index: i32, config: &SimulatorConfig) -> Self {
        Self {
            index,
            sensor: (config.sensor_width, config.sensor_height),
            props: property_table(config),
            buffers: None,
            capture: SimCapture {
                newest: -1,
                ..Default::default()
            },
        }
    }

    fn raw(&self, id: i32) -> f64 {
        self.props.get(&id).map_or(0.0, |p| p.value)
    }

    fn geometry(&self) -> Geometry {
        let binning = (self.raw(prop::BINNING) as u32).max(1);
        let (sw, sh) = self.sensor;
        let (left, top, w, h) = if self.raw(prop::SUBARRAYMODE) == mode::ON {
            let left = (self.raw(prop::SUBARRAYHPOS) as u32).min(sw.saturating_sub(4));
            let top = (self.raw(prop::SUBARRAYVPOS) as u32).min(sh.saturating_sub(4));
            let w = (self.raw(prop::SUBARRAYHSIZE) as u32).min(sw - left);
            let h = (self.raw(prop::SUBARRAYVSIZE) as u32).min(sh - top);
            (left, top, w, h)
        } else {
            (0, 0, sw, sh)
        };
        let pixel_type = self.raw(prop::IMAGE_PIXELTYPE) as i32;
        let bytes_per_pixel = match pixel_type {
            pixeltype::MONO8 => 1,
            pixeltype::RGB24 => 3,
            _ => 2,
        };
        Geometry {
            left,
            top,
            width: (w / binning).max(1),
            height: (h / binning).max(1),
            sensor_rows: h,
            pixel_type,
            bytes_per_pixel,
        }
    }

    fn value(&self, id: i32) -> Option<f64> {
        let geometry = self.geometry();
        let derived = match id {
            prop::IMAGE_WIDTH => f64::from(geometry.width),
            prop::IMAGE_HEIGHT => f64::from(geometry.height),
            prop::IMAGE_ROWBYTES => geometry.rowbytes() as f64,
            prop::IMAGE_FRAMEBYTES => geometry.frame_bytes() as f64,
            prop::BITSPERCHANNEL => 8.0 * geometry.bytes_per_pixel.min(2) as f64,
            prop::TIMING_READOUTTIME => f64::from(geometry.sensor_rows) * ROW_READOUT_S,
            _ => return self.props.get(&id).map(|p| p.value),
        };
        Some(derived)
    }

    fn set(&mut self, id: i32, value: f64) -> Result<(), i32> {
        let busy = self.capture.busy;
        let has_buffers = self.buffers.is_some();
        let property = self.props.get_mut(&id).ok_or(err::INVALIDPROPERTYID)?;
        if !property.has(attr::WRITABLE) {
            return Err(err::NOTWRITABLE);
        }
        if busy && !property.has(attr::ACCESSBUSY) {
            return Err(err::BUSY);
        }
        if has_buffers && affects_geometry(id) {
            return Err(err::ACCESSDENY);
        }
        property.value = property.accept(value)?;
        Ok(())
    }

    fn period(&self) -> Duration {
        let exposure = self.raw(prop::EXPOSURETIME).max(1e-3);
        let readout = f64::from(self.geometry().sensor_rows) * ROW_READOUT_S;
        Duration::from_secs_f64(exposure + readout)
    }

    fn status(&self) -> i32 {
        if self.capture.busy {
            capstatus::BUSY
        } else if self.buffers.is_some() {
            capstatus::READY
        } else {
            capstatus::STABLE
        }
    }

    fn next_event_time(&self) -> Option<Instant> {
        if !self.capture.busy {
            return None;
        }
        match (self.capture.next_arrival, self.capture.triggered.front()) {
            (Some(a), Some(b)) => Some(a.min(*b)),
            (a, b) => a.or(b.copied()),
        }
    }

    fn deliver_due(&mut self, now: Instant) -> i32 {
        let mut events = 0;
        while let Some(at) = self.next_event_time().filter(|t| *t <= now) {
            events |= self.deliver_frame(at);
        }
        events
    }

    fn deliver_frame(&mut self, at: Instant) -> i32 {
        let capture = &mut self.capture;
        if capture.triggered.front() == Some(&at) {
            capture.triggered.pop_front();
        } else {
            capture.next_arrival = Some(at + capture.period);
        }
        let Some(buffers) = self.buffers.as_mut() else {
            capture.busy = false;
            return capevent::STOPPED;
        };

        let slots = buffers.len();
        let slot = capture.frames as usize % slots;
        buffers.write(slot, capture.frames);
        capture.frames += 1;
        capture.newest = slot as i32;

        let mut events = capevent::EXPOSUREEND | capevent::FRAMEREADY | capevent::TRANSFERRED;
        if capture.frames as usize % slots == 0 {
            events |= capevent::CYCLEEND;
            if capture.mode == capstart::SNAP {
                capture.busy = false;
                capture.next_arrival = None;
                capture.triggered.clear();
                events |= capevent::STOPPED;
            }
        }
        events
    }
}

impl DcamApi for SimulatedDcam {
    fn api_init(&self, device_count: &mut i32) -> DcamStatus {
        let mut state = self.state.lock();
        state.initialized = true;
        *device_count = self.config.devices as i32;
        ok()
    }

    fn api_uninit(&self) -> DcamStatus {
        let mut state = self.state.lock();
        state.initialized = false;
        state.devices.clear();
        state.waits.clear();
        self.events.notify_all();
        ok()
    }

    fn dev_open(&self, index: i32, handle: &mut DeviceHandle) -> DcamStatus {
        let mut state = self.state.lock();
        if !state.initialized {
            return status(err::NODRIVER);
        }
        if index < 0 || index >= self.config.devices as i32 {
            return status(err::NOCAMERA);
        }
        let raw = state.issue_handle();
        state.devices.insert(raw, SimDevice::new(index, &self.config));
        *handle = DeviceHandle::from_raw(raw);
        ok()
    }

    fn dev_close(&self, handle: DeviceHandle) -> DcamStatus {
        let mut state = self.state.lock();
        if state.devices.remove(&handle.as_raw()).is_none() {
            return status(err::INVALIDHANDLE);
        }
        state.waits.retain(|_, w| w.device != handle.as_raw());
        self.events.notify_all();
        ok()
    }

    fn dev_get_capability(
        &self,
        handle: DeviceHandle,
        cap: &mut RawCapability,
    ) -> DcamStatus {
        let state = self.state.lock();
        if !state.devices.contains_key(&handle.as_raw()) {
            return status(err::INVALIDHANDLE);
        }
        match cap {
            RawCapability::Region {
                capflag,
                horz_unit,
                vert_unit,
            } => {
                *capflag = capability::REGIONTYPE_RECT16ARRAY;
                *horz_unit = 4;
                *vert_unit = 4;
                ok()
            }
            RawCapability::Lut { .. } => status(err::NOTSUPPORT),
            RawCapability::FrameOption {
                capflag,
                support_proc,
            } => {
                // unused for frame options
                *capflag = 0;
                *support_proc = capability::PROCTYPE_HDR;
                ok()
            }
        }
    }

    fn dev_get_string(
        &self,
        handle: Option<DeviceHandle>,
        string_id: i32,
        text: &mut [u8],
    ) -> DcamStatus {
        let state = self.state.lock();

        // error codes double as string ids
        if DcamStatus(string_id).is_failure() {
            return match ErrorKind::from_code(string_id) {
                ErrorKind::Unknown(_) => status(err::INVALIDPARAM),
                kind => {
                    encode_text(kind.description(), text);
                    ok()
                }
            };
        }
        if !state.initialized {
            return status(err::NODRIVER);
        }
        if string_id == idstr::DCAMAPIVERSION {
            encode_text("4.00", text);
            return ok();
        }

        let Some(device) = handle.and_then(|h| state.devices.get(&h.as_raw())) else {
            return status(err::INVALIDHANDLE);
        };
        let value = match string_id {
            idstr::BUS => self.config.bus.clone(),
            idstr::CAMERAID => format!("S/N: {:06}", device.index + 1),
            idstr::VENDOR => self.config.vendor.clone(),
            idstr::MODEL => self.config.model.clone(),
            idstr::CAMERAVERSION => "1.00.A".to_string(),
            idstr::DRIVERVERSION => "sim-0.1".to_string(),
            idstr::MODULEVERSION => return status(err::NOTSUPPORT),
            _ => return status(err::INVALIDPARAM),
        };
        encode_text(&value, text);
        ok()
    }

    fn prop_get_attr(&self, handle: DeviceHandle, id: i32, out: &mut RawPropAttr) -> DcamStatus {
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        match device.props.get(&id) {
            Some(property) => {
                *out = property.attr;
                ok()
            }
            None => status(err::INVALIDPROPERTYID),
        }
    }

    fn prop_get_value(&self, handle: DeviceHandle, id: i32, value: &mut f64) -> DcamStatus {
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        match device.value(id) {
            Some(v) => {
                *value = v;
                ok()
            }
            None => status(err::INVALIDPROPERTYID),
        }
    }

    fn prop_set_value(&self, handle: DeviceHandle, id: i32, value: f64) -> DcamStatus {
        let mut state = self.state.lock();
        self.advance_and_notify(&mut state, handle.as_raw());
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        match device.set(id, value) {
            Ok(()) => ok(),
            Err(code) => status(code),
        }
    }

    fn prop_set_get_value(
        &self,
        handle: DeviceHandle,
        id: i32,
        value: &mut f64,
        opt: i32,
    ) -> DcamStatus {
        let mut state = self.state.lock();
        self.advance_and_notify(&mut state, handle.as_raw());
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        let mut requested = *value;
        if opt == option::NEAREST {
            if let Some(p) = device.props.get(&id).filter(|p| p.has(attr::HASRANGE)) {
                requested = requested.clamp(p.attr.value_min, p.attr.value_max);
            }
        }
        if let Err(code) = device.set(id, requested) {
            return status(code);
        }
        *value = device.value(id).unwrap_or(requested);
        ok()
    }

    fn prop_query_value(
        &self,
        handle: DeviceHandle,
        id: i32,
        value: &mut f64,
        opt: i32,
    ) -> DcamStatus {
        if let Some(fault) = self.injected("prop_query_value") {
            return fault;
        }
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        let Some(property) = device.props.get(&id) else {
            return status(err::INVALIDPROPERTYID);
        };
        let result = match opt {
            option::NEXT => property.next_value(*value),
            option::PRIOR => property.prior_value(*value),
            _ => property.accept(*value).ok(),
        };
        match result {
            Some(v) => {
                *value = v;
                ok()
            }
            None => status(err::OUTOFRANGE),
        }
    }

    fn prop_get_next_id(&self, handle: DeviceHandle, id: &mut i32, _opt: i32) -> DcamStatus {
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        let start = id.saturating_add(1);
        match device.props.range(start..).next() {
            Some((next, _)) => {
                *id = *next;
                ok()
            }
            None => status(err::NOPROPERTY),
        }
    }

    fn prop_get_name(&self, handle: DeviceHandle, id: i32, text: &mut [u8]) -> DcamStatus {
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        match device.props.get(&id) {
            Some(property) => {
                encode_text(property.name, text);
                ok()
            }
            None => status(err::INVALIDPROPERTYID),
        }
    }

    fn prop_get_value_text(
        &self,
        handle: DeviceHandle,
        id: i32,
        value: f64,
        text: &mut [u8],
    ) -> DcamStatus {
        let state = self.state.lock();
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        let Some(property) = device.props.get(&id) else {
            return status(err::INVALIDPROPERTYID);
        };
        if property.kind() != attr::TYPE_MODE {
            return status(err::NOVALUETEXT);
        }
        match property.text_for(value) {
            Some(label) => {
                encode_text(label, text);
                ok()
            }
            None => status(err::INVALIDVALUE),
        }
    }

    fn buf_alloc(&self, handle: DeviceHandle, frame_count: i32) -> DcamStatus {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        if frame_count < 1 {
            return status(err::INVALIDPARAM);
        }
        if device.capture.busy || device.buffers.is_some() {
            return status(err::BUSY);
        }
        let geometry = device.geometry();
        let frame_bytes = geometry.frame_bytes();
        let total = frame_bytes as u64 * frame_count as u64;
        if total > self.config.memory_limit_bytes {
            return status(err::NOMEMORY);
        }
        let frames = (0..frame_count)
            .map(|_| vec![0u8; frame_bytes].into_boxed_slice())
            .collect();
        device.buffers = Some(SimBuffers {
            geometry,
            storage: FrameStorage::Internal(frames),
            stamps: vec![None; frame_count as usize],
        });
        ok()
    }

    unsafe fn buf_attach(&self, handle: DeviceHandle, frames: &[*mut u8]) -> DcamStatus {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        if frames.is_empty() || frames.iter().any(|p| p.is_null()) {
            return status(err::INVALIDPARAM);
        }
        if device.capture.busy || device.buffers.is_some() {
            return status(err::BUSY);
        }
        device.buffers = Some(SimBuffers {
            geometry: device.geometry(),
            storage: FrameStorage::Attached(frames.iter().map(|p| *p as usize).collect()),
            stamps: vec![None; frames.len()],
        });
        ok()
    }

    fn buf_release(&self, handle: DeviceHandle) -> DcamStatus {
        if let Some(fault) = self.injected("buf_release") {
            return fault;
        }
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        if device.capture.busy {
            return status(err::BUSY);
        }
        device.buffers = None;
        device.capture.newest = -1;
        device.capture.frames = 0;
        ok()
    }

    fn buf_lock_frame(&self, handle: DeviceHandle, frame: &mut RawFrame) -> DcamStatus {
        let mut state = self.state.lock();
        self.advance_and_notify(&mut state, handle.as_raw());
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        let newest = device.capture.newest;
        let Some(buffers) = device.buffers.as_mut() else {
            return status(err::NOTREADY);
        };
        let slot = match frame.frame_index {
            -1 if newest < 0 => return status(err::NOTREADY),
            -1 => newest as usize,
            i if i >= 0 && (i as usize) < buffers.len() => i as usize,
            _ => return status(err::INVALIDFRAMEINDEX),
        };
        let geometry = buffers.geometry;
        let stamp = buffers.stamps[slot];
        frame.frame_index = slot as i32;
        frame.buf = buffers.slot_ptr(slot).cast_const();
        frame.rowbytes = geometry.rowbytes() as i32;
        frame.pixel_type = geometry.pixel_type;
        frame.width = geometry.width as i32;
        frame.height = geometry.height as i32;
        frame.left = geometry.left as i32;
        frame.top = geometry.top as i32;
        frame.framestamp = stamp.map_or(-1, |s| s.framestamp);
        let timestamp = stamp.map(|s| s.timestamp).unwrap_or_default();
        frame.timestamp_sec = timestamp.as_secs() as u32;
        frame.timestamp_usec = timestamp.subsec_micros() as i32;
        ok()
    }

    fn cap_start(&self, handle: DeviceHandle, capture_mode: i32) -> DcamStatus {
        let mut state = self.state.lock();
        let raw = handle.as_raw();
        let Some(device) = state.devices.get_mut(&raw) else {
            return status(err::INVALIDHANDLE);
        };
        if capture_mode != capstart::SNAP && capture_mode != capstart::SEQUENCE {
            return status(err::INVALIDPARAM);
        }
        if device.capture.busy {
            return status(err::BUSY);
        }
        if device.buffers.is_none() {
            return status(err::NOTREADY);
        }
        let now = Instant::now();
        let period = device.period();
        let source = device.raw(prop::TRIGGERSOURCE);
        device.capture = SimCapture {
            busy: true,
            mode: capture_mode,
            period,
            next_arrival: (source == mode::TRIGGERSOURCE_INTERNAL
                || source == mode::TRIGGERSOURCE_MASTERPULSE)
                .then(|| now + period),
            triggered: VecDeque::new(),
            frames: 0,
            newest: -1,
        };
        state.clear_latched(raw);
        ok()
    }

    fn cap_stop(&self, handle: DeviceHandle) -> DcamStatus {
        if let Some(fault) = self.injected("cap_stop") {
            return fault;
        }
        let mut state = self.state.lock();
        let raw = handle.as_raw();
        state.advance(raw, Instant::now());
        let Some(device) = state.devices.get_mut(&raw) else {
            return status(err::INVALIDHANDLE);
        };
        if device.capture.busy {
            device.capture.busy = false;
            device.capture.next_arrival = None;
            device.capture.triggered.clear();
            state.raise(raw, capevent::STOPPED);
        }
        self.events.notify_all();
        ok()
    }

    fn cap_status(&self, handle: DeviceHandle, out: &mut i32) -> DcamStatus {
        let mut state = self.state.lock();
        self.advance_and_notify(&mut state, handle.as_raw());
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        *out = device.status();
        ok()
    }

    fn cap_transfer_info(&self, handle: DeviceHandle, info: &mut RawTransferInfo) -> DcamStatus {
        let mut state = self.state.lock();
        self.advance_and_notify(&mut state, handle.as_raw());
        let Some(device) = state.devices.get(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        info.newest_frame_index = device.capture.newest;
        info.frame_count = device.capture.frames as i32;
        ok()
    }

    fn cap_fire_trigger(&self, handle: DeviceHandle) -> DcamStatus {
        let mut state = self.state.lock();
        let Some(device) = state.devices.get_mut(&handle.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        if !device.capture.busy {
            return status(err::NOTBUSY);
        }
        if device.raw(prop::TRIGGERSOURCE) != mode::TRIGGERSOURCE_SOFTWARE {
            return status(err::NOTRIGGER);
        }
        let at = Instant::now() + device.capture.period;
        device.capture.triggered.push_back(at);
        self.events.notify_all();
        ok()
    }

    fn wait_open(
        &self,
        handle: DeviceHandle,
        wait: &mut WaitToken,
        supported_events: &mut i32,
    ) -> DcamStatus {
        let mut state = self.state.lock();
        if !state.devices.contains_key(&handle.as_raw()) {
            return status(err::INVALIDHANDLE);
        }
        let raw = state.issue_handle();
        state.waits.insert(
            raw,
            SimWait {
                device: handle.as_raw(),
                latched: 0,
                waiting: false,
                aborted: false,
            },
        );
        *wait = WaitToken::from_raw(raw);
        *supported_events = ALL_EVENTS;
        ok()
    }

    fn wait_start(&self, wait: WaitToken, start: &mut RawWaitStart) -> DcamStatus {
        // negative timeouts (including the vendor's INFINITE) never expire
        let deadline = u64::try_from(start.timeout_ms)
            .ok()
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        let key = wait.as_raw();

        let mut state = self.state.lock();
        let device = match state.waits.get_mut(&key) {
            None => return status(err::INVALIDHANDLE),
            Some(w) if w.waiting => return status(err::BUSY),
            Some(w) => {
                w.waiting = true;
                w.aborted = false;
                w.device
            }
        };

        let code = loop {
            let now = Instant::now();
            if state.advance(device, now) {
                self.events.notify_all();
            }
            let Some(w) = state.waits.get_mut(&key) else {
                // closed underneath us
                break err::ABORT;
            };
            if w.aborted {
                w.aborted = false;
                break err::ABORT;
            }
            let hit = w.latched & start.event_mask;
            if hit != 0 {
                w.latched &= !hit;
                start.event_happened = hit;
                break err::SUCCESS;
            }
            if deadline.is_some_and(|d| now >= d) {
                break err::TIMEOUT;
            }

            let next_frame = state.devices.get(&device).and_then(SimDevice::next_event_time);
            let wake = match (next_frame, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            match wake {
                Some(at) => {
                    self.events.wait_until(&mut state, at);
                }
                None => self.events.wait(&mut state),
            }
        };

        if let Some(w) = state.waits.get_mut(&key) {
            w.waiting = false;
        }
        status(code)
    }

    fn wait_abort(&self, wait: WaitToken) -> DcamStatus {
        let mut state = self.state.lock();
        let Some(w) = state.waits.get_mut(&wait.as_raw()) else {
            return status(err::INVALIDHANDLE);
        };
        if w.waiting {
            w.aborted = true;
            self.events.notify_all();
        }
        ok()
    }

    fn wait_close(&self, wait: WaitToken) -> DcamStatus {
        if let Some(fault) = self.injected("wait_close") {
            return fault;
        }
        let mut state = self.state.lock();
        match state.waits.get(&wait.as_raw()) {
            None => status(err::INVALIDHANDLE),
            Some(w) if w.waiting => status(err::BUSY),
            Some(_) => {
                state.waits.remove(&wait.as_raw());
                ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SimulatedDcam {
        SimulatedDcam::from_config(&SimulatorConfig {
            devices: 2,
            sensor_width: 16,
            sensor_height: 8,
            exposure_s: 0.002,
            ..Default::default()
        })
    }

    fn open(sim: &SimulatedDcam) -> DeviceHandle {
        let mut count = 0;
        assert_eq!(sim.api_init(&mut count), ok());
        assert_eq!(count, 2);
        let mut handle = DeviceHandle::default();
        assert_eq!(sim.dev_open(0, &mut handle), ok());
        handle
    }

    #[test]
    fn test_open_requires_init_and_valid_index() {
        let sim = small();
        let mut handle = DeviceHandle::default();
        assert_eq!(sim.dev_open(0, &mut handle), status(err::NODRIVER));

        let mut count = 0;
        sim.api_init(&mut count);
        assert_eq!(sim.dev_open(2, &mut handle), status(err::NOCAMERA));
        assert_eq!(sim.dev_open(-1, &mut handle), status(err::NOCAMERA));
        assert_eq!(sim.dev_open(1, &mut handle), ok());
    }

    #[test]
    fn test_derived_geometry_follows_subarray_and_binning() {
        let sim = small();
        let h = open(&sim);
        let mut v = 0.0;
        sim.prop_get_value(h, prop::IMAGE_FRAMEBYTES, &mut v);
        assert_eq!(v, 16.0 * 8.0 * 2.0);

        assert_eq!(sim.prop_set_value(h, prop::SUBARRAYHSIZE, 8.0), ok());
        assert_eq!(sim.prop_set_value(h, prop::SUBARRAYMODE, mode::ON), ok());
        sim.prop_get_value(h, prop::IMAGE_WIDTH, &mut v);
        assert_eq!(v, 8.0);

        assert_eq!(sim.prop_set_value(h, prop::BINNING, 2.0), ok());
        sim.prop_get_value(h, prop::IMAGE_WIDTH, &mut v);
        assert_eq!(v, 4.0);
        sim.prop_get_value(h, prop::IMAGE_HEIGHT, &mut v);
        assert_eq!(v, 4.0);
    }

    #[test]
    fn test_set_value_contracts() {
        let sim = small();
        let h = open(&sim);
        assert_eq!(sim.prop_set_value(h, prop::IMAGE_WIDTH, 4.0), status(err::NOTWRITABLE));
        assert_eq!(sim.prop_set_value(h, prop::EXPOSURETIME, 100.0), status(err::OUTOFRANGE));
        assert_eq!(sim.prop_set_value(h, prop::BINNING, 3.0), status(err::INVALIDVALUE));
        assert_eq!(sim.prop_set_value(h, 0x0FFF_FFF0, 1.0), status(err::INVALIDPROPERTYID));

        let mut v = 100.0;
        assert_eq!(sim.prop_set_get_value(h, prop::EXPOSURETIME, &mut v, option::NEAREST), ok());
        assert_eq!(v, 10.0);
    }

    #[test]
    fn test_query_next_walks_mode_values() {
        let sim = small();
        let h = open(&sim);
        let mut v = mode::TRIGGERSOURCE_INTERNAL;
        let mut seen = vec![v];
        while sim.prop_query_value(h, prop::TRIGGERSOURCE, &mut v, option::NEXT) == ok() {
            seen.push(v);
        }
        assert_eq!(seen, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_next_id_ends_with_no_property() {
        let sim = small();
        let h = open(&sim);
        let mut id = 0;
        let mut count = 0;
        while sim.prop_get_next_id(h, &mut id, option::SUPPORT) == ok() {
            count += 1;
        }
        assert_eq!(count, property_table(sim.config()).len());
        assert_eq!(
            sim.prop_get_next_id(h, &mut id, option::SUPPORT),
            status(err::NOPROPERTY)
        );
    }

    #[test]
    fn test_snap_fills_every_slot_then_stops() {
        let sim = small();
        let h = open(&sim);
        assert_eq!(sim.cap_start(h, capstart::SNAP), status(err::NOTREADY));
        assert_eq!(sim.buf_alloc(h, 3), ok());
        assert_eq!(sim.cap_start(h, capstart::SNAP), ok());
        assert_eq!(sim.cap_start(h, capstart::SNAP), status(err::BUSY));

        std::thread::sleep(Duration::from_millis(100));
        let mut st = 0;
        sim.cap_status(h, &mut st);
        assert_eq!(st, capstatus::READY);

        let mut info = RawTransferInfo::default();
        sim.cap_transfer_info(h, &mut info);
        assert_eq!(info.frame_count, 3);
        assert_eq!(info.newest_frame_index, 2);

        let mut frame = RawFrame::request(1);
        assert_eq!(sim.buf_lock_frame(h, &mut frame), ok());
        assert_eq!(frame.framestamp, 1);
        // SAFETY: the simulator owns the frame until release.
        let first = unsafe { std::slice::from_raw_parts(frame.buf, 2) };
        assert_eq!(
            u16::from_le_bytes([first[0], first[1]]),
            SimulatedDcam::pixel_value(0, 0, 1)
        );
    }

    #[test]
    fn test_wait_times_out_without_frames() {
        let sim = small();
        let h = open(&sim);
        let mut wait = WaitToken::default();
        let mut supported = 0;
        assert_eq!(sim.wait_open(h, &mut wait, &mut supported), ok());
        assert_eq!(supported, ALL_EVENTS);

        let mut start = RawWaitStart {
            event_mask: capevent::FRAMEREADY,
            timeout_ms: 20,
            event_happened: 0,
        };
        let begun = Instant::now();
        assert_eq!(sim.wait_start(wait, &mut start), status(err::TIMEOUT));
        assert!(begun.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_injected_fault_fires_once() {
        let sim = small();
        let h = open(&sim);
        sim.fail_next("cap_stop", err::NOCONNECTION);
        sim.fail_next("buf_release", err::BUSY);
        assert_eq!(sim.cap_stop(h), status(err::NOCONNECTION));
        assert_eq!(sim.cap_stop(h), ok());
        // untouched operations are unaffected
        let mut v = 1.0;
        assert_eq!(sim.prop_query_value(h, prop::BINNING, &mut v, option::NEXT), ok());
        assert_eq!(sim.buf_release(h), status(err::BUSY));
        assert_eq!(sim.buf_release(h), ok());
    }

    #[test]
    fn test_unknown_error_code_has_no_text() {
        let sim = small();
        let mut text = [0u8; 64];
        assert_eq!(
            sim.dev_get_string(None, 0x8000_7777_u32 as i32, &mut text),
            status(err::INVALIDPARAM)
        );
        assert_eq!(sim.dev_get_string(None, err::TIMEOUT, &mut text), ok());
        assert_eq!(crate::sdk::decode_text(&text), "timeout");
    }
}
