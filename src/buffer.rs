//! Frame buffers of an open camera.
//!
//! A [`BufferManager`] is in exactly one of three states:
//!
//! - empty,
//! - **allocated**: the subsystem owns `n` frame slots ([`BufferManager::alloc`]),
//! - **attached**: the caller supplied the frame memory
//!   ([`BufferManager::attach`] or [`BufferManager::attach_owned`]).
//!
//! Switching between allocated and attached requires [`BufferManager::release`]
//! first. Capture must be stopped before release.
//!
//! Frames are read without copying through [`BufferManager::lock_frame`],
//! which borrows the manager so the view cannot outlive a release.

#![allow(unsafe_code)]

use crate::error::{DcamError, ErrorKind, ErrorReporter, Result};
use crate::sdk::consts::{pixeltype, prop};
use crate::sdk::RawFrame;
use crate::session::{DeviceSlot, FrameAccess};
use std::sync::Arc;
use std::time::Duration;

/// Index passed to [`BufferManager::lock_frame`] for the newest frame.
pub const NEWEST_FRAME: i32 = -1;

/// Pixel encodings this crate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit little-endian monochrome.
    Mono16,
}

impl PixelType {
    /// Map a vendor pixel type; other encodings are not implemented.
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw {
            pixeltype::MONO8 => Ok(Self::Mono8),
            pixeltype::MONO16 => Ok(Self::Mono16),
            other => Err(DcamError::NotImplemented(format!(
                "pixel type 0x{other:08X} is not supported"
            ))),
        }
    }

    /// Vendor pixel type code.
    pub fn raw(self) -> i32 {
        match self {
            Self::Mono8 => pixeltype::MONO8,
            Self::Mono16 => pixeltype::MONO16,
        }
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
        }
    }
}

/// A locked frame, borrowed from the buffer set.
///
/// During a running sequence capture the slot may be refilled by the
/// device; copy the data out with [`FrameView::to_frame`] if it must
/// survive the next frame. While a view is alive its device handle stays
/// valid: tearing the driver down invalidates the session at once but
/// postpones closing the device and the DCAM-API until the view is dropped.
#[derive(Debug)]
pub struct FrameView<'a> {
    _access: FrameAccess<'a>,
    data: &'a [u8],
    /// Slot this frame was read from.
    pub frame_index: i32,
    /// Running frame counter within the capture.
    pub framestamp: i32,
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    /// Width in pixels.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
    /// Horizontal offset on the sensor.
    pub left: u32,
    /// Vertical offset on the sensor.
    pub top: u32,
    /// Bytes per row, including padding.
    pub rowbytes: usize,
    /// Pixel encoding.
    pub pixel_type: PixelType,
}

impl<'a> FrameView<'a> {
    /// Every byte of the frame, `rowbytes * height` long.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.rowbytes;
        let len = self.width as usize * self.pixel_type.bytes_per_pixel();
        self.data.get(start..start + len)
    }

    /// Copy into an owned [`Frame`] with padding removed.
    pub fn to_frame(&self) -> Frame {
        let packed = self.width as usize * self.pixel_type.bytes_per_pixel();
        let mut data = Vec::with_capacity(packed * self.height as usize);
        for row in self.data.chunks(self.rowbytes).take(self.height as usize) {
            data.extend_from_slice(&row[..packed.min(row.len())]);
        }
        Frame {
            width: self.width,
            height: self.height,
            pixel_type: self.pixel_type,
            frame_index: self.frame_index,
            framestamp: self.framestamp,
            timestamp: self.timestamp,
            data,
        }
    }
}

/// An owned copy of a frame with tightly packed rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
    /// Pixel encoding.
    pub pixel_type: PixelType,
    /// Slot this frame was read from.
    pub frame_index: i32,
    /// Running frame counter within the capture.
    pub framestamp: i32,
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    /// Pixel bytes, `width * height * bytes_per_pixel` long.
    pub data: Vec<u8>,
}

impl Frame {
    /// Pixels widened to `u16`.
    pub fn pixels_u16(&self) -> Vec<u16> {
        match self.pixel_type {
            PixelType::Mono16 => self
                .data
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .collect(),
            PixelType::Mono8 => self.data.iter().map(|&b| u16::from(b)).collect(),
        }
    }

    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.width as usize + x as usize;
        match self.pixel_type {
            PixelType::Mono16 => self
                .data
                .get(2 * i..2 * i + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]])),
            PixelType::Mono8 => self.data.get(i).map(|&b| u16::from(b)),
        }
    }
}

/// Frame addresses handed to the subsystem on attach.
#[derive(Debug)]
struct AddressArray(Vec<*mut u8>);

// SAFETY: the addresses are only passed back to the subsystem, which is
// itself Send + Sync; this type never dereferences them.
unsafe impl Send for AddressArray {}
// SAFETY: see above; shared access only reads the pointer values.
unsafe impl Sync for AddressArray {}

#[derive(Debug)]
enum BufferMode {
    Empty,
    Allocated {
        frames: usize,
    },
    Attached {
        addresses: AddressArray,
        owned: Option<Vec<Vec<u8>>>,
    },
}

/// Frame buffers of one session.
pub struct BufferManager {
    slot: Arc<DeviceSlot>,
    reporter: ErrorReporter,
    mode: BufferMode,
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl BufferManager {
    pub(crate) fn new(slot: Arc<DeviceSlot>, reporter: ErrorReporter) -> Self {
        Self {
            slot,
            reporter,
            mode: BufferMode::Empty,
        }
    }

    /// Number of frames in the buffer set, 0 when empty.
    pub fn frame_count(&self) -> usize {
        match &self.mode {
            BufferMode::Empty => 0,
            BufferMode::Allocated { frames } => *frames,
            BufferMode::Attached { addresses, .. } => addresses.0.len(),
        }
    }

    /// True while caller memory is attached.
    pub fn is_attached(&self) -> bool {
        matches!(self.mode, BufferMode::Attached { .. })
    }

    /// Bytes one frame needs under the current geometry (`IMAGE_FRAMEBYTES`).
    pub fn frame_bytes(&self) -> Result<usize> {
        let handle = self.slot.handle("dcamprop_getvalue")?;
        let mut value = 0.0;
        let status = self
            .reporter
            .api()
            .prop_get_value(handle, prop::IMAGE_FRAMEBYTES, &mut value);
        self.reporter
            .check(status, "dcamprop_getvalue", Some(handle))?;
        Ok(value.max(0.0) as usize)
    }

    /// Let the subsystem allocate `frame_count` frames.
    pub fn alloc(&mut self, frame_count: i32) -> Result<()> {
        let handle = self.slot.handle("dcambuf_alloc")?;
        self.ensure_empty("dcambuf_alloc")?;
        let status = self.reporter.api().buf_alloc(handle, frame_count);
        tracing::debug!(frame_count, %status, "dcambuf_alloc");
        self.reporter.check(status, "dcambuf_alloc", Some(handle))?;
        self.mode = BufferMode::Allocated {
            frames: frame_count.max(0) as usize,
        };
        Ok(())
    }

    /// Attach caller-owned frames.
    ///
    /// All frames must have the same length, at least
    /// [`frame_bytes`](Self::frame_bytes).
    ///
    /// # Safety
    ///
    /// The device writes into the frames asynchronously. Every frame must
    /// stay allocated, and must not be read or written by the caller, until
    /// [`release`](Self::release) succeeds or the session is closed.
    /// Prefer [`attach_owned`](Self::attach_owned), which enforces this.
    pub unsafe fn attach(&mut self, frames: &mut [&mut [u8]]) -> Result<()> {
        let addresses = frames.iter_mut().map(|f| f.as_mut_ptr()).collect();
        let lengths: Vec<usize> = frames.iter().map(|f| f.len()).collect();
        // SAFETY: forwarded from the caller.
        unsafe { self.attach_addresses(AddressArray(addresses), &lengths, None) }
    }

    /// Attach frames owned by the manager until [`release`](Self::release)
    /// hands them back.
    pub fn attach_owned(&mut self, mut frames: Vec<Vec<u8>>) -> Result<()> {
        let addresses = frames.iter_mut().map(|f| f.as_mut_ptr()).collect();
        let lengths: Vec<usize> = frames.iter().map(Vec::len).collect();
        // SAFETY: the vectors move into the manager and are neither resized
        // nor exposed until release succeeds, so their heap storage stays put.
        unsafe { self.attach_addresses(AddressArray(addresses), &lengths, Some(frames)) }
    }

    unsafe fn attach_addresses(
        &mut self,
        addresses: AddressArray,
        lengths: &[usize],
        owned: Option<Vec<Vec<u8>>>,
    ) -> Result<()> {
        let Some(&first) = lengths.first() else {
            return Err(DcamError::Value("attach requires at least one frame".into()));
        };
        if lengths.iter().any(|&len| len != first) {
            return Err(DcamError::Value(
                "attached frames must all have the same length".into(),
            ));
        }
        let handle = self.slot.handle("dcambuf_attach")?;
        self.ensure_empty("dcambuf_attach")?;

        let needed = self.frame_bytes()?;
        if first < needed {
            return Err(DcamError::Value(format!(
                "attached frames hold {first} bytes, the current geometry needs {needed}"
            )));
        }

        // SAFETY: lengths were validated against IMAGE_FRAMEBYTES; lifetime
        // is the caller's contract.
        let status = unsafe { self.reporter.api().buf_attach(handle, &addresses.0) };
        tracing::debug!(frames = lengths.len(), frame_bytes = first, %status, "dcambuf_attach");
        self.reporter.check(status, "dcambuf_attach", Some(handle))?;
        self.mode = BufferMode::Attached { addresses, owned };
        Ok(())
    }

    /// Release the buffer set. Frames attached with
    /// [`attach_owned`](Self::attach_owned) are returned.
    pub fn release(&mut self) -> Result<Vec<Vec<u8>>> {
        let handle = self.slot.handle("dcambuf_release")?;
        let status = self.reporter.api().buf_release(handle);
        tracing::debug!(%status, "dcambuf_release");
        self.reporter.check(status, "dcambuf_release", Some(handle))?;
        Ok(self.take_owned())
    }

    /// Lock frame `frame_index`, or [`NEWEST_FRAME`].
    pub fn lock_frame(&self, frame_index: i32) -> Result<FrameView<'_>> {
        let access = self.slot.read_access();
        let handle = self.slot.handle("dcambuf_lockframe")?;
        let mut raw = RawFrame::request(frame_index);
        let status = self.reporter.api().buf_lock_frame(handle, &mut raw);
        self.reporter
            .check(status, "dcambuf_lockframe", Some(handle))?;

        let pixel_type = PixelType::from_raw(raw.pixel_type)?;
        let (width, height) = match (u32::try_from(raw.width), u32::try_from(raw.height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(DcamError::Value(format!(
                    "locked frame has invalid size {}x{}",
                    raw.width, raw.height
                )))
            }
        };
        let rowbytes = usize::try_from(raw.rowbytes).unwrap_or(0);
        if raw.buf.is_null() || rowbytes < width as usize * pixel_type.bytes_per_pixel() {
            return Err(DcamError::Value(format!(
                "locked frame has invalid layout (rowbytes {})",
                raw.rowbytes
            )));
        }

        // SAFETY: the subsystem guarantees `rowbytes * height` readable bytes
        // at `buf` until the next buffer operation; every such operation on
        // this manager takes `&mut self`, which the returned borrow excludes.
        let data = unsafe { std::slice::from_raw_parts(raw.buf, rowbytes * height as usize) };
        Ok(FrameView {
            _access: access,
            data,
            frame_index: raw.frame_index,
            framestamp: raw.framestamp,
            timestamp: Duration::new(
                u64::from(raw.timestamp_sec),
                u32::try_from(raw.timestamp_usec).unwrap_or(0).saturating_mul(1000),
            ),
            width,
            height,
            left: u32::try_from(raw.left).unwrap_or(0),
            top: u32::try_from(raw.top).unwrap_or(0),
            rowbytes,
            pixel_type,
        })
    }

    /// Drop local bookkeeping after the device handle was closed.
    pub(crate) fn forget(&mut self) {
        self.take_owned();
    }

    fn take_owned(&mut self) -> Vec<Vec<u8>> {
        match std::mem::replace(&mut self.mode, BufferMode::Empty) {
            BufferMode::Attached {
                owned: Some(frames),
                ..
            } => frames,
            _ => Vec::new(),
        }
    }

    fn ensure_empty(&self, operation: &'static str) -> Result<()> {
        if matches!(self.mode, BufferMode::Empty) {
            Ok(())
        } else {
            Err(ErrorReporter::local(ErrorKind::Busy, operation)
                .with_context("release the current buffers first"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::DeviceHandle;
    use std::sync::Weak;

    #[test]
    fn test_pixel_type_mapping() {
        assert_eq!(PixelType::from_raw(pixeltype::MONO16).unwrap(), PixelType::Mono16);
        assert_eq!(PixelType::Mono8.bytes_per_pixel(), 1);
        let err = PixelType::from_raw(pixeltype::RGB24).unwrap_err();
        assert!(matches!(err, DcamError::NotImplemented(_)));
    }

    #[test]
    fn test_view_strips_row_padding() {
        // 2x2 Mono16 with 2 bytes of padding per row
        let data = [1, 0, 2, 0, 0xEE, 0xEE, 3, 0, 4, 0, 0xEE, 0xEE];
        let slot = DeviceSlot::new(DeviceHandle::default(), 0, Weak::new());
        let view = FrameView {
            _access: slot.read_access(),
            data: &data,
            frame_index: 0,
            framestamp: 7,
            timestamp: Duration::ZERO,
            width: 2,
            height: 2,
            left: 0,
            top: 0,
            rowbytes: 6,
            pixel_type: PixelType::Mono16,
        };
        assert_eq!(view.row(1), Some(&data[6..10]));
        assert_eq!(view.row(2), None);

        let frame = view.to_frame();
        assert_eq!(frame.pixels_u16(), vec![1, 2, 3, 4]);
        assert_eq!(frame.pixel(1, 1), Some(4));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.framestamp, 7);
    }
}
