//! # Hamamatsu DCAM camera driver
//!
//! Safe driver core for cameras served by the DCAM-API: one process-wide
//! [`DriverContext`], a [`DeviceSession`] per open camera, and the buffer,
//! capture and wait objects that make up the acquisition lifecycle.
//!
//! ## Crate Structure
//!
//! - **`driver`**: subsystem init/uninit and device enumeration.
//! - **`session`**: an open camera and its identification strings.
//! - **`property`** / **`capability`**: property attributes, values and
//!   enumeration; device capability queries.
//! - **`buffer`**: allocated or caller-attached frame buffers and zero-copy
//!   frame access.
//! - **`capture`**: start/stop, status and software triggers.
//! - **`wait`**: blocking waits for capture events, abortable from another
//!   thread.
//! - **`camera`**: name-based convenience layer with snap and continuous
//!   acquisition.
//! - **`error`**: [`DcamError`] and the status-code translation.
//! - **`sdk`**: the raw subsystem boundary ([`sdk::DcamApi`]); the native
//!   backend is behind the `dcam_sdk` feature.
//! - **`mock`**: an in-process simulated subsystem (`mock` feature, on by
//!   default).
//! - **`config`** / **`logging`**: figment configuration and tracing setup.
//!
//! ## Feature Flags
//!
//! - `mock` (default): build [`mock::SimulatedDcam`].
//! - `dcam_sdk`: link the vendor library through `dcam-sys` and build
//!   `sdk::native::NativeDcam`.
//! - `hardware_tests`: enable tests that need a real camera.

pub mod buffer;
pub mod camera;
pub mod capability;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
#[cfg(feature = "mock")]
pub mod mock;
pub mod property;
pub mod sdk;
pub mod session;
pub mod wait;

pub use buffer::{BufferManager, Frame, FrameView, PixelType};
pub use camera::{Camera, PropertyValue, Roi};
pub use capture::{CaptureController, CaptureMode, CaptureStatus, TransferInfo};
pub use config::DcamConfig;
pub use driver::DriverContext;
pub use error::{DcamError, ErrorKind, ErrorReporter, Result};
pub use session::{DeviceInfo, DeviceSession, StringId};
pub use wait::{CaptureEvent, WaitHandle};
