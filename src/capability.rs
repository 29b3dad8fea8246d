//! Device capability queries.

use crate::error::{ErrorKind, ErrorReporter, Result};
use crate::sdk::consts::capability as cap;
use crate::sdk::RawCapability;
use crate::session::DeviceSession;
use serde::Serialize;

/// Capability to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// Region (sub-array) support.
    Region,
    /// Output lookup table support.
    Lut,
    /// Frame option processing support.
    FrameOption,
}

impl CapabilityKind {
    fn request(self) -> RawCapability {
        match self {
            Self::Region => RawCapability::Region {
                capflag: 0,
                horz_unit: 0,
                vert_unit: 0,
            },
            Self::Lut => RawCapability::Lut {
                capflag: 0,
                linear_point_max: 0,
            },
            Self::FrameOption => RawCapability::FrameOption {
                capflag: 0,
                support_proc: 0,
            },
        }
    }

    fn unsupported_message(self) -> &'static str {
        match self {
            Self::Region => "region capability not supported",
            Self::Lut => "LUT capability not supported",
            Self::FrameOption => "frame-option capability not supported",
        }
    }
}

/// Decoded region capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionCapability {
    /// Byte-mask regions supported.
    pub bytemask: bool,
    /// Rectangle-list regions supported.
    pub rect16_array: bool,
    /// Horizontal granularity in pixels.
    pub horz_unit: i32,
    /// Vertical granularity in pixels.
    pub vert_unit: i32,
}

/// Decoded LUT capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LutCapability {
    /// Segmented linear LUT supported.
    pub segmented_linear: bool,
    /// Maximum number of linear points.
    pub linear_point_max: i32,
}

/// Decoded frame-option capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameOptionCapability {
    /// High dynamic range processing supported.
    pub hdr: bool,
    /// High contrast processing supported.
    pub high_contrast: bool,
}

/// Result of [`DeviceSession::get_capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    /// See [`RegionCapability`].
    Region(RegionCapability),
    /// See [`LutCapability`].
    Lut(LutCapability),
    /// See [`FrameOptionCapability`].
    FrameOption(FrameOptionCapability),
}

impl From<RawCapability> for Capability {
    fn from(raw: RawCapability) -> Self {
        match raw {
            RawCapability::Region {
                capflag,
                horz_unit,
                vert_unit,
            } => Self::Region(RegionCapability {
                bytemask: capflag & cap::REGIONTYPE_BYTEMASK != 0,
                rect16_array: capflag & cap::REGIONTYPE_RECT16ARRAY != 0,
                horz_unit,
                vert_unit,
            }),
            RawCapability::Lut {
                capflag,
                linear_point_max,
            } => Self::Lut(LutCapability {
                segmented_linear: capflag & cap::LUTTYPE_SEGMENTED_LINEAR != 0,
                linear_point_max,
            }),
            RawCapability::FrameOption { support_proc, .. } => {
                Self::FrameOption(FrameOptionCapability {
                    hdr: support_proc & cap::PROCTYPE_HDR != 0,
                    high_contrast: support_proc & cap::PROCTYPE_HIGHCONTRAST != 0,
                })
            }
        }
    }
}

/// Whether the device reported anything for the requested capability.
///
/// Frame-option support lives in `support_proc`; its `capflag` is unused.
fn reports_support(raw: &RawCapability) -> bool {
    match raw {
        RawCapability::FrameOption { support_proc, .. } => *support_proc != 0,
        other => other.capflag() != 0,
    }
}

impl DeviceSession {
    /// Query one capability of the device.
    ///
    /// A device that does not offer the capability fails with a driver
    /// error whose message names the capability; the vendor code is kept.
    pub fn get_capability(&self, kind: CapabilityKind) -> Result<Capability> {
        let handle = self.handle("dcamdev_getcapability")?;
        let mut raw = kind.request();
        let status = self.api().dev_get_capability(handle, &mut raw);
        self.reporter()
            .check(status, "dcamdev_getcapability", Some(handle))
            .map_err(|e| e.with_context(kind.unsupported_message()))?;
        if !reports_support(&raw) {
            return Err(
                ErrorReporter::local(ErrorKind::NotSupport, "dcamdev_getcapability")
                    .with_context(kind.unsupported_message()),
            );
        }
        Ok(Capability::from(raw))
    }
}
