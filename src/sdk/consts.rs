//! Vendor constants for the DCAM-API boundary.
//!
//! Values match `dcamapi4.h` / `dcamprop.h` so the simulated and native
//! subsystems speak the same numbers.

#![allow(missing_docs)]

/// Status words returned by every subsystem entry point.
pub mod err {
    pub const NONE: i32 = 0;
    pub const SUCCESS: i32 = 1;

    // status errors
    pub const BUSY: i32 = 0x8000_0101_u32 as i32;
    pub const NOTREADY: i32 = 0x8000_0103_u32 as i32;
    pub const NOTSTABLE: i32 = 0x8000_0104_u32 as i32;
    pub const UNSTABLE: i32 = 0x8000_0105_u32 as i32;
    pub const NOTBUSY: i32 = 0x8000_0107_u32 as i32;
    pub const EXCLUDED: i32 = 0x8000_0110_u32 as i32;
    pub const COOLINGTROUBLE: i32 = 0x8000_0302_u32 as i32;
    pub const NOTRIGGER: i32 = 0x8000_0303_u32 as i32;

    // wait errors
    pub const ABORT: i32 = 0x8000_0102_u32 as i32;
    pub const TIMEOUT: i32 = 0x8000_0106_u32 as i32;
    pub const LOSTFRAME: i32 = 0x8000_0301_u32 as i32;

    // initialization errors
    pub const NORESOURCE: i32 = 0x8000_0201_u32 as i32;
    pub const NOMEMORY: i32 = 0x8000_0203_u32 as i32;
    pub const NOMODULE: i32 = 0x8000_0204_u32 as i32;
    pub const NODRIVER: i32 = 0x8000_0205_u32 as i32;
    pub const NOCAMERA: i32 = 0x8000_0206_u32 as i32;
    pub const FAILOPEN: i32 = 0x8000_1001_u32 as i32;

    // calling errors
    pub const INVALIDCAMERA: i32 = 0x8000_0806_u32 as i32;
    pub const INVALIDHANDLE: i32 = 0x8000_0807_u32 as i32;
    pub const INVALIDPARAM: i32 = 0x8000_0808_u32 as i32;
    pub const INVALIDVALUE: i32 = 0x8000_0821_u32 as i32;
    pub const OUTOFRANGE: i32 = 0x8000_0822_u32 as i32;
    pub const NOTWRITABLE: i32 = 0x8000_0823_u32 as i32;
    pub const NOTREADABLE: i32 = 0x8000_0824_u32 as i32;
    pub const INVALIDPROPERTYID: i32 = 0x8000_0825_u32 as i32;
    pub const ACCESSDENY: i32 = 0x8000_082C_u32 as i32;
    pub const NOPROPERTY: i32 = 0x8000_0828_u32 as i32;
    pub const NOVALUETEXT: i32 = 0x8000_082D_u32 as i32;
    pub const INVALIDFRAMEINDEX: i32 = 0x8000_0833_u32 as i32;

    // internal errors
    pub const UNREACH: i32 = 0x8000_0F01_u32 as i32;
    pub const NOTIMPLEMENT: i32 = 0x8000_0F02_u32 as i32;
    pub const NOTSUPPORT: i32 = 0x8000_0F03_u32 as i32;
    pub const NOCONNECTION: i32 = 0x8000_0F07_u32 as i32;
}

/// Capture status reported by `dcamcap_status`.
pub mod capstatus {
    pub const ERROR: i32 = 0;
    pub const BUSY: i32 = 1;
    pub const READY: i32 = 2;
    pub const STABLE: i32 = 3;
    pub const UNSTABLE: i32 = 4;
}

/// Capture start modes.
pub mod capstart {
    pub const SEQUENCE: i32 = -1;
    pub const SNAP: i32 = 0;
}

/// Capture event bits used with wait handles.
pub mod capevent {
    pub const TRANSFERRED: i32 = 0x0001;
    pub const FRAMEREADY: i32 = 0x0002;
    pub const CYCLEEND: i32 = 0x0004;
    pub const EXPOSUREEND: i32 = 0x0008;
    pub const STOPPED: i32 = 0x0010;
}

/// Pixel encodings reported in a locked frame.
pub mod pixeltype {
    pub const NONE: i32 = 0x0000_0000;
    pub const MONO8: i32 = 0x0000_0001;
    pub const MONO16: i32 = 0x0000_0002;
    pub const MONO12: i32 = 0x0000_0003;
    pub const MONO12P: i32 = 0x0000_0005;
    pub const RGB24: i32 = 0x0000_0021;
    pub const RGB48: i32 = 0x0000_0022;
    pub const BGR24: i32 = 0x0000_0029;
    pub const BGR48: i32 = 0x0000_002A;
}

/// Property attribute flags (`DCAMPROP_ATTR.attribute`).
pub mod attr {
    pub const HASRANGE: u32 = 0x8000_0000;
    pub const HASSTEP: u32 = 0x4000_0000;
    pub const HASDEFAULT: u32 = 0x2000_0000;
    pub const HASVALUETEXT: u32 = 0x1000_0000;
    pub const HASCHANNEL: u32 = 0x0800_0000;
    pub const AUTOROUNDING: u32 = 0x0080_0000;
    pub const STEPPING_INCONSISTENT: u32 = 0x0040_0000;
    pub const DATASTREAM: u32 = 0x0020_0000;
    pub const HASRATIO: u32 = 0x0010_0000;
    pub const VOLATILE: u32 = 0x0008_0000;
    pub const READABLE: u32 = 0x0004_0000;
    pub const WRITABLE: u32 = 0x0002_0000;
    pub const ACCESSREADY: u32 = 0x0001_0000;
    pub const ACCESSBUSY: u32 = 0x0000_8000;
    pub const HASVIEW: u32 = 0x0000_4000;
    pub const EFFECTIVE: u32 = 0x0000_0200;

    pub const TYPE_MASK: u32 = 0x0000_000F;
    pub const TYPE_NONE: u32 = 0x0000_0000;
    pub const TYPE_MODE: u32 = 0x0000_0001;
    pub const TYPE_LONG: u32 = 0x0000_0002;
    pub const TYPE_REAL: u32 = 0x0000_0003;

    // attribute2
    pub const ARRAYBASE: u32 = 0x0800_0000;
    pub const ARRAYELEMENT: u32 = 0x0400_0000;
}

/// Property units (`DCAMPROP_ATTR.iUnit`).
pub mod unit {
    pub const NONE: i32 = 0;
    pub const SECOND: i32 = 1;
    pub const CELSIUS: i32 = 2;
    pub const KELVIN: i32 = 3;
    pub const METERPERSECOND: i32 = 4;
    pub const PERSECOND: i32 = 5;
    pub const DEGREE: i32 = 6;
    pub const MICROMETER: i32 = 7;
}

/// Query options for `dcamprop_queryvalue` / `dcamprop_getnextid`.
pub mod option {
    pub const PRIOR: i32 = 0xFF00_0000_u32 as i32;
    pub const NEXT: i32 = 0x0100_0000;
    pub const NEAREST: i32 = 0x8000_0000_u32 as i32;
    pub const SUPPORT: i32 = 0x0000_0000;
    pub const NONE: i32 = 0x0000_0000;
}

/// String ids for `dcamdev_getstring`.
pub mod idstr {
    pub const BUS: i32 = 0x0400_0101;
    pub const CAMERAID: i32 = 0x0400_0102;
    pub const VENDOR: i32 = 0x0400_0103;
    pub const MODEL: i32 = 0x0400_0104;
    pub const CAMERAVERSION: i32 = 0x0400_0105;
    pub const DRIVERVERSION: i32 = 0x0400_0106;
    pub const MODULEVERSION: i32 = 0x0400_0107;
    pub const DCAMAPIVERSION: i32 = 0x0400_0108;
}

/// Capability domains and kinds for `dcamdev_getcapability`.
pub mod capability {
    pub const DOMAIN_FUNCTION: i32 = 0x0000_0000;
    pub const DOMAIN_DCAMDATA: i32 = 0x0000_0001;
    pub const DOMAIN_FRAMEOPTION: i32 = 0x0000_0002;

    pub const KIND_NONE: i32 = 0x0000_0000;
    pub const KIND_REGION: i32 = 0x0000_0001;
    pub const KIND_LUT: i32 = 0x0000_0002;

    pub const REGIONTYPE_BYTEMASK: i32 = 0x0000_0001;
    pub const REGIONTYPE_RECT16ARRAY: i32 = 0x0000_0002;

    pub const LUTTYPE_SEGMENTED_LINEAR: i32 = 0x0000_0001;

    pub const PROCTYPE_HDR: i32 = 0x0000_0001;
    pub const PROCTYPE_HIGHCONTRAST: i32 = 0x0000_0002;
}

/// Well-known property ids.
pub mod prop {
    pub const NUMBEROF_OUTPUTTRIGGERCONNECTOR: i32 = 0x001C_0010;
    pub const OUTPUTTRIGGER_SOURCE: i32 = 0x001C_0110;
    pub const TRIGGERSOURCE: i32 = 0x0010_0110;
    pub const TRIGGER_MODE: i32 = 0x0010_0210;
    pub const EXPOSURETIME: i32 = 0x001F_0110;
    pub const SENSORTEMPERATURE: i32 = 0x0020_0310;
    pub const READOUTSPEED: i32 = 0x0040_0110;
    pub const BINNING: i32 = 0x0040_1110;
    pub const SUBARRAYHPOS: i32 = 0x0040_2110;
    pub const SUBARRAYHSIZE: i32 = 0x0040_2120;
    pub const SUBARRAYVPOS: i32 = 0x0040_2130;
    pub const SUBARRAYVSIZE: i32 = 0x0040_2140;
    pub const SUBARRAYMODE: i32 = 0x0040_2150;
    pub const TIMING_READOUTTIME: i32 = 0x0040_3010;
    pub const IMAGE_WIDTH: i32 = 0x0042_0210;
    pub const IMAGE_HEIGHT: i32 = 0x0042_0220;
    pub const IMAGE_ROWBYTES: i32 = 0x0042_0230;
    pub const IMAGE_FRAMEBYTES: i32 = 0x0042_0240;
    pub const IMAGE_PIXELTYPE: i32 = 0x0042_0270;
    pub const BITSPERCHANNEL: i32 = 0x0042_0530;
    pub const DEFECTCORRECT_MODE: i32 = 0x0047_0010;
    pub const HOTPIXELCORRECT_LEVEL: i32 = 0x0047_0020;
}

/// Mode values shared by several properties.
pub mod mode {
    pub const OFF: f64 = 1.0;
    pub const ON: f64 = 2.0;

    pub const TRIGGERSOURCE_INTERNAL: f64 = 1.0;
    pub const TRIGGERSOURCE_EXTERNAL: f64 = 2.0;
    pub const TRIGGERSOURCE_SOFTWARE: f64 = 3.0;
    pub const TRIGGERSOURCE_MASTERPULSE: f64 = 4.0;

    pub const TRIGGER_MODE_NORMAL: f64 = 1.0;
    pub const TRIGGER_MODE_START: f64 = 6.0;

    pub const OUTPUTTRIGGER_SOURCE_EXPOSURE: f64 = 1.0;
    pub const OUTPUTTRIGGER_SOURCE_READOUTEND: f64 = 2.0;
    pub const OUTPUTTRIGGER_SOURCE_VSYNC: f64 = 3.0;
    pub const OUTPUTTRIGGER_SOURCE_TRIGGER: f64 = 6.0;
}
