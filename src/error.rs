//! Error types for DCAM operations.
//!
//! Every subsystem call returns a raw status word. [`ErrorReporter::check`]
//! is the single place where those words become Rust errors:
//!
//! - a status with the high bit clear is success,
//! - anything else becomes [`DcamError::Driver`] carrying the raw code, the
//!   name of the failing entry point and the subsystem's own description of
//!   the code, fetched through `dcamdev_getstring`.
//!
//! Argument problems detected before any subsystem call are reported as
//! [`DcamError::Value`]; unsupported pixel encodings as
//! [`DcamError::NotImplemented`].

use crate::sdk::{consts::err, decode_text, DcamApi, DcamStatus, DeviceHandle};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for DCAM operations.
pub type Result<T> = std::result::Result<T, DcamError>;

/// Default capacity of the error-text buffer, in bytes.
pub const DEFAULT_ERROR_TEXT_BYTES: usize = 1024;

/// Errors that can occur when working with DCAM devices.
#[derive(Error, Debug)]
pub enum DcamError {
    /// A subsystem call reported failure.
    #[error("{operation} failed: {message} (0x{code:08X})")]
    Driver {
        /// Raw status word.
        code: i32,
        /// Name of the subsystem entry point that failed.
        operation: &'static str,
        /// Human-readable description of `code`.
        message: String,
    },

    /// Invalid argument rejected before reaching the subsystem.
    #[error("Invalid value: {0}")]
    Value(String),

    /// The subsystem returned data this crate cannot decode.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DcamError {
    /// Classified status code, for [`DcamError::Driver`] only.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Driver { code, .. } => Some(ErrorKind::from_code(*code)),
            _ => None,
        }
    }

    /// Raw status code, for [`DcamError::Driver`] only.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Driver { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Failing entry point, for [`DcamError::Driver`] only.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Driver { operation, .. } => Some(operation),
            _ => None,
        }
    }

    /// Check if a wait ran out of time.
    pub fn is_timeout(&self) -> bool {
        self.kind() == Some(ErrorKind::Timeout)
    }

    /// Check if a wait was released by an abort.
    pub fn is_abort(&self) -> bool {
        self.kind() == Some(ErrorKind::Abort)
    }

    /// Check if the device or wait object was busy.
    pub fn is_busy(&self) -> bool {
        self.kind() == Some(ErrorKind::Busy)
    }

    /// Prefix the message of a driver error, keeping code and operation.
    pub(crate) fn with_context(self, context: &str) -> Self {
        match self {
            Self::Driver {
                code,
                operation,
                message,
            } => Self::Driver {
                code,
                operation,
                message: format!("{context}: {message}"),
            },
            other => other,
        }
    }
}

impl From<figment::Error> for DcamError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Classification of DCAM status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ErrorKind {
    Busy,
    NotReady,
    NotStable,
    Unstable,
    NotBusy,
    Excluded,
    CoolingTrouble,
    NoTrigger,
    Abort,
    Timeout,
    LostFrame,
    NoResource,
    NoMemory,
    NoModule,
    NoDriver,
    NoCamera,
    FailOpen,
    InvalidCamera,
    InvalidHandle,
    InvalidParam,
    InvalidValue,
    OutOfRange,
    NotWritable,
    NotReadable,
    InvalidPropertyId,
    AccessDeny,
    NoProperty,
    NoValueText,
    InvalidFrameIndex,
    Unreach,
    NotImplement,
    NotSupport,
    NoConnection,
    /// A failure code this crate does not name.
    Unknown(i32),
}

const KNOWN_KINDS: &[(i32, ErrorKind, &str)] = &[
    (err::BUSY, ErrorKind::Busy, "API cannot process in busy state"),
    (err::NOTREADY, ErrorKind::NotReady, "API requires ready state"),
    (err::NOTSTABLE, ErrorKind::NotStable, "API requires stable or unstable state"),
    (err::UNSTABLE, ErrorKind::Unstable, "API does not support in unstable state"),
    (err::NOTBUSY, ErrorKind::NotBusy, "API requires busy state"),
    (err::EXCLUDED, ErrorKind::Excluded, "some resource is exclusive and already used"),
    (err::COOLINGTROUBLE, ErrorKind::CoolingTrouble, "something happens near cooler"),
    (err::NOTRIGGER, ErrorKind::NoTrigger, "no trigger when necessary"),
    (err::ABORT, ErrorKind::Abort, "abort process"),
    (err::TIMEOUT, ErrorKind::Timeout, "timeout"),
    (err::LOSTFRAME, ErrorKind::LostFrame, "frame data is lost"),
    (err::NORESOURCE, ErrorKind::NoResource, "not enough resource except memory"),
    (err::NOMEMORY, ErrorKind::NoMemory, "not enough memory"),
    (err::NOMODULE, ErrorKind::NoModule, "no sub module"),
    (err::NODRIVER, ErrorKind::NoDriver, "no driver"),
    (err::NOCAMERA, ErrorKind::NoCamera, "no camera"),
    (err::FAILOPEN, ErrorKind::FailOpen, "failed to open camera"),
    (err::INVALIDCAMERA, ErrorKind::InvalidCamera, "invalid camera"),
    (err::INVALIDHANDLE, ErrorKind::InvalidHandle, "invalid camera handle"),
    (err::INVALIDPARAM, ErrorKind::InvalidParam, "invalid parameter"),
    (err::INVALIDVALUE, ErrorKind::InvalidValue, "invalid property value"),
    (err::OUTOFRANGE, ErrorKind::OutOfRange, "value is out of range"),
    (err::NOTWRITABLE, ErrorKind::NotWritable, "the property is not writable"),
    (err::NOTREADABLE, ErrorKind::NotReadable, "the property is not readable"),
    (err::INVALIDPROPERTYID, ErrorKind::InvalidPropertyId, "the property id is invalid"),
    (err::ACCESSDENY, ErrorKind::AccessDeny, "the property is not accessible in this state"),
    (err::NOPROPERTY, ErrorKind::NoProperty, "no property"),
    (err::NOVALUETEXT, ErrorKind::NoValueText, "the property does not have value text"),
    (err::INVALIDFRAMEINDEX, ErrorKind::InvalidFrameIndex, "the frame index is invalid"),
    (err::UNREACH, ErrorKind::Unreach, "internal error"),
    (err::NOTIMPLEMENT, ErrorKind::NotImplement, "not yet implemented"),
    (err::NOTSUPPORT, ErrorKind::NotSupport, "function is not supported"),
    (err::NOCONNECTION, ErrorKind::NoConnection, "camera is not connected"),
];

impl ErrorKind {
    /// Classify a raw failure code.
    pub fn from_code(code: i32) -> Self {
        KNOWN_KINDS
            .iter()
            .find(|(c, _, _)| *c == code)
            .map_or(Self::Unknown(code), |(_, kind, _)| *kind)
    }

    /// Raw status code for this kind.
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown(code) => code,
            kind => KNOWN_KINDS
                .iter()
                .find(|(_, k, _)| *k == kind)
                .map_or(err::UNREACH, |(c, _, _)| *c),
        }
    }

    /// Static description, used when the subsystem cannot describe a code.
    pub fn description(self) -> &'static str {
        KNOWN_KINDS
            .iter()
            .find(|(_, k, _)| *k == self)
            .map_or("unknown error", |(_, _, text)| text)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown(0x{code:08X})"),
            kind => write!(f, "{kind:?}"),
        }
    }
}

/// Translates subsystem status words into [`DcamError`]s.
///
/// Cheap to clone; every component that talks to the subsystem owns one.
#[derive(Clone)]
pub struct ErrorReporter {
    api: Arc<dyn DcamApi>,
    text_bytes: usize,
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("text_bytes", &self.text_bytes)
            .finish_non_exhaustive()
    }
}

impl ErrorReporter {
    /// Reporter with the default 1024-byte text buffer.
    pub fn new(api: Arc<dyn DcamApi>) -> Self {
        Self::with_text_bytes(api, DEFAULT_ERROR_TEXT_BYTES)
    }

    /// Reporter with a custom text buffer capacity.
    pub fn with_text_bytes(api: Arc<dyn DcamApi>, text_bytes: usize) -> Self {
        Self {
            api,
            text_bytes: text_bytes.max(1),
        }
    }

    /// Return `Ok(())` for success, otherwise a [`DcamError::Driver`].
    ///
    /// `handle` is the device the call was made on, if any; the subsystem
    /// uses it to produce device-specific descriptions.
    pub fn check(
        &self,
        status: DcamStatus,
        operation: &'static str,
        handle: Option<DeviceHandle>,
    ) -> Result<()> {
        if !status.is_failure() {
            return Ok(());
        }
        let code = status.code();
        let message = self.describe(code, handle);
        tracing::debug!(operation, code = %status, %message, "DCAM call failed");
        Err(DcamError::Driver {
            code,
            operation,
            message,
        })
    }

    /// The subsystem's description of `code`, or a static fallback.
    pub fn describe(&self, code: i32, handle: Option<DeviceHandle>) -> String {
        let mut text = vec![0u8; self.text_bytes];
        let status = self.api.dev_get_string(handle, code, &mut text);
        let message = if status.is_failure() {
            String::new()
        } else {
            decode_text(&text)
        };
        if message.is_empty() {
            ErrorKind::from_code(code).description().to_string()
        } else {
            message
        }
    }

    /// A driver error produced locally, without consulting the subsystem.
    pub fn local(kind: ErrorKind, operation: &'static str) -> DcamError {
        DcamError::Driver {
            code: kind.code(),
            operation,
            message: kind.description().to_string(),
        }
    }

    /// Subsystem this reporter queries.
    pub(crate) fn api(&self) -> &Arc<dyn DcamApi> {
        &self.api
    }
}
