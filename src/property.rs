//! Property access on an open camera.
//!
//! Properties are addressed by the vendor's integer ids. Attributes are
//! re-read on every [`DeviceSession::get_attribute`] call because the
//! subsystem may change ranges and access flags with other settings.
//!
//! Enumeration is lazy and restartable: [`DeviceSession::property_ids`]
//! walks `dcamprop_getnextid` and ends on `NoProperty`, and
//! [`DeviceSession::mode_values`] walks the `OPTION_NEXT` chain of a Mode
//! property.

use crate::error::{DcamError, ErrorKind, Result};
use crate::sdk::consts::{attr, option, unit};
use crate::sdk::{decode_text, RawPropAttr};
use crate::session::DeviceSession;
use serde::Serialize;

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// Enumerated values with text labels.
    Mode,
    /// Integer values.
    Long,
    /// Floating-point values.
    Real,
}

/// Physical unit of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyUnit {
    /// Dimensionless.
    None,
    /// Seconds.
    Second,
    /// Degrees Celsius.
    Celsius,
    /// Kelvin.
    Kelvin,
    /// Metres per second.
    MeterPerSecond,
    /// Hertz.
    PerSecond,
    /// Angle in degrees.
    Degree,
    /// Micrometres.
    Micrometer,
    /// A unit code this crate does not name.
    Other(i32),
}

impl PropertyUnit {
    /// Map a vendor unit code.
    pub fn from_raw(code: i32) -> Self {
        match code {
            unit::NONE => Self::None,
            unit::SECOND => Self::Second,
            unit::CELSIUS => Self::Celsius,
            unit::KELVIN => Self::Kelvin,
            unit::METERPERSECOND => Self::MeterPerSecond,
            unit::PERSECOND => Self::PerSecond,
            unit::DEGREE => Self::Degree,
            unit::MICROMETER => Self::Micrometer,
            other => Self::Other(other),
        }
    }
}

/// One value of a Mode property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeEntry {
    /// Numeric value accepted by `set_value`.
    pub value: f64,
    /// Normalised label, see [`normalize_label`].
    pub label: String,
}

/// Snapshot of a property's attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyAttribute {
    /// Property id.
    pub id: i32,
    /// Value type.
    pub kind: PropertyKind,
    /// Physical unit.
    pub unit: PropertyUnit,
    /// Readable through `get_value`.
    pub readable: bool,
    /// Writable through `set_value`.
    pub writable: bool,
    /// Writable while a capture is running.
    pub writable_while_busy: bool,
    /// Value may change without a write (sensor temperature and the like).
    pub volatile: bool,
    /// Base property of an array.
    pub is_array: bool,
    /// Element count of an array property.
    pub element_count: Option<u32>,
    /// Inclusive `(min, max)` range.
    pub range: Option<(f64, f64)>,
    /// Step between valid values.
    pub step: Option<f64>,
    /// Default value.
    pub default: Option<f64>,
    /// Valid values of a Mode property, in ascending order.
    pub modes: Vec<ModeEntry>,
}

impl PropertyAttribute {
    /// Label of a Mode value, if it is one of [`PropertyAttribute::modes`].
    pub fn label_of(&self, value: f64) -> Option<&str> {
        self.modes
            .iter()
            .find(|m| m.value == value)
            .map(|m| m.label.as_str())
    }

    /// Numeric value of a Mode label, compared after normalisation.
    pub fn value_of(&self, label: &str) -> Option<f64> {
        let wanted = normalize_label(label);
        self.modes.iter().find(|m| m.label == wanted).map(|m| m.value)
    }
}

/// Lower-case a vendor label and replace spaces with underscores.
///
/// ```
/// assert_eq!(daq_driver_dcam::property::normalize_label("MASTER PULSE"), "master_pulse");
/// ```
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace(' ', "_")
}

impl DeviceSession {
    /// Read the attributes of property `id`.
    pub fn get_attribute(&self, id: i32) -> Result<PropertyAttribute> {
        let raw = self.raw_attribute(id)?;
        let kind = match raw.attribute & attr::TYPE_MASK {
            attr::TYPE_MODE => PropertyKind::Mode,
            attr::TYPE_LONG => PropertyKind::Long,
            attr::TYPE_REAL => PropertyKind::Real,
            other => {
                return Err(DcamError::Value(format!(
                    "property 0x{id:08X} has unrecognized value type {other}"
                )))
            }
        };
        let has = |flag: u32| raw.attribute & flag != 0;

        let is_array = raw.attribute2 & attr::ARRAYBASE != 0;
        let element_count = if is_array && raw.number_of_element_prop != 0 {
            Some(self.get_value(raw.number_of_element_prop)?.max(0.0) as u32)
        } else {
            None
        };

        let range = has(attr::HASRANGE).then_some((raw.value_min, raw.value_max));
        let modes = if kind == PropertyKind::Mode {
            self.mode_values(id, range.map_or(0.0, |(min, _)| min))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(PropertyAttribute {
            id,
            kind,
            unit: PropertyUnit::from_raw(raw.unit),
            readable: has(attr::READABLE),
            writable: has(attr::WRITABLE),
            writable_while_busy: has(attr::WRITABLE) && has(attr::ACCESSBUSY),
            volatile: has(attr::VOLATILE),
            is_array,
            element_count,
            range,
            step: has(attr::HASSTEP).then_some(raw.value_step),
            default: has(attr::HASDEFAULT).then_some(raw.value_default),
            modes,
        })
    }

    /// Read property `id`.
    pub fn get_value(&self, id: i32) -> Result<f64> {
        let handle = self.handle("dcamprop_getvalue")?;
        let mut value = 0.0;
        let status = self.api().prop_get_value(handle, id, &mut value);
        self.reporter()
            .check(status, "dcamprop_getvalue", Some(handle))?;
        Ok(value)
    }

    /// Write property `id`.
    pub fn set_value(&self, id: i32, value: f64) -> Result<()> {
        let handle = self.handle("dcamprop_setvalue")?;
        let status = self.api().prop_set_value(handle, id, value);
        tracing::debug!(prop = id, value, %status, "dcamprop_setvalue");
        self.reporter()
            .check(status, "dcamprop_setvalue", Some(handle))
    }

    /// Write property `id` and return the value the device actually applied.
    pub fn set_get_value(&self, id: i32, value: f64) -> Result<f64> {
        self.set_get_value_with(id, value, option::NONE)
    }

    /// Like [`set_get_value`](Self::set_get_value) with an explicit option,
    /// e.g. [`option::NEAREST`] to clamp out-of-range requests.
    pub fn set_get_value_with(&self, id: i32, value: f64, opt: i32) -> Result<f64> {
        let handle = self.handle("dcamprop_setgetvalue")?;
        let mut applied = value;
        let status = self.api().prop_set_get_value(handle, id, &mut applied, opt);
        tracing::debug!(prop = id, value, applied, %status, "dcamprop_setgetvalue");
        self.reporter()
            .check(status, "dcamprop_setgetvalue", Some(handle))?;
        Ok(applied)
    }

    /// Ask the device for a value relative to `value`, e.g. [`option::NEXT`].
    pub fn query_value(&self, id: i32, value: f64, opt: i32) -> Result<f64> {
        let handle = self.handle("dcamprop_queryvalue")?;
        let mut result = value;
        let status = self.api().prop_query_value(handle, id, &mut result, opt);
        self.reporter()
            .check(status, "dcamprop_queryvalue", Some(handle))?;
        Ok(result)
    }

    /// Next supported property id after `id` (0 starts the walk).
    pub fn get_next_id(&self, id: i32) -> Result<i32> {
        let handle = self.handle("dcamprop_getnextid")?;
        let mut next = id;
        let status = self
            .api()
            .prop_get_next_id(handle, &mut next, option::SUPPORT);
        self.reporter()
            .check(status, "dcamprop_getnextid", Some(handle))?;
        Ok(next)
    }

    /// Vendor name of property `id`.
    pub fn get_name(&self, id: i32) -> Result<String> {
        let handle = self.handle("dcamprop_getname")?;
        let mut text = vec![0u8; self.limits().name];
        let status = self.api().prop_get_name(handle, id, &mut text);
        self.reporter()
            .check(status, "dcamprop_getname", Some(handle))?;
        Ok(decode_text(&text))
    }

    /// Vendor label of `value` for Mode property `id`.
    pub fn get_value_text(&self, id: i32, value: f64) -> Result<String> {
        let handle = self.handle("dcamprop_getvaluetext")?;
        let mut text = vec![0u8; self.limits().value];
        let status = self
            .api()
            .prop_get_value_text(handle, id, value, &mut text);
        self.reporter()
            .check(status, "dcamprop_getvaluetext", Some(handle))?;
        Ok(decode_text(&text))
    }

    /// Every supported property id, ascending.
    pub fn property_ids(&self) -> PropertyIds<'_> {
        PropertyIds {
            session: self,
            current: 0,
            done: false,
        }
    }

    /// Every supported property as `(id, vendor name)`.
    pub fn properties(&self) -> impl Iterator<Item = Result<(i32, String)>> + '_ {
        self.property_ids()
            .map(move |id| id.and_then(|id| Ok((id, self.get_name(id)?))))
    }

    /// Values of Mode property `id`, starting at `start`.
    ///
    /// The walk ends when the device reports `OutOfRange` for the next
    /// value. Any other failure is yielded once and ends the walk.
    pub fn mode_values(&self, id: i32, start: f64) -> ModeValues<'_> {
        ModeValues {
            session: self,
            id,
            next: Some(Ok(start)),
        }
    }

    fn raw_attribute(&self, id: i32) -> Result<RawPropAttr> {
        let handle = self.handle("dcamprop_getattr")?;
        let mut raw = RawPropAttr::default();
        let status = self.api().prop_get_attr(handle, id, &mut raw);
        self.reporter()
            .check(status, "dcamprop_getattr", Some(handle))?;
        Ok(raw)
    }
}

/// Iterator over supported property ids. See [`DeviceSession::property_ids`].
#[derive(Debug)]
pub struct PropertyIds<'a> {
    session: &'a DeviceSession,
    current: i32,
    done: bool,
}

impl Iterator for PropertyIds<'_> {
    type Item = Result<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.get_next_id(self.current) {
            Ok(id) if id > self.current => {
                self.current = id;
                Some(Ok(id))
            }
            Ok(id) => {
                tracing::trace!(id, "property walk stalled");
                self.done = true;
                None
            }
            Err(e) if e.kind() == Some(ErrorKind::NoProperty) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over the values of a Mode property. See [`DeviceSession::mode_values`].
#[derive(Debug)]
pub struct ModeValues<'a> {
    session: &'a DeviceSession,
    id: i32,
    next: Option<Result<f64>>,
}

impl Iterator for ModeValues<'_> {
    type Item = Result<ModeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = match self.next.take()? {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };
        let label = match self.session.get_value_text(self.id, value) {
            Ok(label) => normalize_label(&label),
            Err(e) => return Some(Err(e)),
        };
        self.next = match self.session.query_value(self.id, value, option::NEXT) {
            Ok(next) if next > value => Some(Ok(next)),
            Ok(_) => None,
            Err(e) if e.kind() == Some(ErrorKind::OutOfRange) => None,
            Err(e) => Some(Err(e)),
        };
        tracing::trace!(prop = self.id, value, %label, "mode value");
        Some(Ok(ModeEntry { value, label }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("MASTER PULSE"), "master_pulse");
        assert_eq!(normalize_label("EXPOSURE TIME"), "exposure_time");
        assert_eq!(normalize_label(" 1X1 "), "1x1");
    }

    #[test]
    fn test_unit_mapping() {
        assert_eq!(PropertyUnit::from_raw(unit::SECOND), PropertyUnit::Second);
        assert_eq!(PropertyUnit::from_raw(42), PropertyUnit::Other(42));
    }

    #[test]
    fn test_mode_lookup() {
        let attribute = PropertyAttribute {
            id: 1,
            kind: PropertyKind::Mode,
            unit: PropertyUnit::None,
            readable: true,
            writable: true,
            writable_while_busy: false,
            volatile: false,
            is_array: false,
            element_count: None,
            range: Some((1.0, 2.0)),
            step: None,
            default: Some(1.0),
            modes: vec![
                ModeEntry {
                    value: 1.0,
                    label: "off".into(),
                },
                ModeEntry {
                    value: 2.0,
                    label: "on".into(),
                },
            ],
        };
        assert_eq!(attribute.label_of(2.0), Some("on"));
        assert_eq!(attribute.value_of("OFF"), Some(1.0));
        assert_eq!(attribute.value_of("auto"), None);
    }
}
