use crate::error::{DeviceError, Result};
use crate::protocol::PropertyRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt::Debug;
use std::hash::Hash;

/// Closed set of property names for one device model
///
/// The derived ordering is the registry iteration order, which is also the
/// slot order of batched reads. Declare implementors with [`property_keys!`](crate::property_keys).
pub trait PropertyKey: Copy + Ord + Eq + Hash + Debug + Send + Sync + 'static {
    /// Name used in logs, events and the presentation layer
    fn name(self) -> &'static str;
}

/// Declare a [`PropertyKey`] enum with one name per variant
///
/// ```
/// miot_bridge::property_keys! {
///     pub enum LampProp {
///         Power => "power",
///         Brightness => "brightness",
///     }
/// }
///
/// use miot_bridge::PropertyKey;
/// assert_eq!(LampProp::Brightness.name(), "brightness");
/// ```
#[macro_export]
macro_rules! property_keys {
    (
        $( #[ $meta:meta ] )*
        $vis:vis enum $ident:ident {
            $( $( #[ $vmeta:meta ] )* $variant:ident => $name:literal ),* $(,)?
        }
    ) => {
        $( #[ $meta ] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis enum $ident {
            $( $( #[ $vmeta ] )* $variant ),*
        }

        impl $crate::PropertyKey for $ident {
            fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $name ),*
                }
            }
        }
    };
}

/// Semantic value type of a property
///
/// Accepts the MIoT format names (`uint8`, `int32`, ...) when deserialising.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyFormat {
    Bool,
    #[serde(
        alias = "uint8",
        alias = "uint16",
        alias = "uint32",
        alias = "int8",
        alias = "int16",
        alias = "int32",
        alias = "int64"
    )]
    Int,
    Float,
    Enum,
    String,
}

impl PropertyFormat {
    /// Zero value used before the first successful read
    pub fn default_value(self) -> Value {
        match self {
            PropertyFormat::Bool => Value::Bool(false),
            PropertyFormat::Int | PropertyFormat::Enum => Value::from(0),
            PropertyFormat::Float => Value::from(0.0),
            PropertyFormat::String => Value::String(String::new()),
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            PropertyFormat::Int | PropertyFormat::Enum | PropertyFormat::Float
        )
    }
}

/// One entry of the access list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessFlag {
    Read,
    Write,
    Notify,
}

/// Access rights of a property, written as `["read", "write", "notify"]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<AccessFlag>", into = "Vec<AccessFlag>")]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl Access {
    pub const READ: Access = Access {
        read: true,
        write: false,
        notify: true,
    };

    pub const WRITE: Access = Access {
        read: false,
        write: true,
        notify: false,
    };

    pub const READ_WRITE: Access = Access {
        read: true,
        write: true,
        notify: true,
    };
}

impl Default for Access {
    fn default() -> Self {
        Access::READ
    }
}

impl From<Vec<AccessFlag>> for Access {
    fn from(flags: Vec<AccessFlag>) -> Self {
        Access {
            read: flags.contains(&AccessFlag::Read),
            write: flags.contains(&AccessFlag::Write),
            notify: flags.contains(&AccessFlag::Notify),
        }
    }
}

impl From<Access> for Vec<AccessFlag> {
    fn from(access: Access) -> Self {
        let mut flags = Vec::new();
        if access.read {
            flags.push(AccessFlag::Read);
        }
        if access.write {
            flags.push(AccessFlag::Write);
        }
        if access.notify {
            flags.push(AccessFlag::Notify);
        }
        flags
    }
}

/// Inclusive numeric range, written as `[min, max]` or `[min, max, step]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub step: Option<f64>,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp `value` into `[min, max]`
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

impl TryFrom<Vec<f64>> for ValueRange {
    type Error = String;

    fn try_from(items: Vec<f64>) -> std::result::Result<Self, Self::Error> {
        match items.as_slice() {
            [min, max] if min <= max => Ok(ValueRange::new(*min, *max)),
            [min, max, step] if min <= max => Ok(ValueRange::new(*min, *max).with_step(*step)),
            _ => Err(format!("invalid value range {:?}", items)),
        }
    }
}

impl From<ValueRange> for Vec<f64> {
    fn from(range: ValueRange) -> Self {
        match range.step {
            Some(step) => vec![range.min, range.max, step],
            None => vec![range.min, range.max],
        }
    }
}

/// One allowed value of an enumerated property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueListItem {
    pub value: i64,
    pub description: String,
}

impl ValueListItem {
    pub fn new(value: i64, description: impl Into<String>) -> Self {
        Self {
            value,
            description: description.into(),
        }
    }
}

/// Declaration of a property as found in a device schema
///
/// Both ids are optional here so that malformed declarations can be
/// rejected at registration time instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyConfig {
    #[serde(default)]
    pub siid: Option<u32>,
    #[serde(default)]
    pub piid: Option<u32>,
    pub format: PropertyFormat,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_list: Vec<ValueListItem>,
}

impl PropertyConfig {
    pub fn new(siid: u32, piid: u32, format: PropertyFormat) -> Self {
        Self {
            siid: Some(siid),
            piid: Some(piid),
            format,
            access: Access::default(),
            unit: None,
            value_range: None,
            value_list: Vec::new(),
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn range(mut self, range: ValueRange) -> Self {
        self.value_range = Some(range);
        self
    }

    pub fn list(mut self, list: Vec<ValueListItem>) -> Self {
        self.value_list = list;
        self
    }
}

/// A typed, addressable device property together with its last known value
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    name: String,
    siid: u32,
    piid: u32,
    format: PropertyFormat,
    access: Access,
    unit: Option<String>,
    value_range: Option<ValueRange>,
    value_list: Vec<ValueListItem>,
    value: Value,
}

impl Property {
    /// Build a property from its declaration, rejecting missing name or ids
    pub fn from_config(name: impl Into<String>, config: PropertyConfig) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DeviceError::Config(
                "property declared without a name".to_string(),
            ));
        }

        let (siid, piid) = match (config.siid, config.piid) {
            (Some(siid), Some(piid)) => (siid, piid),
            _ => {
                return Err(DeviceError::Config(format!(
                    "property {} is missing siid/piid",
                    name
                )))
            }
        };

        Ok(Self {
            name,
            siid,
            piid,
            format: config.format,
            access: config.access,
            unit: config.unit,
            value_range: config.value_range,
            value_list: config.value_list,
            value: config.format.default_value(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn siid(&self) -> u32 {
        self.siid
    }

    pub fn piid(&self) -> u32 {
        self.piid
    }

    pub fn format(&self) -> PropertyFormat {
        self.format
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn is_readable(&self) -> bool {
        self.access.read
    }

    pub fn is_writable(&self) -> bool {
        self.access.write
    }

    pub fn is_notifiable(&self) -> bool {
        self.access.notify
    }

    /// Last known value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Last known value, or `0` when it is undefined
    pub fn safe_value(&self) -> Value {
        if self.value.is_null() {
            Value::from(0)
        } else {
            self.value.clone()
        }
    }

    /// Overwrite the cached value without contacting the device
    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }

    pub fn has_value_range(&self) -> bool {
        self.value_range.is_some()
    }

    pub fn value_range(&self) -> Option<ValueRange> {
        self.value_range
    }

    pub fn has_value_list(&self) -> bool {
        !self.value_list.is_empty()
    }

    pub fn value_list(&self) -> &[ValueListItem] {
        &self.value_list
    }

    /// Look up an enumerated value by its description (case-insensitive)
    pub fn value_for_description(&self, description: &str) -> Option<i64> {
        self.value_list
            .iter()
            .find(|item| item.description.eq_ignore_ascii_case(description))
            .map(|item| item.value)
    }

    pub fn description_for_value(&self, value: i64) -> Option<&str> {
        self.value_list
            .iter()
            .find(|item| item.value == value)
            .map(|item| item.description.as_str())
    }

    /// Read request item for device `did`
    pub fn read_request(&self, did: &str) -> PropertyRequest {
        PropertyRequest {
            did: did.to_string(),
            siid: self.siid,
            piid: self.piid,
            value: None,
        }
    }

    /// Write request item for device `did` carrying `value`
    pub fn write_request(&self, did: &str, value: Value) -> PropertyRequest {
        PropertyRequest {
            did: did.to_string(),
            siid: self.siid,
            piid: self.piid,
            value: Some(value),
        }
    }

    /// Convert a raw wire value to the declared format
    ///
    /// Returns `None` for values that have no sensible conversion.
    pub fn normalize(&self, raw: &Value) -> Option<Value> {
        match self.format {
            PropertyFormat::Bool => match raw {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
                Value::String(s) => match s.as_str() {
                    "true" | "1" | "on" => Some(Value::Bool(true)),
                    "false" | "0" | "off" => Some(Value::Bool(false)),
                    _ => None,
                },
                _ => None,
            },
            PropertyFormat::Int | PropertyFormat::Enum => match raw {
                Value::Number(n) if n.is_i64() || n.is_u64() => Some(raw.clone()),
                Value::Number(n) => n.as_f64().and_then(integral),
                Value::Bool(b) => Some(Value::from(i64::from(*b))),
                Value::String(s) => s.trim().parse::<f64>().ok().and_then(integral),
                _ => None,
            },
            PropertyFormat::Float => match raw {
                Value::Number(n) => n.as_f64().and_then(float),
                Value::Bool(b) => float(if *b { 1.0 } else { 0.0 }),
                Value::String(s) => s.trim().parse::<f64>().ok().and_then(float),
                _ => None,
            },
            PropertyFormat::String => match raw {
                Value::String(_) => Some(raw.clone()),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
        }
    }

    /// Clamp a numeric value into the declared range, if any
    ///
    /// Values already within range and non-numeric values pass through.
    pub fn clamp_to_range(&self, value: Value) -> Value {
        let (Some(range), Some(raw)) = (self.value_range, value.as_f64()) else {
            return value;
        };
        if !self.format.is_numeric() || range.contains(raw) {
            return value;
        }

        let clamped = Value::from(range.clamp(raw));
        self.normalize(&clamped).unwrap_or(clamped)
    }
}

fn integral(f: f64) -> Option<Value> {
    if f.is_finite() {
        Some(Value::from(f.round() as i64))
    } else {
        None
    }
}

fn float(f: f64) -> Option<Value> {
    Number::from_f64(f).map(Value::Number)
}
