//! Engine property values and their host-side counterparts.
//!
//! The engine speaks in tagged [`PropVariant`]s identified by a [`PropId`];
//! the host sees plain [`Value`]s. Conversion is lossless for the types the
//! bridge uses and degrades to [`Value::Nil`] for everything else.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// 100ns ticks between 1601-01-01 and 1970-01-01.
pub const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Engine property identifiers used by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PropId {
    Path = 3,
    IsDir = 6,
    Size = 7,
    PackSize = 8,
    Attrib = 9,
    CTime = 10,
    ATime = 11,
    MTime = 12,
    Solid = 13,
    Encrypted = 15,
    Crc = 19,
    IsAnti = 21,
    Method = 22,
    User = 25,
    Group = 26,
    NumBlocks = 38,
    PhySize = 44,
    HeadersSize = 45,
    PosixAttrib = 53,
}

/// Type tag of a [`PropVariant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Empty,
    Bool,
    I4,
    I8,
    UI4,
    UI8,
    Str,
    FileTime,
    Other(u16),
}

/// A tagged engine value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropVariant {
    #[default]
    Empty,
    Bool(bool),
    I4(i32),
    I8(i64),
    UI4(u32),
    UI8(u64),
    Str(String),
    /// 100ns ticks since 1601-01-01 UTC.
    FileTime(u64),
    /// A variant type the bridge does not understand, by its raw tag.
    Unsupported(u16),
}

impl PropVariant {
    pub fn var_type(&self) -> VarType {
        match self {
            PropVariant::Empty => VarType::Empty,
            PropVariant::Bool(_) => VarType::Bool,
            PropVariant::I4(_) => VarType::I4,
            PropVariant::I8(_) => VarType::I8,
            PropVariant::UI4(_) => VarType::UI4,
            PropVariant::UI8(_) => VarType::UI8,
            PropVariant::Str(_) => VarType::Str,
            PropVariant::FileTime(_) => VarType::FileTime,
            PropVariant::Unsupported(vt) => VarType::Other(*vt),
        }
    }

    /// Keeps the value only if it carries the expected type.
    pub fn expect(self, vt: VarType) -> PropVariant {
        if self.var_type() == vt {
            self
        } else {
            PropVariant::Empty
        }
    }
}

/// A property value as seen by host code.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<PropVariant> for Value {
    fn from(prop: PropVariant) -> Self {
        match prop {
            PropVariant::Empty => Value::Nil,
            PropVariant::Bool(b) => Value::Bool(b),
            PropVariant::I4(v) => Value::Int(v.into()),
            PropVariant::I8(v) => Value::Int(v),
            PropVariant::UI4(v) => Value::UInt(v.into()),
            PropVariant::UI8(v) => Value::UInt(v),
            PropVariant::Str(s) => Value::Str(s),
            PropVariant::FileTime(ft) => filetime_to_datetime(ft).map_or(Value::Nil, Value::Time),
            PropVariant::Unsupported(vt) => {
                tracing::warn!(vt, "unsupported property variant type, using nil");
                Value::Nil
            }
        }
    }
}

/// Converts a host value to the engine type `vt`. Values that do not fit the
/// requested type become [`PropVariant::Empty`].
pub fn value_to_prop(value: &Value, vt: VarType) -> PropVariant {
    match (vt, value) {
        (_, Value::Nil) => PropVariant::Empty,
        (VarType::Bool, Value::Bool(b)) => PropVariant::Bool(*b),
        (VarType::Str, Value::Str(s)) => PropVariant::Str(s.clone()),
        (VarType::UI4, v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map_or(PropVariant::Empty, PropVariant::UI4),
        (VarType::UI8, v) => v.as_u64().map_or(PropVariant::Empty, PropVariant::UI8),
        (VarType::I8, Value::Int(n)) => PropVariant::I8(*n),
        (VarType::FileTime, Value::Time(t)) => PropVariant::FileTime(datetime_to_filetime(t)),
        (vt, v) => {
            tracing::warn!(?vt, value = ?v, "value does not fit property type");
            PropVariant::Empty
        }
    }
}

/// FILETIME ticks to a UTC timestamp. Times before the Unix epoch are kept;
/// values outside chrono's range give `None`.
pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    let ticks = i128::from(ft) - i128::from(FILETIME_UNIX_EPOCH);
    let secs = ticks.div_euclid(10_000_000);
    let nanos = (ticks.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(i64::try_from(secs).ok()?, nanos).single()
}

/// UTC timestamp to FILETIME ticks, saturating at the FILETIME range.
pub fn datetime_to_filetime(t: &DateTime<Utc>) -> u64 {
    let ticks = i128::from(t.timestamp()) * 10_000_000
        + i128::from(t.timestamp_subsec_nanos() / 100)
        + i128::from(FILETIME_UNIX_EPOCH);
    ticks.clamp(0, i128::from(u64::MAX)) as u64
}
