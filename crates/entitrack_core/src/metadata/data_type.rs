//! Property data types and value coercion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use entitrack_codec::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declared data type of a data property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// UTF-8 text.
    String,
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Decimal, held as a double.
    Decimal,
    /// Double-precision float.
    Double,
    /// Single-precision float, held as a double.
    Single,
    /// Boolean.
    Boolean,
    /// Point in time (UTC).
    DateTime,
    /// GUID.
    Guid,
    /// Raw bytes.
    Binary,
    /// Structured value described by a complex type.
    Complex,
}

/// Default for non-nullable date properties: 1900-01-01T00:00:00Z.
pub fn default_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl DataType {
    /// Returns the type name.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "String",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Decimal => "Decimal",
            DataType::Double => "Double",
            DataType::Single => "Single",
            DataType::Boolean => "Boolean",
            DataType::DateTime => "DateTime",
            DataType::Guid => "Guid",
            DataType::Binary => "Binary",
            DataType::Complex => "Complex",
        }
    }

    /// Returns true for integer types.
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int16 | DataType::Int32 | DataType::Int64)
    }

    /// Returns true for floating point types.
    pub fn is_floating(&self) -> bool {
        matches!(
            self,
            DataType::Decimal | DataType::Double | DataType::Single
        )
    }

    /// Returns true for any numeric type.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    /// Value given to a non-nullable property with no declared default.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::String => Value::Text(String::new()),
            DataType::Int16 | DataType::Int32 | DataType::Int64 => Value::Integer(0),
            DataType::Decimal | DataType::Double | DataType::Single => Value::Float(0.0),
            DataType::Boolean => Value::Bool(false),
            DataType::DateTime => Value::DateTime(default_date()),
            DataType::Guid => Value::Guid(Uuid::nil()),
            DataType::Binary => Value::Bytes(Vec::new()),
            DataType::Complex => Value::Null,
        }
    }

    /// Converts a value to this data type.
    ///
    /// Null passes through; nullability is the caller's concern. Returns a
    /// message describing the failure when no conversion exists.
    pub fn coerce(&self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (DataType::String, Value::Text(s)) => Ok(Value::Text(s)),
            (dt, Value::Text(s)) => dt.parse_text(&s),
            (dt, Value::Integer(n)) if dt.is_integer() => dt.check_range(n),
            (dt, Value::Float(x)) if dt.is_integer() => {
                let n = x as i64;
                if x.fract() == 0.0 && (n as f64) == x {
                    dt.check_range(n)
                } else {
                    Err(format!("{x} is not an integral value"))
                }
            }
            (dt, Value::Integer(n)) if dt.is_floating() => Ok(Value::Float(n as f64)),
            (dt, Value::Float(x)) if dt.is_floating() => Ok(Value::Float(x)),
            (DataType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
            (DataType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
            (DataType::DateTime, Value::Integer(ms)) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .map(Value::DateTime)
                .ok_or_else(|| format!("{ms} is not a valid epoch millisecond timestamp")),
            (DataType::Guid, Value::Guid(g)) => Ok(Value::Guid(g)),
            (DataType::Binary, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (DataType::Complex, v @ Value::Map(_)) => Ok(v),
            (dt, other) => Err(format!("cannot convert {} to {}", other.kind(), dt.name())),
        }
    }

    /// Parses text input for a non-string type.
    fn parse_text(&self, text: &str) -> Result<Value, String> {
        let trimmed = text.trim();
        let fail = || format!("cannot parse '{text}' as {}", self.name());
        match self {
            DataType::String => Ok(Value::Text(text.to_string())),
            DataType::Int16 | DataType::Int32 | DataType::Int64 => trimmed
                .parse::<i64>()
                .map_err(|_| fail())
                .and_then(|n| self.check_range(n)),
            DataType::Decimal | DataType::Double | DataType::Single => trimmed
                .parse::<f64>()
                .ok()
                .filter(|x| !x.is_nan())
                .map(Value::Float)
                .ok_or_else(fail),
            DataType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            DataType::DateTime => parse_date(trimmed).map(Value::DateTime).ok_or_else(fail),
            DataType::Guid => Uuid::parse_str(trimmed)
                .map(Value::Guid)
                .map_err(|_| fail()),
            DataType::Binary | DataType::Complex => Err(fail()),
        }
    }

    fn check_range(&self, n: i64) -> Result<Value, String> {
        let ok = match self {
            DataType::Int16 => i16::try_from(n).is_ok(),
            DataType::Int32 => i32::try_from(n).is_ok(),
            _ => true,
        };
        if ok {
            Ok(Value::Integer(n))
        } else {
            Err(format!("{n} is out of range for {}", self.name()))
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses RFC 3339 timestamps, naive date-times (taken as UTC) and plain
/// dates (midnight UTC).
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
