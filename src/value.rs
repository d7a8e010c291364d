//! Value types for query parameters and results.

use crate::error::{Error, Result};
use crate::protocol::{self, value::Kind};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use std::time::{Duration, SystemTime};

/// A database value that can be used as a parameter or returned from a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Timestamp
    Timestamp(SystemTime),
}

impl Value {
    /// Convert a Value to its wire representation.
    pub fn to_wire(&self) -> protocol::Value {
        let kind = match self {
            Value::Null => None,
            Value::Bool(v) => Some(Kind::Bool(*v)),
            Value::Int32(v) => Some(Kind::Int32(*v)),
            Value::Int64(v) => Some(Kind::Int64(*v)),
            Value::Float(v) => Some(Kind::Float(*v)),
            Value::Double(v) => Some(Kind::Double(*v)),
            Value::String(v) => Some(Kind::String(v.clone())),
            Value::Bytes(v) => Some(Kind::Bytes(v.clone())),
            Value::Timestamp(v) => Some(Kind::Timestamp(prost_types::Timestamp::from(*v))),
        };
        protocol::Value { kind }
    }

    /// Convert a wire value back into a Value.
    pub fn from_wire(value: protocol::Value) -> Result<Value> {
        Ok(match value.kind {
            None => Value::Null,
            Some(Kind::Bool(v)) => Value::Bool(v),
            Some(Kind::Int32(v)) => Value::Int32(v),
            Some(Kind::Int64(v)) => Value::Int64(v),
            Some(Kind::Float(v)) => Value::Float(v),
            Some(Kind::Double(v)) => Value::Double(v),
            Some(Kind::String(v)) => Value::String(v),
            Some(Kind::Bytes(v)) => Value::Bytes(v),
            Some(Kind::Timestamp(ts)) => Value::Timestamp(
                SystemTime::try_from(ts)
                    .map_err(|e| Error::TypeConversion(format!("Invalid timestamp: {}", e)))?,
            ),
        })
    }

    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

pub(crate) fn to_wire_all(values: &[Value]) -> Vec<protocol::Value> {
    values.iter().map(Value::to_wire).collect()
}

pub(crate) fn from_wire_all(values: Vec<protocol::Value>) -> Result<Vec<Value>> {
    values.into_iter().map(Value::from_wire).collect()
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v as i64)),
            Value::Int32(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v as i64)),
            Value::Int64(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v as f64)),
            Value::Double(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Timestamp(v) => ToSqlOutput::Owned(unix_seconds(v)?),
        })
    }
}

/// Signed offset from the Unix epoch as SQLite stores it: whole seconds as an
/// integer, anything finer as a real.
fn unix_seconds(t: &SystemTime) -> rusqlite::Result<rusqlite::types::Value> {
    let (negative, offset) = match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (false, d),
        Err(e) => (true, e.duration()),
    };
    if offset.subsec_nanos() == 0 {
        let secs = i64::try_from(offset.as_secs())
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(rusqlite::types::Value::Integer(if negative { -secs } else { secs }))
    } else {
        let secs = offset.as_secs_f64();
        Ok(rusqlite::types::Value::Real(if negative { -secs } else { secs }))
    }
}

fn from_unix(offset: Duration, negative: bool) -> Option<SystemTime> {
    if negative {
        SystemTime::UNIX_EPOCH.checked_sub(offset)
    } else {
        SystemTime::UNIX_EPOCH.checked_add(offset)
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(v) => Value::Int64(v),
            rusqlite::types::Value::Real(v) => Value::Double(v),
            rusqlite::types::Value::Text(v) => Value::String(v),
            rusqlite::types::Value::Blob(v) => Value::Bytes(v),
        }
    }
}

/// Conversion out of a column value, used by [`crate::Row::get`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::TypeConversion(format!(
        "cannot convert {:?} to {}",
        value, target
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int64(v) => Ok(*v),
            Value::Int32(v) => Ok(*v as i64),
            Value::Bool(v) => Ok(*v as i64),
            _ => mismatch(value, "i64"),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| Error::TypeConversion(format!("{} out of range for i32", wide)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            Value::Float(v) => Ok(*v as f64),
            Value::Int64(v) => Ok(*v as f64),
            Value::Int32(v) => Ok(*v as f64),
            _ => mismatch(value, "f64"),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int64(v) => Ok(*v != 0),
            Value::Int32(v) => Ok(*v != 0),
            _ => mismatch(value, "bool"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v.clone()),
            Value::Bytes(v) => String::from_utf8(v.clone())
                .map_err(|e| Error::TypeConversion(e.to_string())),
            _ => mismatch(value, "String"),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v.clone()),
            Value::String(v) => Ok(v.as_bytes().to_vec()),
            _ => mismatch(value, "Vec<u8>"),
        }
    }
}

impl FromValue for SystemTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(*v),
            Value::Int64(secs) => from_unix(Duration::from_secs(secs.unsigned_abs()), *secs < 0)
                .map_or_else(|| mismatch(value, "SystemTime"), Ok),
            Value::Double(secs) => Duration::try_from_secs_f64(secs.abs())
                .ok()
                .and_then(|offset| from_unix(offset, *secs < 0.0))
                .map_or_else(|| mismatch(value, "SystemTime"), Ok),
            _ => mismatch(value, "SystemTime"),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

// Implement From traits for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<SystemTime> for Value {
    fn from(v: SystemTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
