//! Runtime values and their byte encodings.
//!
//! Every cell the engine touches is a [`Value`]; every column carries a
//! declared [`SqlType`]. This module also owns the two byte encodings of a
//! typed value:
//!
//! - the **payload encoding** stored inside row entries (fixed-width
//!   big-endian for numerics, raw bytes for strings and blobs), and
//! - the **ordered encoding** embedded in keys, where lexicographic byte
//!   order must match the type's natural order (length-prefixed for
//!   strings and blobs so that "foo" and "foobar" stay distinguishable).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SqlError, SqlResult};

/// Column types supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// Unsigned 64-bit integer.
    Integer,
    /// UTF-8 string.
    String,
    /// Boolean.
    Boolean,
    /// Opaque byte sequence.
    Blob,
    /// Unsigned 64-bit nanoseconds since the Unix epoch.
    Timestamp,
}

impl SqlType {
    /// The single-byte tag persisted in catalog column keys.
    pub const fn tag(self) -> u8 {
        match self {
            SqlType::Integer => 1,
            SqlType::String => 2,
            SqlType::Boolean => 3,
            SqlType::Blob => 4,
            SqlType::Timestamp => 5,
        }
    }

    /// Decodes a persisted type tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(SqlType::Integer),
            2 => Some(SqlType::String),
            3 => Some(SqlType::Boolean),
            4 => Some(SqlType::Blob),
            5 => Some(SqlType::Timestamp),
            _ => None,
        }
    }

    /// Returns true if values of this type have a natural order.
    ///
    /// Boolean is the only unordered type; it supports equality but not
    /// range comparison.
    pub fn is_ordered(self) -> bool {
        !matches!(self, SqlType::Boolean)
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer => write!(f, "INTEGER"),
            SqlType::String => write!(f, "STRING"),
            SqlType::Boolean => write!(f, "BOOLEAN"),
            SqlType::Blob => write!(f, "BLOB"),
            SqlType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent value. Compares unequal to everything, including itself.
    Null,
    /// Unsigned 64-bit integer.
    Integer(u64),
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Boolean(bool),
    /// Opaque byte sequence.
    Blob(Vec<u8>),
    /// Unsigned 64-bit nanoseconds since the Unix epoch.
    Timestamp(u64),
}

impl Value {
    /// Returns true if this value is absent.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the type of a present value, or `None` for `Null`.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(SqlType::Integer),
            Value::String(_) => Some(SqlType::String),
            Value::Boolean(_) => Some(SqlType::Boolean),
            Value::Blob(_) => Some(SqlType::Blob),
            Value::Timestamp(_) => Some(SqlType::Timestamp),
        }
    }

    /// Encodes the payload bytes stored inside a row entry.
    ///
    /// Fails on `Null`: absent values are never written.
    pub fn encode_payload(&self) -> SqlResult<Vec<u8>> {
        match self {
            Value::Null => Err(SqlError::InvalidValue),
            Value::Integer(v) | Value::Timestamp(v) => Ok(v.to_be_bytes().to_vec()),
            Value::Boolean(b) => Ok(vec![u8::from(*b)]),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Blob(b) => Ok(b.clone()),
        }
    }

    /// Decodes payload bytes for a column of the given type.
    pub fn decode_payload(ty: SqlType, bytes: &[u8]) -> SqlResult<Value> {
        match ty {
            SqlType::Integer | SqlType::Timestamp => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| SqlError::InvalidValue)?;
                let v = u64::from_be_bytes(raw);
                Ok(if ty == SqlType::Integer {
                    Value::Integer(v)
                } else {
                    Value::Timestamp(v)
                })
            }
            SqlType::Boolean => match bytes {
                [0] => Ok(Value::Boolean(false)),
                [1] => Ok(Value::Boolean(true)),
                _ => Err(SqlError::InvalidValue),
            },
            SqlType::String => {
                let s = std::str::from_utf8(bytes).map_err(|_| SqlError::InvalidValue)?;
                Ok(Value::String(s.to_string()))
            }
            SqlType::Blob => Ok(Value::Blob(bytes.to_vec())),
        }
    }

    /// Encodes the order-preserving form embedded in keys.
    ///
    /// Numerics become big-endian fixed width so byte order equals numeric
    /// order; strings and blobs are length-prefixed so no encoding is a
    /// prefix of another within a key position.
    pub fn encode_ordered(&self) -> SqlResult<Vec<u8>> {
        match self {
            Value::Null => Err(SqlError::InvalidValue),
            Value::Integer(v) | Value::Timestamp(v) => Ok(v.to_be_bytes().to_vec()),
            Value::Boolean(b) => Ok(vec![u8::from(*b)]),
            Value::String(s) => Ok(Self::length_prefixed(s.as_bytes())),
            Value::Blob(b) => Ok(Self::length_prefixed(b)),
        }
    }

    fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + bytes.len());
        out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(bytes);
        out
    }

    /// Equality under SQL semantics.
    ///
    /// `Null` compared to anything (itself included) is false. Present
    /// values of different types are not comparable.
    pub fn sql_eq(&self, other: &Value) -> SqlResult<bool> {
        let (lt, rt) = match (self.sql_type(), other.sql_type()) {
            (Some(lt), Some(rt)) => (lt, rt),
            _ => return Ok(false),
        };
        if lt != rt {
            return Err(SqlError::NotComparableValues);
        }
        Ok(self == other)
    }

    /// Ordering under SQL semantics.
    ///
    /// Returns `None` when either side is absent (the comparison is then
    /// not true). Present values must share an ordered type.
    pub fn sql_cmp(&self, other: &Value) -> SqlResult<Option<Ordering>> {
        let (lt, rt) = match (self.sql_type(), other.sql_type()) {
            (Some(lt), Some(rt)) => (lt, rt),
            _ => return Ok(None),
        };
        if lt != rt || !lt.is_ordered() {
            return Err(SqlError::NotComparableValues);
        }
        let ord = match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => unreachable!("type equality checked above"),
        };
        Ok(Some(ord))
    }

    /// Total order used for materialized sorts and MIN/MAX accumulation.
    ///
    /// `Null` sorts before any present value; present values are assumed to
    /// share a type (they come from a single column).
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            // Mixed types only arise from malformed rows; fall back to tags.
            (a, b) => {
                let at = a.sql_type().map(SqlType::tag).unwrap_or(0);
                let bt = b.sql_type().map(SqlType::tag).unwrap_or(0);
                at.cmp(&bt)
            }
        }
    }

    /// Interprets this value as a filter condition.
    ///
    /// `Null` is not true (the row is filtered out); a present non-boolean
    /// value is an invalid condition.
    pub fn as_condition(&self) -> SqlResult<bool> {
        match self {
            Value::Null => Ok(false),
            Value::Boolean(b) => Ok(*b),
            _ => Err(SqlError::InvalidValue),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "'{s}'"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Blob(b) => {
                write!(f, "b'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "'")
            }
            Value::Timestamp(v) => write!(f, "ts:{v}"),
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v as u64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64 as u64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}
