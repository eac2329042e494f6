use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{CairnError, Result};

/// Size of the length prefix in front of VarChar and Raw payloads
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// The value types a column can hold.
/// `Raw` only exists for values that have not been resolved against a column yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Unparsed textual token: 4-byte length + UTF-8 bytes
    Raw,
    /// 64-bit signed integer: 8 bytes, little-endian
    Integer,
    /// 64-bit floating point: 8 bytes, IEEE 754
    Float,
    /// Variable-length string: 4-byte length + UTF-8 bytes
    VarChar,
}

impl ValueType {
    /// Returns the tag used for this type in schema descriptors.
    pub fn tag(&self) -> u8 {
        match self {
            ValueType::Raw => 0,
            ValueType::Integer => 1,
            ValueType::Float => 2,
            ValueType::VarChar => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueType::Raw),
            1 => Some(ValueType::Integer),
            2 => Some(ValueType::Float),
            3 => Some(ValueType::VarChar),
            _ => None,
        }
    }

    /// Returns the fixed payload size, or None for length-prefixed types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            ValueType::Integer | ValueType::Float => Some(8),
            ValueType::VarChar | ValueType::Raw => None,
        }
    }

    /// Smallest byte length a column of this type can be declared with.
    pub fn min_byte_length(&self) -> usize {
        self.fixed_size().unwrap_or(LENGTH_PREFIX_SIZE)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Raw => write!(f, "RAW"),
            ValueType::Integer => write!(f, "INTEGER"),
            ValueType::Float => write!(f, "FLOAT"),
            ValueType::VarChar => write!(f, "VARCHAR"),
        }
    }
}

/// Represents a typed value stored in a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point
    Float(f64),

    /// String value
    VarChar(String),

    /// Token from the SQL layer whose type is not known yet
    Raw(String),
}

/// Normalized form used by `Value::compare`
enum SortKey<'a> {
    Int(i64),
    Real(f64),
    Text(&'a str),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::VarChar(_) => ValueType::VarChar,
            Value::Raw(_) => ValueType::Raw,
        }
    }

    /// Returns the serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Integer(_) | Value::Float(_) => 8,
            Value::VarChar(s) | Value::Raw(s) => LENGTH_PREFIX_SIZE + s.len(),
        }
    }

    /// Writes the value's payload to `buf`. No type tag is written.
    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        match self {
            Value::Integer(v) => buf.put_i64_le(*v),
            Value::Float(v) => buf.put_f64_le(*v),
            Value::VarChar(s) | Value::Raw(s) => {
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        self.serialize(&mut bytes);
        bytes
    }

    /// Reads a value of type `value_type` from the front of `buf`, advancing it.
    pub fn deserialize<B: Buf>(buf: &mut B, value_type: ValueType) -> Result<Self> {
        match value_type {
            ValueType::Integer => {
                ensure_remaining(buf, 8, value_type)?;
                Ok(Value::Integer(buf.get_i64_le()))
            }
            ValueType::Float => {
                ensure_remaining(buf, 8, value_type)?;
                Ok(Value::Float(buf.get_f64_le()))
            }
            ValueType::VarChar | ValueType::Raw => {
                ensure_remaining(buf, LENGTH_PREFIX_SIZE, value_type)?;
                let len = buf.get_u32_le() as usize;
                ensure_remaining(buf, len, value_type)?;
                let mut text = vec![0u8; len];
                buf.copy_to_slice(&mut text);
                let text = String::from_utf8(text)
                    .map_err(|_| CairnError::corrupt("string value is not valid UTF-8"))?;
                if value_type == ValueType::Raw {
                    Ok(Value::Raw(text))
                } else {
                    Ok(Value::VarChar(text))
                }
            }
        }
    }

    /// Converts this value into one of type `target`.
    /// Raw tokens are parsed; quoted raw tokens (`'abc'`) become strings.
    pub fn resolve(&self, target: ValueType) -> Option<Value> {
        match (self, target) {
            (_, ValueType::Raw) => None,

            (Value::Integer(v), ValueType::Integer) => Some(Value::Integer(*v)),
            (Value::Integer(v), ValueType::Float) => Some(Value::Float(*v as f64)),
            (Value::Float(v), ValueType::Float) => Some(Value::Float(*v)),
            (Value::VarChar(s), ValueType::VarChar) => Some(Value::VarChar(s.clone())),

            (Value::Raw(token), ValueType::Integer) => {
                token.trim().parse::<i64>().ok().map(Value::Integer)
            }
            (Value::Raw(token), ValueType::Float) => {
                token.trim().parse::<f64>().ok().map(Value::Float)
            }
            (Value::Raw(token), ValueType::VarChar) => {
                Some(Value::VarChar(unquote(token).unwrap_or(token).to_string()))
            }

            _ => None,
        }
    }

    fn sort_key(&self) -> SortKey<'_> {
        match self {
            Value::Integer(v) => SortKey::Int(*v),
            Value::Float(v) => SortKey::Real(*v),
            Value::VarChar(s) => SortKey::Text(s),
            Value::Raw(token) => {
                if let Some(text) = unquote(token) {
                    SortKey::Text(text)
                } else if let Ok(v) = token.trim().parse::<i64>() {
                    SortKey::Int(v)
                } else if let Ok(v) = token.trim().parse::<f64>() {
                    SortKey::Real(v)
                } else {
                    SortKey::Text(token)
                }
            }
        }
    }

    /// Total ordering across representations: numbers compare numerically
    /// whatever their representation, strings compare bytewise, and every
    /// number sorts before every string.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self.sort_key(), other.sort_key()) {
            (SortKey::Int(a), SortKey::Int(b)) => a.cmp(&b),
            (SortKey::Int(a), SortKey::Real(b)) => (a as f64).total_cmp(&b),
            (SortKey::Real(a), SortKey::Int(b)) => a.total_cmp(&(b as f64)),
            (SortKey::Real(a), SortKey::Real(b)) => a.total_cmp(&b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Text(_), _) => Ordering::Greater,
            (_, SortKey::Text(_)) => Ordering::Less,
        }
    }
}

fn unquote(token: &str) -> Option<&str> {
    let token = token.trim();
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}

fn ensure_remaining<B: Buf>(buf: &B, needed: usize, value_type: ValueType) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CairnError::corrupt(format!(
            "truncated {value_type} value: need {needed} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::VarChar(s) => write!(f, "'{}'", s),
            Value::Raw(token) => write!(f, "{}", token),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::VarChar(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::VarChar(v.to_string())
    }
}
