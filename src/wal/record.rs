use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{CairnError, Result, RowTag};
use crate::tuple::{SchemaDescriptor, Value};

/// Size of the `log_type` field
pub const LOG_TYPE_SIZE: usize = 1;

/// Header size of a Delete record: log_type + record_tag
pub const DELETE_HEADER_SIZE: usize = LOG_TYPE_SIZE + 8;

/// Header size of an Update record: log_type + record_tag + body_length
pub const UPDATE_HEADER_SIZE: usize = DELETE_HEADER_SIZE + 4;

/// Kind of change a log record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogKind {
    Update,
    Delete,
}

impl LogKind {
    pub fn as_u8(&self) -> u8 {
        match self {
            LogKind::Update => 1,
            LogKind::Delete => 2,
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(LogKind::Update),
            2 => Some(LogKind::Delete),
            _ => None,
        }
    }

    /// Size of the on-disk header of a record of this kind.
    pub fn header_size(&self) -> usize {
        match self {
            LogKind::Update => UPDATE_HEADER_SIZE,
            LogKind::Delete => DELETE_HEADER_SIZE,
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogKind::Update => write!(f, "update"),
            LogKind::Delete => write!(f, "delete"),
        }
    }
}

/// One write-ahead log record.
///
/// On disk (little-endian):
///
/// ```text
/// Delete: [log_type: u8][record_tag: u64]
/// Update: [log_type: u8][record_tag: u64][body_length: u32][body]
/// ```
///
/// A Delete record has no body_length field at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    kind: LogKind,
    record_tag: RowTag,
    body: Vec<u8>,
}

impl WalRecord {
    /// An update of row `record_tag` to `values`, one per column.
    pub fn update(record_tag: RowTag, values: &[Value]) -> Self {
        let mut body = Vec::with_capacity(values.iter().map(Value::byte_len).sum());
        for value in values {
            value.serialize(&mut body);
        }
        Self {
            kind: LogKind::Update,
            record_tag,
            body,
        }
    }

    /// A deletion of row `record_tag`.
    pub fn delete(record_tag: RowTag) -> Self {
        Self {
            kind: LogKind::Delete,
            record_tag,
            body: Vec::new(),
        }
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn record_tag(&self) -> RowTag {
        self.record_tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Total encoded size, header included.
    pub fn encoded_len(&self) -> usize {
        self.kind.header_size() + self.body.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.kind.as_u8());
        buf.put_u64_le(self.record_tag);
        if self.kind == LogKind::Update {
            buf.put_u32_le(self.body.len() as u32);
            buf.put_slice(&self.body);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }

    /// Decodes one record from the front of `buf`.
    /// Returns Ok(None) if `buf` ends before the record does.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Option<Self>> {
        if buf.remaining() < LOG_TYPE_SIZE {
            return Ok(None);
        }
        let raw = buf.get_u8();
        let kind = LogKind::from_u8(raw)
            .ok_or_else(|| CairnError::CorruptLog(format!("unknown log type {raw}")))?;

        if buf.remaining() < kind.header_size() - LOG_TYPE_SIZE {
            return Ok(None);
        }
        let record_tag = buf.get_u64_le();

        let body = match kind {
            LogKind::Delete => Vec::new(),
            LogKind::Update => {
                let body_length = buf.get_u32_le() as usize;
                if buf.remaining() < body_length {
                    return Ok(None);
                }
                let mut body = vec![0u8; body_length];
                buf.copy_to_slice(&mut body);
                body
            }
        };

        Ok(Some(Self {
            kind,
            record_tag,
            body,
        }))
    }

    /// Decodes an Update body into one value per column of `schema`.
    pub fn values(&self, schema: &SchemaDescriptor) -> Result<Vec<Value>> {
        schema
            .decode_row(&self.body)
            .map_err(|e| CairnError::CorruptLog(format!("update of row {}: {e}", self.record_tag)))
    }
}
