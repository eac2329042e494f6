use std::collections::HashSet;

use bytes::{Buf, BufMut};

use crate::common::{BlockAddress, CairnError, Result};
use crate::storage::page::MAX_RECORD_LENGTH;

use super::value::{Value, ValueType, LENGTH_PREFIX_SIZE};

/// Kind of table a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Regular,
    Temporary,
}

impl TableKind {
    pub fn tag(&self) -> u8 {
        match self {
            TableKind::Regular => 0,
            TableKind::Temporary => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TableKind::Regular),
            1 => Some(TableKind::Temporary),
            _ => None,
        }
    }
}

/// Index declared on a column. The kernel records it; it builds no index structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    None,
    Primary,
    Unique,
    Secondary,
}

impl IndexKind {
    pub fn tag(&self) -> u8 {
        match self {
            IndexKind::None => 0,
            IndexKind::Primary => 1,
            IndexKind::Unique => 2,
            IndexKind::Secondary => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexKind::None),
            1 => Some(IndexKind::Primary),
            2 => Some(IndexKind::Unique),
            3 => Some(IndexKind::Secondary),
            _ => None,
        }
    }
}

/// Definition of one column, used to build a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub value_type: ValueType,
    pub byte_length: u32,
    pub index: IndexKind,
}

impl ColumnSpec {
    pub fn integer(name: impl Into<String>) -> Self {
        Self::fixed(name, ValueType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::fixed(name, ValueType::Float)
    }

    /// A string column holding at most `max_bytes` bytes of UTF-8.
    pub fn varchar(name: impl Into<String>, max_bytes: u32) -> Self {
        Self {
            name: name.into(),
            value_type: ValueType::VarChar,
            byte_length: LENGTH_PREFIX_SIZE as u32 + max_bytes,
            index: IndexKind::None,
        }
    }

    fn fixed(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            byte_length: value_type.min_byte_length() as u32,
            index: IndexKind::None,
        }
    }

    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }
}

/// Borrowed view of one column of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnRef<'a> {
    pub ordinal: usize,
    pub name: &'a str,
    pub value_type: ValueType,
    pub byte_length: u32,
    pub index: IndexKind,
    pub storage_address: Option<BlockAddress>,
}

/// One table's schema as stored in catalog pages.
///
/// Serialized layout (little-endian):
///
/// | Field             | Encoding                          |
/// |-------------------|-----------------------------------|
/// | table_name        | u32 length + UTF-8 bytes          |
/// | table_kind        | u8                                |
/// | column_count      | u32                               |
/// | names             | column_count x (u32 len + bytes)  |
/// | value types       | column_count x u8                 |
/// | byte lengths      | column_count x u32                |
/// | index kinds       | column_count x u8                 |
/// | storage addresses | column_count x u32 (0 = none)     |
///
/// The five column arrays always have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    table_name: String,
    table_kind: TableKind,
    column_names: Vec<String>,
    value_types: Vec<ValueType>,
    byte_lengths: Vec<u32>,
    index_kinds: Vec<IndexKind>,
    storage_addresses: Vec<Option<BlockAddress>>,
}

impl SchemaDescriptor {
    /// Creates a descriptor from column definitions, validating them.
    pub fn new(
        table_name: impl Into<String>,
        table_kind: TableKind,
        columns: &[ColumnSpec],
    ) -> Result<Self> {
        let table_name = table_name.into();
        if table_name.is_empty() {
            return Err(CairnError::Schema("table name is empty".to_string()));
        }
        if columns.is_empty() {
            return Err(CairnError::Schema(format!(
                "table {table_name} has no columns"
            )));
        }

        let mut seen = HashSet::new();
        for col in columns {
            if !seen.insert(col.name.as_str()) {
                return Err(CairnError::Schema(format!(
                    "duplicate column {} in table {table_name}",
                    col.name
                )));
            }
            if col.value_type == ValueType::Raw {
                return Err(CairnError::Schema(format!(
                    "column {} cannot be declared RAW",
                    col.name
                )));
            }
            let min = col.value_type.min_byte_length() as u32;
            if col.byte_length < min
                || col.byte_length as usize > MAX_RECORD_LENGTH
                || (col.value_type.fixed_size().is_some() && col.byte_length != min)
            {
                return Err(CairnError::Schema(format!(
                    "column {} of type {} cannot be {} bytes long",
                    col.name, col.value_type, col.byte_length
                )));
            }
        }

        Ok(Self {
            table_name,
            table_kind,
            column_names: columns.iter().map(|c| c.name.clone()).collect(),
            value_types: columns.iter().map(|c| c.value_type).collect(),
            byte_lengths: columns.iter().map(|c| c.byte_length).collect(),
            index_kinds: columns.iter().map(|c| c.index).collect(),
            storage_addresses: vec![None; columns.len()],
        })
    }

    /// Creates a builder for a regular table.
    pub fn builder(table_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(table_name)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn table_kind(&self) -> TableKind {
        self.table_kind
    }

    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    pub fn column(&self, ordinal: usize) -> Option<ColumnRef<'_>> {
        if ordinal >= self.column_count() {
            return None;
        }
        Some(ColumnRef {
            ordinal,
            name: &self.column_names[ordinal],
            value_type: self.value_types[ordinal],
            byte_length: self.byte_lengths[ordinal],
            index: self.index_kinds[ordinal],
            storage_address: self.storage_addresses[ordinal],
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = ColumnRef<'_>> {
        (0..self.column_count()).filter_map(move |i| self.column(i))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|n| n == name)
    }

    /// Looks up a column by name, failing with ColumnNotFound.
    pub fn column_by_name(&self, name: &str) -> Result<ColumnRef<'_>> {
        self.column_index(name)
            .and_then(|i| self.column(i))
            .ok_or_else(|| CairnError::ColumnNotFound {
                table: self.table_name.clone(),
                column: name.to_string(),
            })
    }

    /// Records the first record page of a column.
    pub fn set_storage_address(&mut self, ordinal: usize, address: BlockAddress) {
        self.storage_addresses[ordinal] = Some(address);
    }

    /// Resolves one value per column into the column types.
    pub fn resolve_row(&self, values: &[Value]) -> Result<Vec<Value>> {
        if values.len() != self.column_count() {
            return Err(CairnError::Schema(format!(
                "table {} has {} columns, got {} values",
                self.table_name,
                self.column_count(),
                values.len()
            )));
        }

        self.columns()
            .zip(values)
            .map(|(col, value)| {
                let resolved = value.resolve(col.value_type).ok_or_else(|| {
                    CairnError::TypeMismatch {
                        column: col.name.to_string(),
                        expected: col.value_type.to_string(),
                        value: value.to_string(),
                    }
                })?;
                if resolved.byte_len() > col.byte_length as usize {
                    return Err(CairnError::TypeMismatch {
                        column: col.name.to_string(),
                        expected: format!("{} of at most {} bytes", col.value_type, col.byte_length),
                        value: value.to_string(),
                    });
                }
                Ok(resolved)
            })
            .collect()
    }

    /// Encodes a resolved row as the concatenation of its serialized values.
    pub fn encode_row(&self, values: &[Value]) -> Vec<u8> {
        let mut body = Vec::with_capacity(values.iter().map(Value::byte_len).sum());
        for value in values {
            value.serialize(&mut body);
        }
        body
    }

    /// Decodes a row encoded by `encode_row`.
    pub fn decode_row(&self, mut body: &[u8]) -> Result<Vec<Value>> {
        let row = self
            .value_types
            .iter()
            .map(|ty| Value::deserialize(&mut body, *ty))
            .collect::<Result<Vec<_>>>()?;
        if !body.is_empty() {
            return Err(CairnError::corrupt(format!(
                "{} trailing bytes after row of {}",
                body.len(),
                self.table_name
            )));
        }
        Ok(row)
    }

    /// Returns the serialized size in bytes.
    pub fn serialized_len(&self) -> usize {
        let names: usize = self
            .column_names
            .iter()
            .map(|n| LENGTH_PREFIX_SIZE + n.len())
            .sum();
        LENGTH_PREFIX_SIZE + self.table_name.len() + 1 + 4 + names + self.column_count() * (1 + 4 + 1 + 4)
    }

    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        put_string(buf, &self.table_name);
        buf.put_u8(self.table_kind.tag());
        buf.put_u32_le(self.column_count() as u32);
        for name in &self.column_names {
            put_string(buf, name);
        }
        for ty in &self.value_types {
            buf.put_u8(ty.tag());
        }
        for len in &self.byte_lengths {
            buf.put_u32_le(*len);
        }
        for index in &self.index_kinds {
            buf.put_u8(index.tag());
        }
        for address in &self.storage_addresses {
            buf.put_u32_le(BlockAddress::to_link(*address));
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_len());
        self.serialize(&mut bytes);
        bytes
    }

    /// Reads a descriptor from the front of `buf`, advancing it.
    pub fn deserialize<B: Buf>(buf: &mut B) -> Result<Self> {
        let table_name = get_string(buf)?;
        need(buf, 5)?;
        let table_kind = TableKind::from_tag(buf.get_u8())
            .ok_or_else(|| CairnError::corrupt("unknown table kind"))?;
        let column_count = buf.get_u32_le() as usize;

        // Every column takes at least 14 bytes; reject counts the buffer cannot hold
        if column_count.saturating_mul(14) > buf.remaining() {
            return Err(CairnError::corrupt(format!(
                "column count {column_count} exceeds descriptor size"
            )));
        }

        let column_names = (0..column_count)
            .map(|_| get_string(buf))
            .collect::<Result<Vec<_>>>()?;

        need(buf, column_count * 10)?;
        let value_types = (0..column_count)
            .map(|_| {
                ValueType::from_tag(buf.get_u8())
                    .ok_or_else(|| CairnError::corrupt("unknown value type tag"))
            })
            .collect::<Result<Vec<_>>>()?;
        let byte_lengths: Vec<u32> = (0..column_count).map(|_| buf.get_u32_le()).collect();
        let index_kinds = (0..column_count)
            .map(|_| {
                IndexKind::from_tag(buf.get_u8())
                    .ok_or_else(|| CairnError::corrupt("unknown index kind tag"))
            })
            .collect::<Result<Vec<_>>>()?;
        let storage_addresses = (0..column_count)
            .map(|_| BlockAddress::from_link(buf.get_u32_le()))
            .collect();

        // Stored columns obey the same limits as newly defined ones
        let columns: Vec<ColumnSpec> = column_names
            .into_iter()
            .zip(value_types)
            .zip(byte_lengths)
            .zip(index_kinds)
            .map(|(((name, value_type), byte_length), index)| ColumnSpec {
                name,
                value_type,
                byte_length,
                index,
            })
            .collect();
        let mut descriptor = Self::new(table_name, table_kind, &columns)
            .map_err(|e| CairnError::corrupt(format!("stored descriptor is invalid: {e}")))?;
        descriptor.storage_addresses = storage_addresses;
        Ok(descriptor)
    }
}

fn need<B: Buf>(buf: &B, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(CairnError::corrupt(format!(
            "truncated schema descriptor: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

fn put_string<B: BufMut>(buf: &mut B, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string<B: Buf>(buf: &mut B) -> Result<String> {
    need(buf, LENGTH_PREFIX_SIZE)?;
    let len = buf.get_u32_le() as usize;
    need(buf, len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| CairnError::corrupt("name is not valid UTF-8"))
}

/// Builder for constructing descriptors fluently.
pub struct SchemaBuilder {
    table_name: String,
    table_kind: TableKind,
    columns: Vec<ColumnSpec>,
}

impl SchemaBuilder {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            table_kind: TableKind::Regular,
            columns: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: TableKind) -> Self {
        self.table_kind = kind;
        self
    }

    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.column(ColumnSpec::integer(name))
    }

    pub fn float(self, name: impl Into<String>) -> Self {
        self.column(ColumnSpec::float(name))
    }

    pub fn varchar(self, name: impl Into<String>, max_bytes: u32) -> Self {
        self.column(ColumnSpec::varchar(name, max_bytes))
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn build(self) -> Result<SchemaDescriptor> {
        SchemaDescriptor::new(self.table_name, self.table_kind, &self.columns)
    }
}
