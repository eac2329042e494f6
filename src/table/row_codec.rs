use crate::common::{CairnError, Result};
use crate::tuple::{ColumnRef, Value};

/// Encodes a resolved value as a column record: the serialized value,
/// zero-padded to the column's byte length.
pub fn encode_field(column: &ColumnRef<'_>, value: &Value) -> Result<Vec<u8>> {
    if value.value_type() != column.value_type {
        return Err(CairnError::TypeMismatch {
            column: column.name.to_string(),
            expected: column.value_type.to_string(),
            value: value.to_string(),
        });
    }

    let length = column.byte_length as usize;
    if value.byte_len() > length {
        return Err(CairnError::TypeMismatch {
            column: column.name.to_string(),
            expected: format!("{} of at most {length} bytes", column.value_type),
            value: value.to_string(),
        });
    }

    let mut record = Vec::with_capacity(length);
    value.serialize(&mut record);
    record.resize(length, 0);
    Ok(record)
}

/// Decodes a column record. Padding after the value is ignored.
pub fn decode_field(column: &ColumnRef<'_>, record: &[u8]) -> Result<Value> {
    if record.len() != column.byte_length as usize {
        return Err(CairnError::RecordLength {
            expected: column.byte_length as usize,
            actual: record.len(),
        });
    }
    let mut cursor = record;
    Value::deserialize(&mut cursor, column.value_type)
}
