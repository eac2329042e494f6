mod schema;
mod value;

pub use schema::{ColumnRef, ColumnSpec, IndexKind, SchemaBuilder, SchemaDescriptor, TableKind};
pub use value::{Value, ValueType, LENGTH_PREFIX_SIZE};
