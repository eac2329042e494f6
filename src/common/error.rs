use thiserror::Error;

use super::types::{PageKey, PageKind};

/// Database error types
#[derive(Error, Debug)]
pub enum CairnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page is full")]
    PageFull,

    #[error("No {kind} page slots are configured")]
    OutOfSpace { kind: PageKind },

    #[error("Log handle for {database}.{table} is already checked out")]
    AlreadyInUse { database: String, table: String },

    #[error("Corrupt page: {reason}")]
    CorruptPage { reason: String },

    #[error("Corrupt log: {0}")]
    CorruptLog(String),

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("Table {database}.{table} not found")]
    TableNotFound { database: String, table: String },

    #[error("Column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("Row {tag} not found in table {table}")]
    RowNotFound { table: String, tag: u64 },

    #[error("Database {0} already exists")]
    DatabaseExists(String),

    #[error("Table {database}.{table} already exists")]
    TableExists { database: String, table: String },

    #[error("Record length mismatch: expected {expected} bytes, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    #[error("Type mismatch in column {column}: cannot store {value} as {expected}")]
    TypeMismatch {
        column: String,
        expected: String,
        value: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Schema descriptor of {size} bytes does not fit in an empty catalog page")]
    DescriptorTooLarge { size: usize },

    #[error("All {max} log handles are checked out")]
    LogHandlesExhausted { max: usize },

    #[error("Page {key} holds {actual} pages, not {expected} pages")]
    PageKindMismatch {
        key: PageKey,
        expected: PageKind,
        actual: PageKind,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CairnError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        CairnError::CorruptPage {
            reason: reason.into(),
        }
    }

    /// Returns true for catalog lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CairnError::DatabaseNotFound(_)
                | CairnError::TableNotFound { .. }
                | CairnError::ColumnNotFound { .. }
                | CairnError::RowNotFound { .. }
        )
    }

    /// Returns true for errors caused by the statement rather than by storage.
    pub fn is_schema_error(&self) -> bool {
        self.is_not_found()
            || matches!(
                self,
                CairnError::DatabaseExists(_)
                    | CairnError::TableExists { .. }
                    | CairnError::TypeMismatch { .. }
                    | CairnError::Schema(_)
                    | CairnError::DescriptorTooLarge { .. }
            )
    }
}

pub type Result<T> = std::result::Result<T, CairnError>;
