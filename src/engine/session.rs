use tracing::{debug, warn};

use crate::common::{CairnError, Result, RowTag};
use crate::tuple::{ColumnSpec, Value};
use crate::wal::ReplaySummary;

use super::{Comparison, StorageEngine};

/// A `column <op> value` predicate on a select.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

/// One row-level statement handed down by the SQL layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    Insert {
        table: String,
        values: Vec<Value>,
    },
    Select {
        table: String,
        /// Projection, in output order; None selects every column
        columns: Option<Vec<String>>,
        filter: Option<Filter>,
    },
    Update {
        table: String,
        tag: RowTag,
        values: Vec<Value>,
    },
    Delete {
        table: String,
        tag: RowTag,
    },
    Replay {
        table: String,
    },
}

impl RowOperation {
    pub fn table(&self) -> &str {
        match self {
            RowOperation::CreateTable { table, .. }
            | RowOperation::Insert { table, .. }
            | RowOperation::Select { table, .. }
            | RowOperation::Update { table, .. }
            | RowOperation::Delete { table, .. }
            | RowOperation::Replay { table } => table,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RowOperation::CreateTable { .. } => "create table",
            RowOperation::Insert { .. } => "insert",
            RowOperation::Select { .. } => "select",
            RowOperation::Update { .. } => "update",
            RowOperation::Delete { .. } => "delete",
            RowOperation::Replay { .. } => "replay",
        }
    }
}

/// What a successful statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Created,
    Inserted(RowTag),
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Updated,
    Deleted,
    Replayed(ReplaySummary),
}

/// Result of a statement as reported to the SQL layer, which formats it
/// for the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementOutcome {
    Success(StatementResult),
    /// The statement named something missing or did not fit the schema
    SchemaError(String),
    /// Storage failed underneath a well-formed statement
    StorageError(String),
}

impl StatementOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StatementOutcome::Success(_))
    }
}

impl From<Result<StatementResult>> for StatementOutcome {
    fn from(result: Result<StatementResult>) -> Self {
        match result {
            Ok(result) => StatementOutcome::Success(result),
            Err(e) if e.is_schema_error() => StatementOutcome::SchemaError(e.to_string()),
            Err(e) => StatementOutcome::StorageError(e.to_string()),
        }
    }
}

/// A worker's view of one database.
pub struct Session<'a> {
    engine: &'a StorageEngine,
    database: String,
}

impl<'a> Session<'a> {
    pub(super) fn new(engine: &'a StorageEngine, database: &str) -> Result<Self> {
        if !engine.catalog().database_exists(database) {
            return Err(CairnError::DatabaseNotFound(database.to_string()));
        }
        Ok(Self {
            engine,
            database: database.to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Runs a statement, folding any error into the outcome.
    pub fn run(&self, op: RowOperation) -> StatementOutcome {
        let name = op.name();
        let outcome = StatementOutcome::from(self.execute(op));
        match &outcome {
            StatementOutcome::Success(_) => debug!(database = %self.database, statement = name, "statement succeeded"),
            StatementOutcome::SchemaError(msg) => {
                debug!(database = %self.database, statement = name, error = %msg, "statement rejected")
            }
            StatementOutcome::StorageError(msg) => {
                warn!(database = %self.database, statement = name, error = %msg, "statement failed")
            }
        }
        outcome
    }

    /// Runs a statement, returning errors as they are.
    pub fn execute(&self, op: RowOperation) -> Result<StatementResult> {
        let db = self.database.as_str();
        let engine = self.engine;
        match op {
            RowOperation::CreateTable { table, columns } => {
                engine.create_table(db, &table, &columns)?;
                Ok(StatementResult::Created)
            }
            RowOperation::Insert { table, values } => {
                let tag = engine.insert_row(db, &table, &values)?;
                Ok(StatementResult::Inserted(tag))
            }
            RowOperation::Select {
                table,
                columns,
                filter,
            } => {
                let descriptor = engine.resolve_table(db, &table)?;
                let names: Vec<String> = match &columns {
                    Some(columns) => columns.clone(),
                    None => descriptor.columns().map(|c| c.name.to_string()).collect(),
                };
                let projection: Option<Vec<&str>> = columns
                    .as_ref()
                    .map(|c| c.iter().map(String::as_str).collect());

                let rows = match filter {
                    Some(filter) => engine.select_where(
                        db,
                        &table,
                        &filter.column,
                        filter.op,
                        &filter.value,
                        projection.as_deref(),
                    )?,
                    None => engine.select(db, &table, projection.as_deref())?,
                };
                Ok(StatementResult::Rows {
                    columns: names,
                    rows,
                })
            }
            RowOperation::Update { table, tag, values } => {
                engine.begin_update(db, &table, tag, &values)?;
                Ok(StatementResult::Updated)
            }
            RowOperation::Delete { table, tag } => {
                engine.begin_delete(db, &table, tag)?;
                Ok(StatementResult::Deleted)
            }
            RowOperation::Replay { table } => {
                let summary = engine.replay_log(db, &table)?;
                Ok(StatementResult::Replayed(summary))
            }
        }
    }
}
