//! The storage engine context and the row-level entry points used by the
//! SQL layer.

mod session;

pub use session::{Filter, RowOperation, Session, StatementOutcome, StatementResult};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::{debug, info};

use crate::buffer::{BufferPool, PageCache};
use crate::catalog::Catalog;
use crate::common::{CairnError, PageKind, Result, RowTag, StorageConfig};
use crate::storage::disk::{FileLayout, FileRegistry};
use crate::storage::page::RecordPage;
use crate::table::{ColumnScan, TableData};
use crate::tuple::{ColumnSpec, SchemaDescriptor, TableKind, Value};
use crate::wal::{
    apply_record, mark_applied, replay, LogHandle, LogHandlePool, ReplaySummary, WalRecord,
};

/// Comparison operator of a `select_where` predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    /// Returns whether `ordering` (left compared to right) satisfies the operator.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Ne => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Le => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Ge => ordering != Ordering::Less,
        }
    }
}

/// Point-in-time counters of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub record_slots: usize,
    pub free_record_slots: usize,
    pub catalog_slots: usize,
    pub free_catalog_slots: usize,
    pub resident_pages: usize,
    pub open_files: usize,
    pub open_logs: usize,
}

type TableKey = (String, String);

/// Pages of one column, streamed while the table's rows stay fixed.
///
/// Row mutations of the table wait until the reader is dropped.
pub struct ColumnReader<'a> {
    scan: ColumnScan<'a>,
    _rows: ArcRwLockReadGuard<RawRwLock, ()>,
}

impl Iterator for ColumnReader<'_> {
    type Item = Result<RecordPage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan.next()
    }
}

/// StorageEngine owns one buffer pool, page cache and log handle pool, and
/// exposes the row operations built on them. It is constructed explicitly
/// and shared by reference; every method is safe to call from many threads.
pub struct StorageEngine {
    config: StorageConfig,
    cache: PageCache,
    catalog: Catalog,
    logs: LogHandlePool,
    /// One lock per table: row mutations take it exclusively, reads shared
    table_locks: Mutex<HashMap<TableKey, Arc<RwLock<()>>>>,
}

impl StorageEngine {
    /// Creates an engine rooted at `config.install_root`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.install_root)?;

        let layout = FileLayout::new(&config.install_root);
        let cache = PageCache::new(
            BufferPool::from_config(&config),
            FileRegistry::new(layout.clone()),
        );
        let catalog = Catalog::new(cache.clone(), layout);
        let logs = LogHandlePool::from_config(&config);

        info!(
            root = %config.install_root.display(),
            record_slots = config.record_slots(),
            catalog_slots = config.catalog_slots(),
            "opened storage engine"
        );
        Ok(Self {
            config,
            cache,
            catalog,
            logs,
            table_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn logs(&self) -> &LogHandlePool {
        &self.logs
    }

    /// Opens a session bound to an existing database.
    pub fn session(&self, database: &str) -> Result<Session<'_>> {
        Session::new(self, database)
    }

    fn table_lock(&self, database: &str, table: &str) -> Arc<RwLock<()>> {
        let mut locks = self.table_locks.lock();
        Arc::clone(
            locks
                .entry((database.to_string(), table.to_string()))
                .or_default(),
        )
    }

    pub fn create_database(&self, name: &str) -> Result<()> {
        self.catalog.create_database(name)
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        self.catalog.list_databases()
    }

    pub fn create_table(
        &self,
        database: &str,
        table: &str,
        columns: &[ColumnSpec],
    ) -> Result<SchemaDescriptor> {
        self.catalog
            .create_table(database, table, TableKind::Regular, columns)
    }

    pub fn create_table_with_kind(
        &self,
        database: &str,
        table: &str,
        kind: TableKind,
        columns: &[ColumnSpec],
    ) -> Result<SchemaDescriptor> {
        self.catalog.create_table(database, table, kind, columns)
    }

    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.catalog.list_tables(database)
    }

    /// Returns a table's schema descriptor.
    pub fn resolve_table(&self, database: &str, table: &str) -> Result<SchemaDescriptor> {
        self.catalog.resolve_table(database, table)
    }

    /// Streams the record pages of one column.
    pub fn read_column(
        &self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<ColumnReader<'_>> {
        let data = self.catalog.open_table(database, table)?;
        let chain = data.chain_by_name(column)?;
        let rows = self.table_lock(database, table).read_arc();
        Ok(ColumnReader {
            scan: chain.pages(&self.cache),
            _rows: rows,
        })
    }

    /// Appends an encoded record to one column's chain.
    pub fn append_row(&self, database: &str, table: &str, column: &str, bytes: &[u8]) -> Result<()> {
        let data = self.catalog.open_table(database, table)?;
        let lock = self.table_lock(database, table);
        let _guard = lock.write();
        data.append_field(&self.cache, column, bytes)
    }

    /// Inserts a row, resolving each value against its column's type.
    /// Returns the new row's tag.
    pub fn insert_row(&self, database: &str, table: &str, values: &[Value]) -> Result<RowTag> {
        let data = self.catalog.open_table(database, table)?;
        let row = data.descriptor().resolve_row(values)?;

        let lock = self.table_lock(database, table);
        let _guard = lock.write();
        let tag = data.insert(&self.cache, &row)?;
        debug!(database, table, tag, "inserted row");
        Ok(tag)
    }

    /// Reads every row, keeping only `columns` (in that order) when given.
    pub fn select(
        &self,
        database: &str,
        table: &str,
        columns: Option<&[&str]>,
    ) -> Result<Vec<Vec<Value>>> {
        let data = self.catalog.open_table(database, table)?;
        let lock = self.table_lock(database, table);
        let rows = {
            let _guard = lock.read();
            data.scan(&self.cache)?
        };
        project(data.descriptor(), rows, columns)
    }

    /// Reads the rows whose `column` compares to `value` as `op` requires.
    pub fn select_where(
        &self,
        database: &str,
        table: &str,
        column: &str,
        op: Comparison,
        value: &Value,
        columns: Option<&[&str]>,
    ) -> Result<Vec<Vec<Value>>> {
        let data = self.catalog.open_table(database, table)?;
        let col = data.descriptor().column_by_name(column)?;
        let ordinal = col.ordinal;
        // Raw tokens compare as the column's type when they resolve to it
        let value = value.resolve(col.value_type).unwrap_or_else(|| value.clone());
        let lock = self.table_lock(database, table);
        let rows = {
            let _guard = lock.read();
            data.scan(&self.cache)?
        };
        let rows = rows
            .into_iter()
            .filter(|row| op.matches(row[ordinal].compare(&value)))
            .collect();
        project(data.descriptor(), rows, columns)
    }

    /// Logs and applies an update of row `tag`.
    ///
    /// The table's log handle is held for the whole operation, so a
    /// concurrent update or delete of the same table fails with AlreadyInUse.
    pub fn begin_update(
        &self,
        database: &str,
        table: &str,
        tag: RowTag,
        values: &[Value],
    ) -> Result<()> {
        let data = self.catalog.open_table(database, table)?;
        let row = data.descriptor().resolve_row(values)?;
        let record = WalRecord::update(tag, &row);
        self.log_and_apply(&data, record)
    }

    /// Logs and applies the deletion of row `tag`. Later rows' tags shift down by one.
    pub fn begin_delete(&self, database: &str, table: &str, tag: RowTag) -> Result<()> {
        let data = self.catalog.open_table(database, table)?;
        self.log_and_apply(&data, WalRecord::delete(tag))
    }

    fn log_and_apply(&self, data: &TableData, record: WalRecord) -> Result<()> {
        let file = data.file();
        let mut log = self.logs.checkout(&file.database, &file.table)?;
        let lock = self.table_lock(&file.database, &file.table);
        let _guard = lock.write();

        self.catch_up(data, &mut log)?;

        let tag = record.record_tag();
        if tag >= data.row_count(&self.cache)? {
            return Err(CairnError::RowNotFound {
                table: file.table.clone(),
                tag,
            });
        }

        log.append(&record)?;
        let end = log.end_offset();
        apply_record(&self.cache, data, &record, end)?;
        mark_applied(&self.cache, data, end)?;
        debug!(table = %file, kind = %record.kind(), tag, "applied logged change");
        Ok(())
    }

    /// Replays records a crash left unapplied before new ones are logged.
    fn catch_up(&self, data: &TableData, log: &mut LogHandle) -> Result<()> {
        let header = data.header(&self.cache)?;
        if header.applied_log_offset != log.end_offset() {
            replay(&self.cache, log, data)?;
        }
        Ok(())
    }

    /// Applies a table's pending log records and empties its log.
    pub fn replay_log(&self, database: &str, table: &str) -> Result<ReplaySummary> {
        let data = self.catalog.open_table(database, table)?;
        let mut log = self.logs.checkout(database, table)?;
        let lock = self.table_lock(database, table);
        let _guard = lock.write();
        replay(&self.cache, &mut log, &data)
    }

    /// Replays the log of every table in a database.
    pub fn recover_database(&self, database: &str) -> Result<Vec<(String, ReplaySummary)>> {
        let tables = self.catalog.list_tables(database)?;
        let mut summaries = Vec::with_capacity(tables.len());
        for table in tables {
            let summary = self.replay_log(database, &table)?;
            summaries.push((table, summary));
        }
        info!(database, tables = summaries.len(), "recovered database");
        Ok(summaries)
    }

    /// Folds a table's log into its pages and syncs every open file.
    pub fn checkpoint(&self, database: &str, table: &str) -> Result<ReplaySummary> {
        let summary = self.replay_log(database, table)?;
        self.cache.files().sync_all()?;
        Ok(summary)
    }

    pub fn stats(&self) -> EngineStats {
        let pool = self.cache.pool();
        EngineStats {
            record_slots: pool.slot_count(PageKind::Record),
            free_record_slots: pool.free_slot_count(PageKind::Record),
            catalog_slots: pool.slot_count(PageKind::Catalog),
            free_catalog_slots: pool.free_slot_count(PageKind::Catalog),
            resident_pages: self.cache.resident_count(),
            open_files: self.cache.files().open_count(),
            open_logs: self.logs.open_count(),
        }
    }
}

/// Picks `columns` out of each row, in the order given.
fn project(
    descriptor: &SchemaDescriptor,
    rows: Vec<Vec<Value>>,
    columns: Option<&[&str]>,
) -> Result<Vec<Vec<Value>>> {
    let Some(columns) = columns else {
        return Ok(rows);
    };
    let ordinals = columns
        .iter()
        .map(|name| descriptor.column_by_name(name).map(|c| c.ordinal))
        .collect::<Result<Vec<_>>>()?;
    Ok(rows
        .into_iter()
        .map(|row| ordinals.iter().map(|&i| row[i].clone()).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_matches() {
        assert!(Comparison::Eq.matches(Ordering::Equal));
        assert!(!Comparison::Eq.matches(Ordering::Less));
        assert!(Comparison::Le.matches(Ordering::Less));
        assert!(Comparison::Le.matches(Ordering::Equal));
        assert!(!Comparison::Gt.matches(Ordering::Equal));
        assert!(Comparison::Ne.matches(Ordering::Greater));
        assert!(Comparison::Ge.matches(Ordering::Greater));
    }

    #[test]
    fn test_project() {
        let descriptor = SchemaDescriptor::builder("t")
            .integer("a")
            .integer("b")
            .build()
            .unwrap();
        let rows = vec![vec![Value::Integer(1), Value::Integer(2)]];
        assert_eq!(
            project(&descriptor, rows.clone(), Some(&["b", "a"])).unwrap(),
            vec![vec![Value::Integer(2), Value::Integer(1)]]
        );
        assert!(project(&descriptor, rows, Some(&["c"])).is_err());
    }
}
