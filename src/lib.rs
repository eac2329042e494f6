//! Cairn - the storage kernel of a small disk-backed relational database
//!
//! This crate keeps tables in fixed-size blocks on disk, caches them in a
//! bounded buffer pool shared by many worker threads, and routes row updates
//! and deletes through a per-table write-ahead log.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage Layer** (`storage`): Block I/O and page formats
//!   - `BlockFile`: Reads and writes whole 4 KiB blocks of one file
//!   - `FileLayout`: Maps databases and tables to paths under the install root
//!   - `CatalogPage` / `RecordPage`: Schema descriptors and fixed-length records
//!
//! - **Buffer Pool** (`buffer`): Memory management for cached blocks
//!   - `BufferPool`: Two fixed arenas of slots, one per page kind
//!   - `PageCache`: At most one slot per page identity, with read/write checkouts
//!   - `PageReadGuard`/`PageWriteGuard`: RAII checkouts that write back on release
//!
//! - **Write-Ahead Log** (`wal`): Update and Delete records per table
//!   - `WriteAheadLog`, `LogHandlePool`, and log replay
//!
//! - **Catalog** (`catalog`) and **Tables** (`table`): Databases, descriptor
//!   chains, and one record-page chain per column
//!
//! - **Engine** (`engine`): `StorageEngine` and `Session`, the row-level
//!   entry points used by the SQL layer
//!
//! # Example
//!
//! ```rust,no_run
//! use cairn::{ColumnSpec, StorageConfig, StorageEngine, Value};
//!
//! let engine = StorageEngine::open(StorageConfig::new("/tmp/cairn")).unwrap();
//! engine.create_database("shop").unwrap();
//! engine
//!     .create_table("shop", "items", &[ColumnSpec::integer("id"), ColumnSpec::varchar("name", 32)])
//!     .unwrap();
//!
//! let tag = engine
//!     .insert_row("shop", "items", &[Value::Integer(1), Value::from("bolt")])
//!     .unwrap();
//! engine
//!     .begin_update("shop", "items", tag, &[Value::Integer(1), Value::from("nut")])
//!     .unwrap();
//!
//! let rows = engine.select("shop", "items", None).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod engine;
pub mod storage;
pub mod table;
pub mod tuple;
pub mod wal;

// Re-export commonly used types at the crate root
pub use common::{BlockAddress, CairnError, PageKind, Result, RowTag, StorageConfig};
pub use engine::{
    Comparison, EngineStats, Filter, RowOperation, Session, StatementOutcome, StatementResult,
    StorageEngine,
};
pub use tuple::{ColumnSpec, SchemaDescriptor, TableKind, Value, ValueType};
pub use wal::ReplaySummary;
