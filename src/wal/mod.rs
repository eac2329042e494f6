//! Per-table write-ahead logs of row updates and deletions.

mod log;
mod log_pool;
mod record;
mod replay;

pub use log::WriteAheadLog;
pub use log_pool::{LogHandle, LogHandlePool};
pub use record::{LogKind, WalRecord, DELETE_HEADER_SIZE, LOG_TYPE_SIZE, UPDATE_HEADER_SIZE};
pub use replay::{apply_record, mark_applied, replay, ReplaySummary};
