use tracing::{info, warn};

use crate::buffer::PageCache;
use crate::common::{LogOffset, Result};
use crate::storage::page::DataFileHeader;
use crate::table::TableData;

use super::{LogKind, WalRecord, WriteAheadLog};

/// What a replay pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records applied to record pages
    pub applied: usize,
    /// Records naming a row that no longer exists
    pub skipped: usize,
    /// Log offset the pass started from
    pub start_offset: LogOffset,
    /// Log length when the pass started
    pub end_offset: LogOffset,
}

/// Applies one record, which ends at log offset `end`, to a table's record
/// pages. Returns false if the row it names does not exist.
///
/// Before any page changes, the data file header notes the record as in
/// flight along with the row count before it. Running this again for the
/// same record after a crash finishes the interrupted change instead of
/// repeating it. [`mark_applied`] settles the record afterwards.
pub fn apply_record(
    cache: &PageCache,
    table: &TableData,
    record: &WalRecord,
    end: LogOffset,
) -> Result<bool> {
    let mut header = table.header(cache)?;
    if header.pending_log_offset != end {
        header.pending_log_offset = end;
        header.pending_row_count = table.row_count(cache)?;
        table.write_header(cache, header)?;
    }

    match record.kind() {
        LogKind::Update => {
            let values = record.values(table.descriptor())?;
            table.overwrite_row(cache, record.record_tag(), &values)
        }
        LogKind::Delete => {
            table.remove_row(cache, record.record_tag(), header.pending_row_count)
        }
    }
}

/// Moves the replay marker to `end`, past a record [`apply_record`] applied.
pub fn mark_applied(cache: &PageCache, table: &TableData, end: LogOffset) -> Result<()> {
    let header = table.header(cache)?;
    table.write_header(
        cache,
        DataFileHeader {
            applied_log_offset: end,
            ..header.settled()
        },
    )
}

/// Applies every log record past the table's replay marker, then empties
/// the log.
///
/// The marker in the data file header advances after each applied record,
/// so a pass interrupted by a crash resumes where it stopped instead of
/// applying earlier records again. The log is truncated before the marker
/// is reset; a marker left beyond the end of the log is treated as 0.
pub fn replay(
    cache: &PageCache,
    log: &mut WriteAheadLog,
    table: &TableData,
) -> Result<ReplaySummary> {
    let mut header = table.header(cache)?;
    let end_offset = log.end_offset();

    if header.applied_log_offset > end_offset {
        warn!(
            table = %table.file(),
            marker = header.applied_log_offset,
            log_len = end_offset,
            "replay marker is past the end of the log, resetting"
        );
        header = DataFileHeader {
            applied_log_offset: 0,
            ..header.settled()
        };
        table.write_header(cache, header)?;
    }

    let mut summary = ReplaySummary {
        start_offset: header.applied_log_offset,
        end_offset,
        ..ReplaySummary::default()
    };
    if end_offset == 0 && header.applied_log_offset == 0 {
        return Ok(summary);
    }

    log.seek(header.applied_log_offset);
    while let Some(record) = log.read_next()? {
        let end = log.position();
        if apply_record(cache, table, &record, end)? {
            summary.applied += 1;
        } else {
            warn!(
                table = %table.file(),
                kind = %record.kind(),
                tag = record.record_tag(),
                "log record names a missing row, skipping"
            );
            summary.skipped += 1;
        }
        mark_applied(cache, table, end)?;
    }

    log.truncate()?;
    let header = table.header(cache)?;
    let header = DataFileHeader {
        applied_log_offset: 0,
        replay_epoch: header.replay_epoch + 1,
        ..header.settled()
    };
    table.write_header(cache, header)?;

    info!(
        table = %table.file(),
        applied = summary.applied,
        skipped = summary.skipped,
        epoch = header.replay_epoch,
        "replayed log"
    );
    Ok(summary)
}
