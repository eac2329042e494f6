use crate::common::{BlockAddress, CairnError, LogOffset, PageKind, Result, PAGE_SIZE};

use super::{read_u32, read_u64, write_u32, write_u64, PageCodec};

const MAGIC_NUMBER: u32 = 0x4E52_4143; // "CARN" little-endian
const VERSION: u32 = 1;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const APPLIED_LOG_OFFSET: usize = 8;
const REPLAY_EPOCH_OFFSET: usize = 16;
const PENDING_LOG_OFFSET: usize = 24;
const PENDING_ROW_COUNT_OFFSET: usize = 32;

/// Address of the header within every data file
pub const DATA_FILE_HEADER_ADDRESS: BlockAddress = BlockAddress(0);

/// Block 0 of a table's data file.
///
/// `applied_log_offset` is the WAL position up to which every record has been
/// applied to record pages. Replay resumes from it, so records before it are
/// never applied twice. `replay_epoch` counts completed log truncations.
///
/// A record whose page changes have started but whose marker has not moved
/// yet is in flight: `pending_log_offset` is the log position just past it
/// and `pending_row_count` the table's row count before it, both 0 when
/// nothing is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    pub applied_log_offset: LogOffset,
    pub replay_epoch: u64,
    pub pending_log_offset: LogOffset,
    pub pending_row_count: u64,
}

impl DataFileHeader {
    pub fn new() -> Self {
        Self {
            applied_log_offset: 0,
            replay_epoch: 0,
            pending_log_offset: 0,
            pending_row_count: 0,
        }
    }

    /// Returns the header with nothing in flight.
    pub fn settled(self) -> Self {
        Self {
            pending_log_offset: 0,
            pending_row_count: 0,
            ..self
        }
    }
}

impl Default for DataFileHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCodec for DataFileHeader {
    const KIND: PageKind = PageKind::Record;

    fn deserialize(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);

        let magic = read_u32(data, MAGIC_OFFSET);
        if magic != MAGIC_NUMBER {
            return Err(CairnError::corrupt(format!(
                "data file magic {magic:#010x} is invalid"
            )));
        }
        let version = read_u32(data, VERSION_OFFSET);
        if version != VERSION {
            return Err(CairnError::corrupt(format!(
                "data file version {version} is unsupported"
            )));
        }

        Ok(Self {
            applied_log_offset: read_u64(data, APPLIED_LOG_OFFSET),
            replay_epoch: read_u64(data, REPLAY_EPOCH_OFFSET),
            pending_log_offset: read_u64(data, PENDING_LOG_OFFSET),
            pending_row_count: read_u64(data, PENDING_ROW_COUNT_OFFSET),
        })
    }

    fn serialize_into(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);
        write_u32(data, MAGIC_OFFSET, MAGIC_NUMBER);
        write_u32(data, VERSION_OFFSET, VERSION);
        write_u64(data, APPLIED_LOG_OFFSET, self.applied_log_offset);
        write_u64(data, REPLAY_EPOCH_OFFSET, self.replay_epoch);
        write_u64(data, PENDING_LOG_OFFSET, self.pending_log_offset);
        write_u64(data, PENDING_ROW_COUNT_OFFSET, self.pending_row_count);
    }
}
