use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::common::{CairnError, LogOffset, Result};

use super::record::{LogKind, WalRecord, UPDATE_HEADER_SIZE};

/// WriteAheadLog is one table's append-only log file.
///
/// Appends always go to the end of the file; reads consume records from a
/// separate cursor, so appending never moves the read position.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    /// Offset of the next record `read_next` returns
    read_pos: LogOffset,
    /// Length of the file
    end: LogOffset,
    /// Whether each append is synced to stable storage
    sync_on_append: bool,
}

impl WriteAheadLog {
    /// Opens the log at `path`, creating an empty one if needed.
    pub fn open<P: AsRef<Path>>(path: P, sync_on_append: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let end = file.metadata()?.len();

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file,
            read_pos: 0,
            end,
            sync_on_append,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record at the end of the log and returns the offset it starts at.
    pub fn append(&mut self, record: &WalRecord) -> Result<LogOffset> {
        let offset = self.end;
        let bytes = record.to_bytes();

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        if self.sync_on_append {
            self.file.sync_data()?;
        }

        self.end += bytes.len() as u64;
        debug!(
            path = %self.path.display(),
            kind = %record.kind(),
            tag = record.record_tag(),
            offset,
            "appended log record"
        );
        Ok(offset)
    }

    /// Reads the record at the read cursor and advances past it.
    /// Returns None at the end of the log. A record cut short by the end of
    /// the file is treated as the end of the log.
    pub fn read_next(&mut self) -> Result<Option<WalRecord>> {
        if self.read_pos >= self.end {
            return Ok(None);
        }

        let available = (self.end - self.read_pos) as usize;
        let mut header = vec![0u8; UPDATE_HEADER_SIZE.min(available)];
        self.read_at(self.read_pos, &mut header)?;

        let kind = LogKind::from_u8(header[0]).ok_or_else(|| {
            CairnError::CorruptLog(format!(
                "unknown log type {} at offset {} of {}",
                header[0],
                self.read_pos,
                self.path.display()
            ))
        })?;

        let total = match kind {
            LogKind::Delete => kind.header_size(),
            LogKind::Update if header.len() >= UPDATE_HEADER_SIZE => {
                let body_length = u32::from_le_bytes([header[9], header[10], header[11], header[12]]);
                UPDATE_HEADER_SIZE + body_length as usize
            }
            LogKind::Update => UPDATE_HEADER_SIZE,
        };
        if total > available {
            return Ok(self.torn_tail(available));
        }

        let mut bytes = vec![0u8; total];
        self.read_at(self.read_pos, &mut bytes)?;
        let mut cursor = &bytes[..];
        match WalRecord::decode(&mut cursor)? {
            Some(record) => {
                self.read_pos += total as u64;
                Ok(Some(record))
            }
            None => Ok(self.torn_tail(available)),
        }
    }

    fn torn_tail(&self, available: usize) -> Option<WalRecord> {
        warn!(
            path = %self.path.display(),
            offset = self.read_pos,
            bytes = available,
            "ignoring incomplete record at the end of the log"
        );
        None
    }

    fn read_at(&mut self, offset: LogOffset, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Offset of the next record `read_next` returns.
    pub fn position(&self) -> LogOffset {
        self.read_pos
    }

    /// Moves the read cursor. Offsets past the end clamp to the end.
    pub fn seek(&mut self, offset: LogOffset) {
        self.read_pos = offset.min(self.end);
    }

    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Length of the log in bytes.
    pub fn end_offset(&self) -> LogOffset {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Empties the log and resets the read cursor.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.read_pos = 0;
        self.end = 0;
        debug!(path = %self.path.display(), "truncated log");
        Ok(())
    }

    /// Flushes the log to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::Value;
    use tempfile::TempDir;

    fn open_log(dir: &TempDir) -> WriteAheadLog {
        WriteAheadLog::open(dir.path().join("t.log"), false).unwrap()
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        assert!(log.is_empty());

        let update = WalRecord::update(1, &[Value::Integer(10)]);
        let delete = WalRecord::delete(42);
        assert_eq!(log.append(&update).unwrap(), 0);
        let second = log.append(&delete).unwrap();
        assert_eq!(second as usize, update.encoded_len());
        assert_eq!(log.end_offset() as usize, update.encoded_len() + LogKind::Delete.header_size());

        assert_eq!(log.read_next().unwrap(), Some(update));
        assert_eq!(log.read_next().unwrap(), Some(delete));
        assert_eq!(log.read_next().unwrap(), None);
    }

    #[test]
    fn test_append_does_not_move_read_cursor() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);

        log.append(&WalRecord::delete(1)).unwrap();
        assert_eq!(log.read_next().unwrap(), Some(WalRecord::delete(1)));
        let pos = log.position();

        log.append(&WalRecord::delete(2)).unwrap();
        assert_eq!(log.position(), pos);
        assert_eq!(log.read_next().unwrap(), Some(WalRecord::delete(2)));
    }

    #[test]
    fn test_delete_record_size_on_disk() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        log.append(&WalRecord::delete(42)).unwrap();

        let bytes = std::fs::read(log.path()).unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], LogKind::Delete.as_u8());
    }

    #[test]
    fn test_torn_tail_is_end_of_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.log");
        {
            let mut log = WriteAheadLog::open(&path, false).unwrap();
            log.append(&WalRecord::delete(1)).unwrap();
            log.append(&WalRecord::update(2, &[Value::from("hello")])).unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();

        let mut log = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(log.read_next().unwrap(), Some(WalRecord::delete(1)));
        assert_eq!(log.read_next().unwrap(), None);
        assert_eq!(log.position(), 9);
    }

    #[test]
    fn test_unknown_kind_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, [7u8; 9]).unwrap();

        let mut log = WriteAheadLog::open(&path, false).unwrap();
        assert!(matches!(log.read_next(), Err(CairnError::CorruptLog(_))));
    }

    #[test]
    fn test_truncate_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut log = open_log(&dir);
        log.append(&WalRecord::delete(5)).unwrap();
        log.truncate().unwrap();
        assert!(log.is_empty());
        assert_eq!(log.read_next().unwrap(), None);

        log.append(&WalRecord::delete(6)).unwrap();
        drop(log);

        let mut log = open_log(&dir);
        assert_eq!(log.read_next().unwrap(), Some(WalRecord::delete(6)));
    }
}
