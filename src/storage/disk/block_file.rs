use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{BlockAddress, Result, PAGE_SIZE};

/// BlockFile performs raw whole-page I/O on a single file.
/// Every operation reads or writes exactly one page; there is no caching.
pub struct BlockFile {
    /// The underlying file
    file: Mutex<File>,
    /// Path of the file
    path: PathBuf,
    /// Number of whole pages in the file
    num_blocks: AtomicU32,
    /// Number of page reads performed
    num_reads: AtomicU32,
    /// Number of page writes performed
    num_writes: AtomicU32,
}

impl BlockFile {
    /// Opens the file at `path`, creating it if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        // A torn trailing partial page is not addressable
        let file_size = file.metadata()?.len();
        let num_blocks = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            num_blocks: AtomicU32::new(num_blocks),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads the block at `address` into `data`.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn read(&self, address: BlockAddress, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(address.byte_offset()))?;

        // Reading beyond the end of the file yields zeros
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < PAGE_SIZE {
            data[filled..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` to the block at `address`.
    /// The buffer must be exactly PAGE_SIZE bytes.
    pub fn write(&self, address: BlockAddress, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(address.byte_offset()))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_blocks
            .fetch_max(address.as_u32() + 1, Ordering::SeqCst);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends a zero-filled block and returns its address, the first
    /// address past the current end of file.
    pub fn allocate_new(&self) -> Result<BlockAddress> {
        let mut file = self.file.lock();
        let address = BlockAddress::new(self.num_blocks.load(Ordering::SeqCst));

        let zeros = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(address.byte_offset()))?;
        file.write_all(&zeros)?;
        file.flush()?;

        self.num_blocks.store(address.as_u32() + 1, Ordering::SeqCst);
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), %address, "allocated block");
        Ok(address)
    }

    /// Returns the number of whole blocks in the file.
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks.load(Ordering::SeqCst)
    }

    /// Returns the number of page reads performed.
    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of page writes performed.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes file contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        let file = self.file.get_mut();
        let _ = file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_block_file_new() {
        let temp_file = NamedTempFile::new().unwrap();
        let bf = BlockFile::open_or_create(temp_file.path()).unwrap();
        assert_eq!(bf.num_blocks(), 0);
    }

    #[test]
    fn test_block_file_allocate() {
        let temp_file = NamedTempFile::new().unwrap();
        let bf = BlockFile::open_or_create(temp_file.path()).unwrap();

        assert_eq!(bf.allocate_new().unwrap(), BlockAddress::new(0));
        assert_eq!(bf.allocate_new().unwrap(), BlockAddress::new(1));
        assert_eq!(bf.num_blocks(), 2);
        assert_eq!(
            std::fs::metadata(temp_file.path()).unwrap().len(),
            2 * PAGE_SIZE as u64
        );
    }

    #[test]
    fn test_block_file_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let bf = BlockFile::open_or_create(temp_file.path()).unwrap();
        let address = bf.allocate_new().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        write_data[PAGE_SIZE - 1] = 128;
        bf.write(address, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        bf.read(address, &mut read_data).unwrap();
        assert_eq!(read_data, write_data);
        assert_eq!(bf.num_reads(), 1);
    }

    #[test]
    fn test_block_file_ignores_partial_tail() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), vec![7u8; PAGE_SIZE + 10]).unwrap();

        let bf = BlockFile::open_or_create(temp_file.path()).unwrap();
        assert_eq!(bf.num_blocks(), 1);
        // The next allocation overwrites the partial block
        assert_eq!(bf.allocate_new().unwrap(), BlockAddress::new(1));
    }
}
