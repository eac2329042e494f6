use crate::common::{BlockAddress, CairnError, PageKind, Result, PAGE_SIZE};

use super::{read_u32, write_u32, PageCodec};

/// Record page layout:
///
/// | Field         | Offset | Size |
/// |---------------|--------|------|
/// | record_length | 0      | 4    |
/// | record_count  | 4      | 4    |
/// | prev_page     | 8      | 4    |
/// | next_page     | 12     | 4    |
///
/// followed by free space, then `record_count` records of `record_length`
/// bytes packed from the end of the page backward: record `i` starts at
/// `PAGE_SIZE - (i + 1) * record_length`.
pub const RECORD_HEADER_SIZE: usize = 16;

const RECORD_LENGTH_OFFSET: usize = 0;
const RECORD_COUNT_OFFSET: usize = 4;
const PREV_PAGE_OFFSET: usize = 8;
const NEXT_PAGE_OFFSET: usize = 12;

/// Largest record a page can hold
pub const MAX_RECORD_LENGTH: usize = PAGE_SIZE - RECORD_HEADER_SIZE;

/// A page of homogeneous fixed-length records, linked into a per-column chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    record_length: u32,
    prev_page: Option<BlockAddress>,
    next_page: Option<BlockAddress>,
    /// Records in insertion order, record `i` at `[i * len, (i + 1) * len)`
    records: Vec<u8>,
}

impl RecordPage {
    /// Creates an empty, unlinked page for records of `record_length` bytes.
    pub fn new(record_length: u32) -> Self {
        assert!(
            record_length > 0 && record_length as usize <= MAX_RECORD_LENGTH,
            "record length {record_length} does not fit a page"
        );
        Self {
            record_length,
            prev_page: None,
            next_page: None,
            records: Vec::new(),
        }
    }

    pub fn record_length(&self) -> u32 {
        self.record_length
    }

    pub fn record_count(&self) -> usize {
        self.records.len() / self.record_length as usize
    }

    /// Maximum number of records this page can hold.
    pub fn capacity(&self) -> usize {
        MAX_RECORD_LENGTH / self.record_length as usize
    }

    /// Returns whether one more record fits.
    pub fn has_room(&self) -> bool {
        self.free_space() >= self.record_length as usize
    }

    /// Offset of the lowest stored record (PAGE_SIZE when empty).
    pub fn tail_offset(&self) -> usize {
        PAGE_SIZE - self.records.len()
    }

    /// Bytes between the header and the lowest stored record.
    pub fn free_space(&self) -> usize {
        self.tail_offset() - RECORD_HEADER_SIZE
    }

    pub fn prev_page(&self) -> Option<BlockAddress> {
        self.prev_page
    }

    pub fn set_prev_page(&mut self, page: Option<BlockAddress>) {
        self.prev_page = page;
    }

    pub fn next_page(&self) -> Option<BlockAddress> {
        self.next_page
    }

    pub fn set_next_page(&mut self, page: Option<BlockAddress>) {
        self.next_page = page;
    }

    fn check_length(&self, record: &[u8]) -> Result<()> {
        if record.len() != self.record_length as usize {
            return Err(CairnError::RecordLength {
                expected: self.record_length as usize,
                actual: record.len(),
            });
        }
        Ok(())
    }

    fn range(&self, index: usize) -> std::ops::Range<usize> {
        let len = self.record_length as usize;
        index * len..(index + 1) * len
    }

    /// Appends a record and returns its index within the page.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<usize> {
        self.check_length(record)?;
        if !self.has_room() {
            return Err(CairnError::PageFull);
        }
        self.records.extend_from_slice(record);
        Ok(self.record_count() - 1)
    }

    /// Gets a record by index.
    pub fn record(&self, index: usize) -> Option<&[u8]> {
        if index >= self.record_count() {
            return None;
        }
        Some(&self.records[self.range(index)])
    }

    /// Replaces the record at `index` in place.
    pub fn overwrite_record(&mut self, index: usize, record: &[u8]) -> Result<()> {
        self.check_length(record)?;
        if index >= self.record_count() {
            return Err(CairnError::corrupt(format!(
                "record index {index} out of range ({} records)",
                self.record_count()
            )));
        }
        let range = self.range(index);
        self.records[range].copy_from_slice(record);
        Ok(())
    }

    /// Removes the record at `index`, shifting later records down so the page
    /// stays densely packed, and returns the removed bytes.
    pub fn remove_record(&mut self, index: usize) -> Result<Vec<u8>> {
        if index >= self.record_count() {
            return Err(CairnError::corrupt(format!(
                "record index {index} out of range ({} records)",
                self.record_count()
            )));
        }
        let range = self.range(index);
        Ok(self.records.drain(range).collect())
    }

    /// Iterates over records in insertion order.
    pub fn records(&self) -> impl Iterator<Item = &[u8]> {
        self.records.chunks_exact(self.record_length as usize)
    }
}

impl PageCodec for RecordPage {
    const KIND: PageKind = PageKind::Record;

    fn deserialize(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);

        let record_length = read_u32(data, RECORD_LENGTH_OFFSET) as usize;
        let record_count = read_u32(data, RECORD_COUNT_OFFSET) as usize;

        if record_length == 0 || record_length > MAX_RECORD_LENGTH {
            return Err(CairnError::corrupt(format!(
                "record length {record_length} is invalid"
            )));
        }
        if record_count > MAX_RECORD_LENGTH / record_length {
            return Err(CairnError::corrupt(format!(
                "{record_count} records of {record_length} bytes overflow the page"
            )));
        }

        let mut records = Vec::with_capacity(record_count * record_length);
        for i in 0..record_count {
            let start = PAGE_SIZE - (i + 1) * record_length;
            records.extend_from_slice(&data[start..start + record_length]);
        }

        Ok(Self {
            record_length: record_length as u32,
            prev_page: BlockAddress::from_link(read_u32(data, PREV_PAGE_OFFSET)),
            next_page: BlockAddress::from_link(read_u32(data, NEXT_PAGE_OFFSET)),
            records,
        })
    }

    fn serialize_into(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);

        write_u32(data, RECORD_LENGTH_OFFSET, self.record_length);
        write_u32(data, RECORD_COUNT_OFFSET, self.record_count() as u32);
        write_u32(data, PREV_PAGE_OFFSET, BlockAddress::to_link(self.prev_page));
        write_u32(data, NEXT_PAGE_OFFSET, BlockAddress::to_link(self.next_page));

        let len = self.record_length as usize;
        for (i, record) in self.records().enumerate() {
            let start = PAGE_SIZE - (i + 1) * len;
            data[start..start + len].copy_from_slice(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_page_new() {
        let page = RecordPage::new(20);
        assert_eq!(page.record_count(), 0);
        assert_eq!(page.tail_offset(), PAGE_SIZE);
        assert_eq!(page.capacity(), 204);
        assert!(page.has_room());
        assert_eq!(page.prev_page(), None);
        assert_eq!(page.next_page(), None);
    }

    #[test]
    fn test_insert_five_records() {
        let mut page = RecordPage::new(20);
        for i in 0..5u8 {
            assert_eq!(page.insert_record(&[i; 20]).unwrap(), i as usize);
        }
        assert_eq!(page.record_count(), 5);
        assert_eq!(page.tail_offset(), PAGE_SIZE - 5 * 20);
        assert_eq!(page.record(3).unwrap(), &[3u8; 20]);

        let data = page.serialize();
        assert_eq!(&data[PAGE_SIZE - 20..], &[0u8; 20]);
        assert_eq!(&data[PAGE_SIZE - 100..PAGE_SIZE - 80], &[4u8; 20]);
    }

    #[test]
    fn test_record_length_enforced() {
        let mut page = RecordPage::new(8);
        assert!(matches!(
            page.insert_record(&[0u8; 7]),
            Err(CairnError::RecordLength {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_remove_compacts() {
        let mut page = RecordPage::new(4);
        for i in 0..4u8 {
            page.insert_record(&[i; 4]).unwrap();
        }
        assert_eq!(page.remove_record(1).unwrap(), vec![1u8; 4]);
        assert_eq!(page.record_count(), 3);
        let remaining: Vec<_> = page.records().map(|r| r[0]).collect();
        assert_eq!(remaining, vec![0, 2, 3]);
        assert_eq!(page.tail_offset(), PAGE_SIZE - 12);
        assert!(page.remove_record(3).is_err());
    }

    #[test]
    fn test_overwrite() {
        let mut page = RecordPage::new(4);
        page.insert_record(&[1; 4]).unwrap();
        page.overwrite_record(0, &[9; 4]).unwrap();
        assert_eq!(page.record(0).unwrap(), &[9; 4]);
        assert!(page.overwrite_record(1, &[9; 4]).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut page = RecordPage::new(12);
        page.set_prev_page(Some(BlockAddress::new(3)));
        page.set_next_page(Some(BlockAddress::new(8)));
        for i in 0..50u8 {
            page.insert_record(&[i; 12]).unwrap();
        }

        let data = page.serialize();
        assert_eq!(read_u32(&data, RECORD_COUNT_OFFSET), 50);
        let recovered = RecordPage::deserialize(&data).unwrap();
        assert_eq!(recovered, page);
    }

    #[test]
    fn test_corrupt_headers_rejected() {
        let zeros = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            RecordPage::deserialize(&zeros),
            Err(CairnError::CorruptPage { .. })
        ));

        let mut data = RecordPage::new(100).serialize();
        write_u32(&mut data, RECORD_COUNT_OFFSET, 41);
        assert!(RecordPage::deserialize(&data).is_err());
        write_u32(&mut data, RECORD_COUNT_OFFSET, 40);
        assert!(RecordPage::deserialize(&data).is_ok());
    }
}
