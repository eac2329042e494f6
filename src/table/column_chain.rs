use tracing::debug;

use crate::buffer::PageCache;
use crate::common::{BlockAddress, CairnError, FileKey, Result, RowTag};
use crate::storage::page::RecordPage;

/// Where a row's record sits within a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub address: BlockAddress,
    pub index: usize,
}

/// A doubly linked chain of record pages holding one column.
///
/// Records are kept in row order across the chain: the chain's n-th record
/// belongs to row n. Pages emptied by removals stay linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnChain {
    file: FileKey,
    head: BlockAddress,
    record_length: u32,
}

impl ColumnChain {
    pub fn new(file: FileKey, head: BlockAddress, record_length: u32) -> Self {
        Self {
            file,
            head,
            record_length,
        }
    }

    /// Allocates the head page of a new chain in `file`.
    /// Block 0 must already hold the data file header.
    pub fn create(cache: &PageCache, file: &FileKey, record_length: u32) -> Result<Self> {
        if cache.files().open(file)?.num_blocks() == 0 {
            return Err(CairnError::corrupt(format!("{file} has no data file header")));
        }
        let guard = cache.allocate_new_page(file, RecordPage::new(record_length))?;
        let head = guard.address();
        guard.release()?;
        Ok(Self::new(file.clone(), head, record_length))
    }

    pub fn head(&self) -> BlockAddress {
        self.head
    }

    pub fn record_length(&self) -> u32 {
        self.record_length
    }

    /// Appends a record after the last one in the chain, linking a new page
    /// when the tail is full, and returns where it landed.
    ///
    /// The tail stays checked out for writing while its successor is
    /// allocated, so two appenders never both extend the same tail.
    pub fn append(&self, cache: &PageCache, record: &[u8]) -> Result<RecordLocation> {
        if record.len() != self.record_length as usize {
            return Err(CairnError::RecordLength {
                expected: self.record_length as usize,
                actual: record.len(),
            });
        }

        let mut address = self.last_page(cache)?;
        loop {
            let mut tail = cache.checkout_for_write::<RecordPage>(&self.file.page(address))?;

            // Another appender linked a page after we found the tail
            if let Some(next) = tail.next_page() {
                tail.release()?;
                address = next;
                continue;
            }

            if tail.has_room() {
                let index = tail.insert_record(record)?;
                tail.release()?;
                return Ok(RecordLocation { address, index });
            }

            let mut page = RecordPage::new(self.record_length);
            page.set_prev_page(Some(address));
            let index = page.insert_record(record)?;
            let successor = cache.allocate_new_page(&self.file, page)?;
            let new_address = successor.address();
            successor.release()?;

            tail.set_next_page(Some(new_address));
            tail.release()?;
            debug!(file = %self.file, tail = %address, page = %new_address, "extended column chain");
            return Ok(RecordLocation {
                address: new_address,
                index,
            });
        }
    }

    /// Follows next links from the head using read checkouts.
    fn last_page(&self, cache: &PageCache) -> Result<BlockAddress> {
        let mut address = self.head;
        loop {
            let page = cache.checkout_for_read::<RecordPage>(&self.file.page(address))?;
            let next = page.next_page();
            page.release();
            match next {
                Some(next) => address = next,
                None => return Ok(address),
            }
        }
    }

    /// Streams the chain's pages from the head.
    pub fn pages<'a>(&self, cache: &'a PageCache) -> ColumnScan<'a> {
        ColumnScan {
            cache,
            file: self.file.clone(),
            next: Some(self.head),
        }
    }

    /// Number of records in the chain.
    pub fn row_count(&self, cache: &PageCache) -> Result<u64> {
        let mut count = 0;
        for page in self.pages(cache) {
            count += page?.record_count() as u64;
        }
        Ok(count)
    }

    /// Finds the page and in-page index of row `tag`.
    pub fn locate(&self, cache: &PageCache, tag: RowTag) -> Result<Option<RecordLocation>> {
        let mut remaining = tag;
        let mut address = Some(self.head);
        while let Some(current) = address {
            let page = cache.checkout_for_read::<RecordPage>(&self.file.page(current))?;
            let count = page.record_count() as u64;
            if remaining < count {
                return Ok(Some(RecordLocation {
                    address: current,
                    index: remaining as usize,
                }));
            }
            remaining -= count;
            address = page.next_page();
        }
        Ok(None)
    }

    /// Returns a copy of row `tag`'s record.
    pub fn read(&self, cache: &PageCache, tag: RowTag) -> Result<Option<Vec<u8>>> {
        let Some(location) = self.locate(cache, tag)? else {
            return Ok(None);
        };
        let page = cache.checkout_for_read::<RecordPage>(&self.file.page(location.address))?;
        Ok(page.record(location.index).map(<[u8]>::to_vec))
    }

    /// Replaces row `tag`'s record in place. Returns false if there is no such row.
    pub fn overwrite(&self, cache: &PageCache, tag: RowTag, record: &[u8]) -> Result<bool> {
        let Some(location) = self.locate(cache, tag)? else {
            return Ok(false);
        };
        let mut page = cache.checkout_for_write::<RecordPage>(&self.file.page(location.address))?;
        page.overwrite_record(location.index, record)?;
        page.release()?;
        Ok(true)
    }

    /// Removes row `tag`'s record, compacting its page, and returns the
    /// removed bytes. Later rows shift down by one.
    pub fn remove(&self, cache: &PageCache, tag: RowTag) -> Result<Option<Vec<u8>>> {
        let Some(location) = self.locate(cache, tag)? else {
            return Ok(None);
        };
        let mut page = cache.checkout_for_write::<RecordPage>(&self.file.page(location.address))?;
        let removed = page.remove_record(location.index)?;
        page.release()?;
        Ok(Some(removed))
    }
}

/// Iterator over a chain's pages. Each page is copied out of the cache
/// under a read checkout that is released before the page is yielded.
pub struct ColumnScan<'a> {
    cache: &'a PageCache,
    file: FileKey,
    next: Option<BlockAddress>,
}

impl Iterator for ColumnScan<'_> {
    type Item = Result<RecordPage>;

    fn next(&mut self) -> Option<Self::Item> {
        let address = self.next.take()?;
        let page = match self
            .cache
            .checkout_for_read::<RecordPage>(&self.file.page(address))
        {
            Ok(guard) => guard,
            Err(e) => return Some(Err(e)),
        };
        self.next = page.next_page();
        Some(Ok(page.page().clone()))
    }
}
