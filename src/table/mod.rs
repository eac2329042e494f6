//! Row storage: one record-page chain per column in the table's data file.

mod column_chain;
mod row_codec;

pub use column_chain::{ColumnChain, ColumnScan, RecordLocation};
pub use row_codec::{decode_field, encode_field};

use crate::buffer::PageCache;
use crate::common::{CairnError, FileKey, Result, RowTag};
use crate::storage::page::{DataFileHeader, DATA_FILE_HEADER_ADDRESS};
use crate::tuple::{SchemaDescriptor, Value};

/// A table's rows, addressed through its descriptor's column chains.
///
/// A row tag is the row's ordinal: row `n` is the n-th record of every
/// column chain. Callers serialize mutations of one table.
pub struct TableData {
    descriptor: SchemaDescriptor,
    file: FileKey,
    chains: Vec<ColumnChain>,
}

impl TableData {
    /// Binds a descriptor whose columns all have storage addresses.
    pub fn new(database: &str, descriptor: SchemaDescriptor) -> Result<Self> {
        let file = FileKey::data(database, descriptor.table_name());
        let chains = descriptor
            .columns()
            .map(|col| {
                let head = col.storage_address.ok_or_else(|| {
                    CairnError::corrupt(format!(
                        "column {} of {} has no storage address",
                        col.name,
                        descriptor.table_name()
                    ))
                })?;
                Ok(ColumnChain::new(file.clone(), head, col.byte_length))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            descriptor,
            file,
            chains,
        })
    }

    /// Creates the data file of a new table: the header block and an empty
    /// chain per column. Fills in the descriptor's storage addresses.
    pub fn create(
        cache: &PageCache,
        database: &str,
        mut descriptor: SchemaDescriptor,
    ) -> Result<Self> {
        let file = FileKey::data(database, descriptor.table_name());

        if cache.files().open(&file)?.num_blocks() != 0 {
            return Err(CairnError::corrupt(format!("data file {file} is not empty")));
        }
        cache
            .allocate_new_page(&file, DataFileHeader::new())?
            .release()?;

        let lengths: Vec<u32> = descriptor.columns().map(|c| c.byte_length).collect();
        for (ordinal, length) in lengths.into_iter().enumerate() {
            let chain = ColumnChain::create(cache, &file, length)?;
            descriptor.set_storage_address(ordinal, chain.head());
        }

        Self::new(database, descriptor)
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn file(&self) -> &FileKey {
        &self.file
    }

    pub fn chain(&self, ordinal: usize) -> Option<&ColumnChain> {
        self.chains.get(ordinal)
    }

    /// Looks up a column's chain by name.
    pub fn chain_by_name(&self, column: &str) -> Result<&ColumnChain> {
        let col = self.descriptor.column_by_name(column)?;
        Ok(&self.chains[col.ordinal])
    }

    /// Number of rows, counted along the first column.
    pub fn row_count(&self, cache: &PageCache) -> Result<u64> {
        match self.chains.first() {
            Some(chain) => chain.row_count(cache),
            None => Ok(0),
        }
    }

    /// Appends a row of values already resolved against the descriptor.
    pub fn insert(&self, cache: &PageCache, values: &[Value]) -> Result<RowTag> {
        let records = self.encode(values)?;
        let tag = self.row_count(cache)?;
        for (chain, record) in self.chains.iter().zip(&records) {
            chain.append(cache, record)?;
        }
        Ok(tag)
    }

    /// Appends one raw record to a single column.
    pub fn append_field(&self, cache: &PageCache, column: &str, record: &[u8]) -> Result<()> {
        self.chain_by_name(column)?.append(cache, record)?;
        Ok(())
    }

    fn encode(&self, values: &[Value]) -> Result<Vec<Vec<u8>>> {
        if values.len() != self.descriptor.column_count() {
            return Err(CairnError::Schema(format!(
                "table {} has {} columns, got {} values",
                self.descriptor.table_name(),
                self.descriptor.column_count(),
                values.len()
            )));
        }
        self.descriptor
            .columns()
            .zip(values)
            .map(|(col, value)| encode_field(&col, value))
            .collect()
    }

    /// Reads row `tag`, or None if there is no such row.
    pub fn read_row(&self, cache: &PageCache, tag: RowTag) -> Result<Option<Vec<Value>>> {
        let mut row = Vec::with_capacity(self.chains.len());
        for (col, chain) in self.descriptor.columns().zip(&self.chains) {
            match chain.read(cache, tag)? {
                Some(record) => row.push(decode_field(&col, &record)?),
                None => return Ok(None),
            }
        }
        Ok(Some(row))
    }

    /// Reads every row in tag order.
    pub fn scan(&self, cache: &PageCache) -> Result<Vec<Vec<Value>>> {
        let mut columns = Vec::with_capacity(self.chains.len());
        for (col, chain) in self.descriptor.columns().zip(&self.chains) {
            let mut values = Vec::new();
            for page in chain.pages(cache) {
                for record in page?.records() {
                    values.push(decode_field(&col, record)?);
                }
            }
            columns.push(values);
        }

        let row_count = columns.first().map(Vec::len).unwrap_or(0);
        if columns.iter().any(|c| c.len() != row_count) {
            return Err(CairnError::corrupt(format!(
                "columns of {} hold different row counts",
                self.descriptor.table_name()
            )));
        }

        let mut rows: Vec<Vec<Value>> = (0..row_count)
            .map(|_| Vec::with_capacity(columns.len()))
            .collect();
        for column in columns {
            for (row, value) in rows.iter_mut().zip(column) {
                row.push(value);
            }
        }
        Ok(rows)
    }

    /// Overwrites row `tag` in every column. Returns false if there is no such row.
    pub fn overwrite_row(&self, cache: &PageCache, tag: RowTag, values: &[Value]) -> Result<bool> {
        let records = self.encode(values)?;
        for (chain, record) in self.chains.iter().zip(&records) {
            if !chain.overwrite(cache, tag, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Removes row `tag` from every column of a table that held `rows_before`
    /// rows. Returns false if there is no such row.
    ///
    /// A column already one row short lost the row in an earlier, interrupted
    /// pass and is left alone, so each column gives up exactly one record.
    pub fn remove_row(&self, cache: &PageCache, tag: RowTag, rows_before: u64) -> Result<bool> {
        if tag >= rows_before {
            return Ok(false);
        }
        for (col, chain) in self.descriptor.columns().zip(&self.chains) {
            let rows = chain.row_count(cache)?;
            if rows + 1 == rows_before {
                continue;
            }
            if rows != rows_before {
                return Err(CairnError::corrupt(format!(
                    "column {} of {} holds {rows} rows, expected {rows_before}",
                    col.name,
                    self.descriptor.table_name()
                )));
            }
            if chain.remove(cache, tag)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reads the data file header.
    pub fn header(&self, cache: &PageCache) -> Result<DataFileHeader> {
        let guard =
            cache.checkout_for_read::<DataFileHeader>(&self.file.page(DATA_FILE_HEADER_ADDRESS))?;
        Ok(*guard.page())
    }

    /// Replaces the data file header.
    pub fn write_header(&self, cache: &PageCache, header: DataFileHeader) -> Result<()> {
        let mut guard =
            cache.checkout_for_write::<DataFileHeader>(&self.file.page(DATA_FILE_HEADER_ADDRESS))?;
        *guard.page_mut() = header;
        guard.release()
    }
}
