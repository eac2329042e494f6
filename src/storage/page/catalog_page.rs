use crate::common::{BlockAddress, CairnError, PageKind, Result, PAGE_SIZE};
use crate::tuple::SchemaDescriptor;

use super::{read_u32, write_u32, PageCodec};

/// Catalog page layout:
///
/// +---------------------------+
/// | entry_count       (u32)   |  offset 0
/// | free_space        (u32)   |  offset 4
/// | next_page         (u32)   |  offset 8
/// | entry_offsets[n]  (u32)   |  offset 12, grows forward
/// +---------------------------+
/// |        free space         |
/// +---------------------------+
/// | descriptor n-1            |  grows backward from the end
/// | ...                       |
/// | descriptor 0              |  ends at PAGE_SIZE
/// +---------------------------+
///
/// Descriptor `i` occupies `[entry_offsets[i], entry_offsets[i - 1])`, with
/// `entry_offsets[-1]` taken as PAGE_SIZE, so offsets strictly decrease.
pub const CATALOG_HEADER_SIZE: usize = 12;

/// Size of one entry in the offset array
pub const ENTRY_OFFSET_SIZE: usize = 4;

const ENTRY_COUNT_OFFSET: usize = 0;
const FREE_SPACE_OFFSET: usize = 4;
const NEXT_PAGE_OFFSET: usize = 8;

/// Largest descriptor an empty catalog page can hold
pub const MAX_DESCRIPTOR_SIZE: usize = PAGE_SIZE - CATALOG_HEADER_SIZE - ENTRY_OFFSET_SIZE;

/// A descriptor together with the page offset it is stored at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub offset: u32,
    pub descriptor: SchemaDescriptor,
}

/// A slotted page of variable-length schema descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    next_page: Option<BlockAddress>,
    entries: Vec<CatalogEntry>,
}

impl CatalogPage {
    pub fn new() -> Self {
        Self {
            next_page: None,
            entries: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn next_page(&self) -> Option<BlockAddress> {
        self.next_page
    }

    pub fn set_next_page(&mut self, page: Option<BlockAddress>) {
        self.next_page = page;
    }

    /// End of the header and offset array.
    fn header_end(entry_count: usize) -> usize {
        CATALOG_HEADER_SIZE + entry_count * ENTRY_OFFSET_SIZE
    }

    /// Start of the lowest stored descriptor (PAGE_SIZE when empty).
    fn low_water(&self) -> usize {
        self.entries
            .last()
            .map(|e| e.offset as usize)
            .unwrap_or(PAGE_SIZE)
    }

    /// Bytes between the offset array and the lowest descriptor.
    pub fn free_space(&self) -> usize {
        self.low_water() - Self::header_end(self.entry_count())
    }

    /// Returns whether a descriptor of `size` serialized bytes fits.
    pub fn can_insert(&self, size: usize) -> bool {
        size + ENTRY_OFFSET_SIZE <= self.free_space()
    }

    /// Stores a descriptor below the previous one and returns its entry index.
    /// Fails with PageFull when it would collide with the growing offset array.
    pub fn insert_descriptor(&mut self, descriptor: SchemaDescriptor) -> Result<usize> {
        let size = descriptor.serialized_len();
        let header_end = Self::header_end(self.entry_count() + 1);

        let offset = match self.low_water().checked_sub(size) {
            Some(offset) if offset >= header_end => offset,
            _ => return Err(CairnError::PageFull),
        };

        self.entries.push(CatalogEntry {
            offset: offset as u32,
            descriptor,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    /// Finds a descriptor by table name.
    pub fn find(&self, table_name: &str) -> Option<&SchemaDescriptor> {
        self.descriptors().find(|d| d.table_name() == table_name)
    }
}

impl Default for CatalogPage {
    fn default() -> Self {
        Self::new()
    }
}

impl PageCodec for CatalogPage {
    const KIND: PageKind = PageKind::Catalog;

    fn deserialize(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE);

        let entry_count = read_u32(data, ENTRY_COUNT_OFFSET) as usize;
        let free_space = read_u32(data, FREE_SPACE_OFFSET) as usize;
        let next_page = BlockAddress::from_link(read_u32(data, NEXT_PAGE_OFFSET));

        if Self::header_end(entry_count) > PAGE_SIZE {
            return Err(CairnError::corrupt(format!(
                "catalog entry count {entry_count} overflows the page"
            )));
        }
        let header_end = Self::header_end(entry_count);

        let mut entries = Vec::with_capacity(entry_count);
        let mut upper = PAGE_SIZE;
        for i in 0..entry_count {
            let offset = read_u32(data, CATALOG_HEADER_SIZE + i * ENTRY_OFFSET_SIZE) as usize;
            if offset < header_end || offset >= upper {
                return Err(CairnError::corrupt(format!(
                    "catalog entry {i} at offset {offset} is outside [{header_end}, {upper})"
                )));
            }

            let mut cursor = &data[offset..upper];
            let descriptor = SchemaDescriptor::deserialize(&mut cursor)?;
            if !cursor.is_empty() {
                return Err(CairnError::corrupt(format!(
                    "catalog entry {i} leaves {} unused bytes",
                    cursor.len()
                )));
            }

            entries.push(CatalogEntry {
                offset: offset as u32,
                descriptor,
            });
            upper = offset;
        }

        if free_space != upper - header_end {
            return Err(CairnError::corrupt(format!(
                "catalog free space {free_space} disagrees with layout ({})",
                upper - header_end
            )));
        }

        Ok(Self { next_page, entries })
    }

    fn serialize_into(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.fill(0);

        write_u32(data, ENTRY_COUNT_OFFSET, self.entry_count() as u32);
        write_u32(data, FREE_SPACE_OFFSET, self.free_space() as u32);
        write_u32(data, NEXT_PAGE_OFFSET, BlockAddress::to_link(self.next_page));

        for (i, entry) in self.entries.iter().enumerate() {
            write_u32(data, CATALOG_HEADER_SIZE + i * ENTRY_OFFSET_SIZE, entry.offset);
            let start = entry.offset as usize;
            let mut slot = &mut data[start..start + entry.descriptor.serialized_len()];
            entry.descriptor.serialize(&mut slot);
        }
    }
}
