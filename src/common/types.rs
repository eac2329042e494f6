use std::fmt;

/// Block address - 0-based index of a page within one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress(pub u32);

impl BlockAddress {
    pub fn new(address: u32) -> Self {
        Self(address)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Byte offset of this block within its file.
    pub fn byte_offset(&self) -> u64 {
        self.0 as u64 * super::PAGE_SIZE as u64
    }

    /// Decodes an on-disk link field, where 0 means "no page".
    pub fn from_link(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Encodes an optional link for disk, where 0 means "no page".
    pub fn to_link(link: Option<Self>) -> u32 {
        link.map(|a| a.0).unwrap_or(0)
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

/// The two page kinds; each has its own arena in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    Catalog,
    Record,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKind::Catalog => write!(f, "catalog"),
            PageKind::Record => write!(f, "record"),
        }
    }
}

/// Which of a table's block files a page lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableFile {
    /// `<table>.header`: the catalog page chain
    Header,
    /// `<table>.data`: the data file header and record pages
    Data,
}

impl TableFile {
    /// The page kind stored in this file.
    pub fn page_kind(&self) -> PageKind {
        match self {
            TableFile::Header => PageKind::Catalog,
            TableFile::Data => PageKind::Record,
        }
    }
}

/// Identifies one block file: a table's header or data file within a database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub database: String,
    pub table: String,
    pub file: TableFile,
}

impl FileKey {
    pub fn header(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            file: TableFile::Header,
        }
    }

    pub fn data(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            file: TableFile::Data,
        }
    }

    /// Page identity of a block in this file.
    pub fn page(&self, address: BlockAddress) -> PageKey {
        PageKey {
            file: self.clone(),
            address,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            TableFile::Header => write!(f, "{}/{}.header", self.database, self.table),
            TableFile::Data => write!(f, "{}/{}", self.database, self.table),
        }
    }
}

/// Page identity: `(database, table or table.header, block address)`.
/// At most one buffer slot caches a given identity at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file: FileKey,
    pub address: BlockAddress,
}

impl PageKey {
    pub fn kind(&self) -> PageKind {
        self.file.file.page_kind()
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file, self.address)
    }
}

/// Identifies a buffer slot: its arena and its index within that arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub kind: PageKind,
    pub index: u32,
}

impl SlotId {
    pub fn new(kind: PageKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub fn as_usize(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({}:{})", self.kind, self.index)
    }
}

/// Row tag - the 0-based ordinal of a row within its table
pub type RowTag = u64;

/// Byte offset into a write-ahead log file
pub type LogOffset = u64;
