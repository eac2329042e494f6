//! Databases, tables and their schema descriptors.
//!
//! A database is a directory under the install root. A table is a
//! `<table>.header` file holding a chain of catalog pages, starting at
//! block 0, whose descriptors include the table's own, and a data file
//! holding its column chains.

use std::fs;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::buffer::PageCache;
use crate::common::{BlockAddress, CairnError, FileKey, Result};
use crate::storage::disk::FileLayout;
use crate::storage::page::{CatalogPage, MAX_DESCRIPTOR_SIZE};
use crate::table::TableData;
use crate::tuple::{ColumnSpec, SchemaDescriptor, TableKind};

/// Head of every catalog chain
const CATALOG_HEAD: BlockAddress = BlockAddress(0);

pub struct Catalog {
    cache: PageCache,
    layout: FileLayout,
    /// Serializes database and table creation
    ddl: Mutex<()>,
}

impl Catalog {
    pub fn new(cache: PageCache, layout: FileLayout) -> Self {
        Self {
            cache,
            layout,
            ddl: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Creates the directory skeleton of a new database.
    pub fn create_database(&self, name: &str) -> Result<()> {
        validate_name("database", name)?;
        let _ddl = self.ddl.lock();

        if self.database_exists(name) {
            return Err(CairnError::DatabaseExists(name.to_string()));
        }
        self.layout.create_database_dirs(name)?;
        info!(database = name, "created database");
        Ok(())
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.layout.tables_dir(name).is_dir()
    }

    /// Names of every database under the install root, sorted.
    pub fn list_databases(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(self.layout.root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if self.database_exists(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn require_database(&self, database: &str) -> Result<()> {
        if !self.database_exists(database) {
            return Err(CairnError::DatabaseNotFound(database.to_string()));
        }
        Ok(())
    }

    /// A table exists once its header file holds at least one page.
    pub fn table_exists(&self, database: &str, table: &str) -> bool {
        fs::metadata(self.layout.header_path(database, table))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Creates a table: its data file with one chain per column, then its
    /// catalog chain holding the completed descriptor.
    pub fn create_table(
        &self,
        database: &str,
        name: &str,
        kind: TableKind,
        columns: &[ColumnSpec],
    ) -> Result<SchemaDescriptor> {
        validate_name("table", name)?;
        let descriptor = SchemaDescriptor::new(name, kind, columns)?;
        let size = descriptor.serialized_len();
        if size > MAX_DESCRIPTOR_SIZE {
            return Err(CairnError::DescriptorTooLarge { size });
        }

        let _ddl = self.ddl.lock();
        self.require_database(database)?;
        if self.table_exists(database, name) {
            return Err(CairnError::TableExists {
                database: database.to_string(),
                table: name.to_string(),
            });
        }

        let table = TableData::create(&self.cache, database, descriptor)?;
        let descriptor = table.descriptor().clone();
        self.append_descriptor(&FileKey::header(database, name), descriptor.clone())?;

        info!(
            database,
            table = name,
            columns = descriptor.column_count(),
            "created table"
        );
        Ok(descriptor)
    }

    /// Looks up a table's descriptor along its catalog chain.
    pub fn resolve_table(&self, database: &str, table: &str) -> Result<SchemaDescriptor> {
        self.require_database(database)?;
        let not_found = || CairnError::TableNotFound {
            database: database.to_string(),
            table: table.to_string(),
        };
        if !self.table_exists(database, table) {
            return Err(not_found());
        }

        let file = FileKey::header(database, table);
        let mut address = Some(CATALOG_HEAD);
        while let Some(current) = address {
            let page = self.cache.checkout_for_read::<CatalogPage>(&file.page(current))?;
            if let Some(descriptor) = page.find(table) {
                return Ok(descriptor.clone());
            }
            address = page.next_page();
        }
        Err(not_found())
    }

    /// Resolves a table and binds it to its column chains.
    pub fn open_table(&self, database: &str, table: &str) -> Result<TableData> {
        let descriptor = self.resolve_table(database, table)?;
        TableData::new(database, descriptor)
    }

    /// Names of every table in a database, sorted.
    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        self.require_database(database)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(self.layout.tables_dir(database))? {
            let path = entry?.path();
            if let Some(name) = FileLayout::table_name_of(&path) {
                if self.table_exists(database, &name) {
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every descriptor along a catalog chain, in chain order.
    pub fn descriptors(&self, file: &FileKey) -> Result<Vec<SchemaDescriptor>> {
        if self.cache.files().open(file)?.num_blocks() == 0 {
            return Ok(Vec::new());
        }

        let mut descriptors = Vec::new();
        let mut address = Some(CATALOG_HEAD);
        while let Some(current) = address {
            let page = self.cache.checkout_for_read::<CatalogPage>(&file.page(current))?;
            descriptors.extend(page.descriptors().cloned());
            address = page.next_page();
        }
        Ok(descriptors)
    }

    /// Stores a descriptor in the first page of the chain with room for it,
    /// linking a new page at the end when every page is full. Returns the
    /// page it was stored in.
    pub fn append_descriptor(
        &self,
        file: &FileKey,
        descriptor: SchemaDescriptor,
    ) -> Result<BlockAddress> {
        let size = descriptor.serialized_len();
        if size > MAX_DESCRIPTOR_SIZE {
            return Err(CairnError::DescriptorTooLarge { size });
        }

        if self.cache.files().open(file)?.num_blocks() == 0 {
            let mut head = self.cache.allocate_new_page(file, CatalogPage::new())?;
            head.insert_descriptor(descriptor)?;
            let address = head.address();
            head.release()?;
            return Ok(address);
        }

        let mut address = CATALOG_HEAD;
        loop {
            let mut page = self.cache.checkout_for_write::<CatalogPage>(&file.page(address))?;
            if page.can_insert(size) {
                page.insert_descriptor(descriptor)?;
                page.release()?;
                return Ok(address);
            }
            match page.next_page() {
                Some(next) => {
                    page.release()?;
                    address = next;
                }
                None => {
                    // Release the tail first so a single catalog slot suffices
                    page.release()?;
                    let mut successor = self.cache.allocate_new_page(file, CatalogPage::new())?;
                    successor.insert_descriptor(descriptor)?;
                    let new_address = successor.address();
                    successor.release()?;

                    let mut tail = self.cache.checkout_for_write::<CatalogPage>(&file.page(address))?;
                    tail.set_next_page(Some(new_address));
                    tail.release()?;
                    debug!(%file, tail = %address, page = %new_address, "extended catalog chain");
                    return Ok(new_address);
                }
            }
        }
    }
}

/// Names become file and directory names.
fn validate_name(what: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(CairnError::Schema(format!("invalid {what} name {name:?}")));
    }
    Ok(())
}
