use std::path::{Path, PathBuf};

use crate::common::{FileKey, TableFile};

const TABLES_DIR: &str = "tables";
const DATA_DIR: &str = "data";
const LOG_DIR: &str = "log";

const HEADER_EXT: &str = "header";
const DATA_EXT: &str = "data";
const LOG_EXT: &str = "log";

/// Maps databases and tables onto the on-disk directory convention:
///
/// ```text
/// install_root/<db>/tables/<table>.header      catalog page chain
/// install_root/<db>/tables/data/<table>.data   data file header + record pages
/// install_root/<db>/tables/log/<table>.log     write-ahead log
/// ```
#[derive(Debug, Clone)]
pub struct FileLayout {
    root: PathBuf,
}

impl FileLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }

    pub fn tables_dir(&self, database: &str) -> PathBuf {
        self.database_dir(database).join(TABLES_DIR)
    }

    pub fn data_dir(&self, database: &str) -> PathBuf {
        self.tables_dir(database).join(DATA_DIR)
    }

    pub fn log_dir(&self, database: &str) -> PathBuf {
        self.tables_dir(database).join(LOG_DIR)
    }

    pub fn header_path(&self, database: &str, table: &str) -> PathBuf {
        self.tables_dir(database)
            .join(format!("{table}.{HEADER_EXT}"))
    }

    pub fn data_path(&self, database: &str, table: &str) -> PathBuf {
        self.data_dir(database).join(format!("{table}.{DATA_EXT}"))
    }

    pub fn log_path(&self, database: &str, table: &str) -> PathBuf {
        self.log_dir(database).join(format!("{table}.{LOG_EXT}"))
    }

    /// Path of the block file behind `key`.
    pub fn block_path(&self, key: &FileKey) -> PathBuf {
        match key.file {
            TableFile::Header => self.header_path(&key.database, &key.table),
            TableFile::Data => self.data_path(&key.database, &key.table),
        }
    }

    /// Creates the directory skeleton of a database.
    pub fn create_database_dirs(&self, database: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.data_dir(database))?;
        std::fs::create_dir_all(self.log_dir(database))?;
        Ok(())
    }

    /// Returns the table name if `path` is a table header file.
    pub fn table_name_of(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != HEADER_EXT {
            return None;
        }
        path.file_stem()?.to_str().map(str::to_string)
    }
}
