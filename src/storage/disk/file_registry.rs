use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{FileKey, Result};

use super::{BlockFile, FileLayout};

/// Keeps one open BlockFile per table file, opened on first use.
pub struct FileRegistry {
    layout: FileLayout,
    files: Mutex<HashMap<FileKey, Arc<BlockFile>>>,
}

impl FileRegistry {
    pub fn new(layout: FileLayout) -> Self {
        Self {
            layout,
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Returns the block file for `key`, opening or creating it if needed.
    pub fn open(&self, key: &FileKey) -> Result<Arc<BlockFile>> {
        let mut files = self.files.lock();
        if let Some(file) = files.get(key) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(BlockFile::open_or_create(self.layout.block_path(key))?);
        files.insert(key.clone(), Arc::clone(&file));
        Ok(file)
    }

    /// Syncs every open file.
    pub fn sync_all(&self) -> Result<()> {
        let files: Vec<_> = self.files.lock().values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.files.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_reuses_handles() {
        let dir = TempDir::new().unwrap();
        let layout = FileLayout::new(dir.path());
        layout.create_database_dirs("shop").unwrap();
        let registry = FileRegistry::new(layout);

        let key = FileKey::data("shop", "orders");
        let a = registry.open(&key).unwrap();
        let b = registry.open(&key).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.open_count(), 1);

        registry.open(&FileKey::header("shop", "orders")).unwrap();
        assert_eq!(registry.open_count(), 2);
    }
}
