use std::path::{Path, PathBuf};

use super::{CairnError, Result};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Default buffer budget in bytes (1 MiB)
pub const DEFAULT_BUFFER_BUDGET: usize = 1024 * 1024;

/// Default number of WAL handles the log pool keeps open
pub const DEFAULT_MAX_LOG_HANDLES: usize = 64;

/// Share of the buffer budget given to record-page slots, as numerator / denominator
pub const RECORD_ARENA_SHARE: (usize, usize) = (3, 4);

/// Share of the buffer budget given to catalog-page slots, as numerator / denominator
pub const CATALOG_ARENA_SHARE: (usize, usize) = (1, 8);

/// Minimum record slots: appending to a full chain holds the tail while allocating its successor.
pub const MIN_RECORD_SLOTS: usize = 2;

/// Minimum catalog slots
pub const MIN_CATALOG_SLOTS: usize = 1;

const ENV_BUFFER_BUDGET: &str = "CAIRN_BUFFER_BUDGET";
const ENV_MAX_LOG_HANDLES: &str = "CAIRN_MAX_LOG_HANDLES";
const ENV_SYNC_WAL: &str = "CAIRN_SYNC_WAL";

/// Runtime configuration of a storage engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Root directory; databases live in `install_root/<db_name>/`
    pub install_root: PathBuf,
    /// Memory budget for the buffer pool, in bytes
    pub buffer_budget: usize,
    /// Maximum number of WAL handles held by the log pool
    pub max_log_handles: usize,
    /// Whether every WAL append is followed by an fsync
    pub sync_wal: bool,
}

impl StorageConfig {
    /// Creates a configuration rooted at `install_root` with default settings.
    pub fn new<P: AsRef<Path>>(install_root: P) -> Self {
        Self {
            install_root: install_root.as_ref().to_path_buf(),
            buffer_budget: DEFAULT_BUFFER_BUDGET,
            max_log_handles: DEFAULT_MAX_LOG_HANDLES,
            sync_wal: false,
        }
    }

    /// Creates a configuration and overrides fields from `CAIRN_*` environment variables.
    pub fn from_env<P: AsRef<Path>>(install_root: P) -> Result<Self> {
        let mut config = Self::new(install_root);

        if let Ok(raw) = std::env::var(ENV_BUFFER_BUDGET) {
            config.buffer_budget = raw.trim().parse().map_err(|_| {
                CairnError::InvalidConfig(format!("{ENV_BUFFER_BUDGET} is not a byte count: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_MAX_LOG_HANDLES) {
            config.max_log_handles = raw.trim().parse().map_err(|_| {
                CairnError::InvalidConfig(format!("{ENV_MAX_LOG_HANDLES} is not a count: {raw}"))
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_SYNC_WAL) {
            config.sync_wal = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_buffer_budget(mut self, bytes: usize) -> Self {
        self.buffer_budget = bytes;
        self
    }

    pub fn with_max_log_handles(mut self, count: usize) -> Self {
        self.max_log_handles = count;
        self
    }

    pub fn with_sync_wal(mut self, sync: bool) -> Self {
        self.sync_wal = sync;
        self
    }

    /// Number of record-page slots carved out of the budget.
    pub fn record_slots(&self) -> usize {
        self.buffer_budget / RECORD_ARENA_SHARE.1 * RECORD_ARENA_SHARE.0 / PAGE_SIZE
    }

    /// Number of catalog-page slots carved out of the budget.
    pub fn catalog_slots(&self) -> usize {
        self.buffer_budget / CATALOG_ARENA_SHARE.1 * CATALOG_ARENA_SHARE.0 / PAGE_SIZE
    }

    /// Checks that the configuration can back a working engine.
    pub fn validate(&self) -> Result<()> {
        if self.record_slots() < MIN_RECORD_SLOTS {
            return Err(CairnError::InvalidConfig(format!(
                "buffer budget of {} bytes yields {} record slots, need at least {}",
                self.buffer_budget,
                self.record_slots(),
                MIN_RECORD_SLOTS
            )));
        }
        if self.catalog_slots() < MIN_CATALOG_SLOTS {
            return Err(CairnError::InvalidConfig(format!(
                "buffer budget of {} bytes yields no catalog slots",
                self.buffer_budget
            )));
        }
        if self.max_log_handles == 0 {
            return Err(CairnError::InvalidConfig(
                "max_log_handles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
