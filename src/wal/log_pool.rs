use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{CairnError, Result, StorageConfig};
use crate::storage::disk::FileLayout;

use super::WriteAheadLog;

/// Key of a table's log: (database, table)
type LogKey = (String, String);

#[derive(Default)]
struct PoolInner {
    /// Open logs not currently checked out
    idle: HashMap<LogKey, WriteAheadLog>,
    /// Tables whose log is checked out
    checked_out: HashSet<LogKey>,
}

struct PoolState {
    layout: FileLayout,
    max_handles: usize,
    sync_on_append: bool,
    inner: Mutex<PoolInner>,
}

impl PoolState {
    fn give_back(&self, key: LogKey, log: WriteAheadLog) {
        let mut inner = self.inner.lock();
        inner.checked_out.remove(&key);
        inner.idle.insert(key, log);
    }
}

/// LogHandlePool is a bounded registry of open write-ahead logs keyed by
/// (database, table). Checkout is exclusive: while a table's handle is out,
/// every other checkout of it fails with AlreadyInUse.
#[derive(Clone)]
pub struct LogHandlePool {
    state: Arc<PoolState>,
}

impl LogHandlePool {
    pub fn new(layout: FileLayout, max_handles: usize, sync_on_append: bool) -> Self {
        Self {
            state: Arc::new(PoolState {
                layout,
                max_handles,
                sync_on_append,
                inner: Mutex::new(PoolInner::default()),
            }),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            FileLayout::new(&config.install_root),
            config.max_log_handles,
            config.sync_wal,
        )
    }

    /// Takes exclusive ownership of a table's log, opening it on first use.
    ///
    /// When the pool is at capacity an idle log is closed to make room; if
    /// every handle is checked out, fails with LogHandlesExhausted. A log is
    /// opened with the pool unlocked, its key reserved as checked out.
    pub fn checkout(&self, database: &str, table: &str) -> Result<LogHandle> {
        let key = (database.to_string(), table.to_string());
        let idle = {
            let mut inner = self.state.inner.lock();

            if inner.checked_out.contains(&key) {
                return Err(CairnError::AlreadyInUse {
                    database: database.to_string(),
                    table: table.to_string(),
                });
            }

            let idle = inner.idle.remove(&key);
            if idle.is_none()
                && inner.idle.len() + inner.checked_out.len() >= self.state.max_handles
            {
                let victim = inner.idle.keys().next().cloned().ok_or(
                    CairnError::LogHandlesExhausted {
                        max: self.state.max_handles,
                    },
                )?;
                inner.idle.remove(&victim);
                debug!(database = %victim.0, table = %victim.1, "closed idle log handle");
            }
            inner.checked_out.insert(key.clone());
            idle
        };

        let log = match idle {
            Some(log) => log,
            None => {
                let opened = WriteAheadLog::open(
                    self.state.layout.log_path(database, table),
                    self.state.sync_on_append,
                );
                match opened {
                    Ok(log) => log,
                    Err(e) => {
                        self.state.inner.lock().checked_out.remove(&key);
                        return Err(e);
                    }
                }
            }
        };

        Ok(LogHandle {
            key,
            log: Some(log),
            state: Arc::clone(&self.state),
        })
    }

    /// Closes a table's idle log handle, if open. Returns false if the
    /// handle is checked out.
    pub fn close(&self, database: &str, table: &str) -> bool {
        let key = (database.to_string(), table.to_string());
        let mut inner = self.state.inner.lock();
        if inner.checked_out.contains(&key) {
            return false;
        }
        inner.idle.remove(&key);
        true
    }

    /// Number of open handles, idle or checked out.
    pub fn open_count(&self) -> usize {
        let inner = self.state.inner.lock();
        inner.idle.len() + inner.checked_out.len()
    }

    pub fn is_checked_out(&self, database: &str, table: &str) -> bool {
        self.state
            .inner
            .lock()
            .checked_out
            .contains(&(database.to_string(), table.to_string()))
    }

    pub fn max_handles(&self) -> usize {
        self.state.max_handles
    }
}

/// Exclusive checkout of one table's log. Dropping or releasing it returns
/// the log to the pool.
pub struct LogHandle {
    key: LogKey,
    log: Option<WriteAheadLog>,
    state: Arc<PoolState>,
}

impl LogHandle {
    pub fn database(&self) -> &str {
        &self.key.0
    }

    pub fn table(&self) -> &str {
        &self.key.1
    }

    /// Returns the log to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for LogHandle {
    type Target = WriteAheadLog;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.log.as_ref().expect("log handle already released")
    }
}

impl DerefMut for LogHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.log.as_mut().expect("log handle already released")
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            self.state.give_back(self.key.clone(), log);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalRecord;
    use tempfile::TempDir;

    fn create_pool(max: usize) -> (LogHandlePool, TempDir) {
        let dir = TempDir::new().unwrap();
        let layout = FileLayout::new(dir.path());
        layout.create_database_dirs("db").unwrap();
        (LogHandlePool::new(layout, max, false), dir)
    }

    #[test]
    fn test_checkout_is_exclusive() {
        let (pool, _dir) = create_pool(4);

        let handle = pool.checkout("db", "t").unwrap();
        assert!(pool.is_checked_out("db", "t"));
        assert!(matches!(
            pool.checkout("db", "t"),
            Err(CairnError::AlreadyInUse { .. })
        ));

        // Other tables are unaffected
        let other = pool.checkout("db", "u").unwrap();
        assert_eq!(other.table(), "u");

        handle.release();
        assert!(!pool.is_checked_out("db", "t"));
        assert!(pool.checkout("db", "t").is_ok());
    }

    #[test]
    fn test_handle_keeps_log_state() {
        let (pool, _dir) = create_pool(4);
        {
            let mut handle = pool.checkout("db", "t").unwrap();
            handle.append(&WalRecord::delete(3)).unwrap();
        }
        let handle = pool.checkout("db", "t").unwrap();
        assert_eq!(handle.end_offset(), 9);
        assert_eq!(pool.open_count(), 1);
    }

    #[test]
    fn test_capacity() {
        let (pool, _dir) = create_pool(2);

        let a = pool.checkout("db", "a").unwrap();
        let b = pool.checkout("db", "b").unwrap();
        assert!(matches!(
            pool.checkout("db", "c"),
            Err(CairnError::LogHandlesExhausted { max: 2 })
        ));

        // An idle handle is closed to make room
        drop(a);
        let c = pool.checkout("db", "c").unwrap();
        assert_eq!(pool.open_count(), 2);
        drop((b, c));
    }

    #[test]
    fn test_failed_open_frees_the_key() {
        let (pool, _dir) = create_pool(2);

        // No directories exist for this database, so the log cannot be created
        assert!(matches!(
            pool.checkout("missing", "t"),
            Err(CairnError::Io(_))
        ));
        assert!(!pool.is_checked_out("missing", "t"));
        assert_eq!(pool.open_count(), 0);

        let a = pool.checkout("db", "a").unwrap();
        let b = pool.checkout("db", "b").unwrap();
        drop((a, b));
    }
}
