use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::error;

use crate::common::{BlockAddress, PageKey, Result};
use crate::storage::page::PageCodec;

use super::page_cache::CacheState;
use super::{BufferSlot, SlotReadLock, SlotWriteLock};

/// RAII guard for a read checkout.
///
/// Holds the slot's shared lock and the page decoded from the slot bytes.
/// Releasing (explicitly or on drop) unlocks the slot and drops the
/// checkout's reference.
pub struct PageReadGuard<P: PageCodec> {
    key: PageKey,
    page: P,
    slot: Arc<BufferSlot>,
    lock: Option<SlotReadLock>,
    state: Arc<CacheState>,
}

impl<P: PageCodec> PageReadGuard<P> {
    pub(crate) fn new(
        key: PageKey,
        page: P,
        slot: Arc<BufferSlot>,
        lock: SlotReadLock,
        state: Arc<CacheState>,
    ) -> Self {
        Self {
            key,
            page,
            slot,
            lock: Some(lock),
            state,
        }
    }

    /// Returns the page identity.
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn address(&self) -> BlockAddress {
        self.key.address
    }

    /// Returns the page.
    pub fn page(&self) -> &P {
        &self.page
    }

    /// Ends the checkout.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(lock) = self.lock.take() {
            drop(lock);
            self.state.unpin(&self.key, &self.slot);
        }
    }
}

impl<P: PageCodec> Deref for PageReadGuard<P> {
    type Target = P;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<P: PageCodec> Drop for PageReadGuard<P> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// RAII guard for a write checkout.
///
/// Holds the slot's exclusive lock. Mutable access marks the page dirty;
/// releasing a dirty page serializes it into the slot and writes the block
/// back to its file before the lock is dropped.
pub struct PageWriteGuard<P: PageCodec> {
    key: PageKey,
    page: P,
    slot: Arc<BufferSlot>,
    lock: Option<SlotWriteLock>,
    state: Arc<CacheState>,
    is_dirty: bool,
}

impl<P: PageCodec> PageWriteGuard<P> {
    pub(crate) fn new(
        key: PageKey,
        page: P,
        slot: Arc<BufferSlot>,
        lock: SlotWriteLock,
        state: Arc<CacheState>,
        is_dirty: bool,
    ) -> Self {
        Self {
            key,
            page,
            slot,
            lock: Some(lock),
            state,
            is_dirty,
        }
    }

    /// Returns the page identity.
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn address(&self) -> BlockAddress {
        self.key.address
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    /// Returns the page for mutation and marks it dirty.
    pub fn page_mut(&mut self) -> &mut P {
        self.is_dirty = true;
        &mut self.page
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Ends the checkout, writing the page back if it was modified.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(mut lock) = self.lock.take() else {
            return Ok(());
        };

        let result = if self.is_dirty {
            self.page.serialize_into(&mut lock[..]);
            self.slot.set_dirty(true);
            self.write_back(&lock[..])
        } else {
            Ok(())
        };

        drop(lock);
        self.state.unpin(&self.key, &self.slot);
        result
    }

    fn write_back(&self, data: &[u8]) -> Result<()> {
        let file = self.state.files().open(&self.key.file)?;
        file.write(self.key.address, data)?;
        self.slot.set_dirty(false);
        Ok(())
    }
}

impl<P: PageCodec> Deref for PageWriteGuard<P> {
    type Target = P;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

impl<P: PageCodec> DerefMut for PageWriteGuard<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.page_mut()
    }
}

impl<P: PageCodec> Drop for PageWriteGuard<P> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            error!(key = %self.key, error = %e, "write-back failed while dropping a write checkout");
        }
    }
}
