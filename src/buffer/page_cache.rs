use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockWriteGuard;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{BlockAddress, CairnError, FileKey, PageKey, PageKind, Result};
use crate::storage::disk::FileRegistry;
use crate::storage::page::PageCodec;

use super::{BufferPool, BufferSlot, PageReadGuard, PageWriteGuard, SlotWriteLock};

/// How a checkout found its slot
enum Pinned {
    /// Already cached; the caller must take the slot lock itself
    Resident(Arc<BufferSlot>),
    /// Loaded by this checkout, which still holds the exclusive lock
    Loaded(Arc<BufferSlot>, SlotWriteLock),
}

/// State shared between the cache and the guards it hands out
pub(crate) struct CacheState {
    pool: BufferPool,
    files: FileRegistry,
    /// Identity map: page identity to the slot caching it
    identities: Mutex<HashMap<PageKey, Arc<BufferSlot>>>,
}

impl CacheState {
    pub(crate) fn files(&self) -> &FileRegistry {
        &self.files
    }

    /// Pins the slot caching `key`, loading the page from disk on a miss.
    ///
    /// The identity map lock is never held while waiting for a free slot or
    /// for a slot lock. After a wait, the map is checked again, since another
    /// thread may have registered the same identity meanwhile.
    fn pin(&self, key: &PageKey) -> Result<Pinned> {
        loop {
            if let Some(slot) = self.lookup_and_pin(key) {
                return Ok(Pinned::Resident(slot));
            }

            let file = self.files.open(&key.file)?;
            let slot = self.pool.acquire_free_slot(key.kind())?;
            let mut data = slot.write_lock();

            {
                let mut identities = self.identities.lock();
                if identities.contains_key(key) {
                    drop(identities);
                    drop(data);
                    self.pool.release_slot(&slot);
                    continue;
                }
                slot.assign(key.clone());
                slot.pin();
                identities.insert(key.clone(), Arc::clone(&slot));
            }

            if let Err(e) = file.read(key.address, &mut data[..]) {
                self.forget(key, &slot);
                drop(data);
                self.unpin(key, &slot);
                return Err(e);
            }

            debug!(%key, slot = %slot.slot_id(), "loaded page");
            return Ok(Pinned::Loaded(slot, data));
        }
    }

    fn lookup_and_pin(&self, key: &PageKey) -> Option<Arc<BufferSlot>> {
        let identities = self.identities.lock();
        let slot = identities.get(key)?;
        slot.pin();
        self.pool.touch(slot);
        Some(Arc::clone(slot))
    }

    /// Registers a freshly allocated block in a reserved slot.
    fn register(&self, key: &PageKey, slot: &Arc<BufferSlot>) {
        let mut identities = self.identities.lock();
        slot.assign(key.clone());
        slot.pin();
        identities.insert(key.clone(), Arc::clone(slot));
    }

    /// Drops the identity of a slot whose load failed, so waiters retry.
    fn forget(&self, key: &PageKey, slot: &Arc<BufferSlot>) {
        let mut identities = self.identities.lock();
        if identities.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            identities.remove(key);
        }
        slot.clear_identity();
    }

    /// Drops one reference. When the last one goes, the identity leaves the
    /// map and the slot goes back to the pool.
    pub(crate) fn unpin(&self, key: &PageKey, slot: &Arc<BufferSlot>) {
        let mut identities = self.identities.lock();
        match slot.unpin() {
            Some(0) => {
                if identities.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
                    identities.remove(key);
                }
                drop(identities);
                self.pool.release_slot(slot);
            }
            Some(_) => {}
            None => warn!(%key, "released a page that was not checked out"),
        }
    }
}

/// PageCache maps page identities to the buffer slots caching them and hands
/// out locked checkouts.
///
/// Any number of read checkouts of a page may be outstanding at once; a
/// write checkout excludes every other checkout of that page. A page stays
/// addressable while at least one checkout references it; when the last one
/// is released its identity is dropped and its slot returns to the pool.
#[derive(Clone)]
pub struct PageCache {
    state: Arc<CacheState>,
}

impl PageCache {
    pub fn new(pool: BufferPool, files: FileRegistry) -> Self {
        Self {
            state: Arc::new(CacheState {
                pool,
                files,
                identities: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.state.pool
    }

    pub fn files(&self) -> &FileRegistry {
        &self.state.files
    }

    fn check_kind<P: PageCodec>(key: &PageKey) -> Result<()> {
        if key.kind() != P::KIND {
            return Err(CairnError::PageKindMismatch {
                key: key.clone(),
                expected: P::KIND,
                actual: key.kind(),
            });
        }
        Ok(())
    }

    /// Checks out a page for reading, blocking while a writer holds it.
    pub fn checkout_for_read<P: PageCodec>(&self, key: &PageKey) -> Result<PageReadGuard<P>> {
        Self::check_kind::<P>(key)?;

        loop {
            let (slot, lock) = match self.state.pin(key)? {
                Pinned::Resident(slot) => {
                    let lock = slot.read_lock();
                    (slot, lock)
                }
                Pinned::Loaded(slot, lock) => (slot, ArcRwLockWriteGuard::downgrade(lock)),
            };

            // The loader may have failed and dropped the identity while we waited
            if !slot.holds(key) {
                drop(lock);
                self.state.unpin(key, &slot);
                continue;
            }

            let page = match P::deserialize(&lock[..]) {
                Ok(page) => page,
                Err(e) => {
                    drop(lock);
                    self.state.unpin(key, &slot);
                    return Err(e);
                }
            };

            return Ok(PageReadGuard::new(
                key.clone(),
                page,
                slot,
                lock,
                Arc::clone(&self.state),
            ));
        }
    }

    /// Checks out a page for writing, blocking while anyone else holds it.
    pub fn checkout_for_write<P: PageCodec>(&self, key: &PageKey) -> Result<PageWriteGuard<P>> {
        Self::check_kind::<P>(key)?;

        loop {
            let (slot, lock) = match self.state.pin(key)? {
                Pinned::Resident(slot) => {
                    let lock = slot.write_lock();
                    (slot, lock)
                }
                Pinned::Loaded(slot, lock) => (slot, lock),
            };

            if !slot.holds(key) {
                drop(lock);
                self.state.unpin(key, &slot);
                continue;
            }

            let page = match P::deserialize(&lock[..]) {
                Ok(page) => page,
                Err(e) => {
                    drop(lock);
                    self.state.unpin(key, &slot);
                    return Err(e);
                }
            };

            return Ok(PageWriteGuard::new(
                key.clone(),
                page,
                slot,
                lock,
                Arc::clone(&self.state),
                false,
            ));
        }
    }

    /// Appends a new block to `file` and checks it out for writing with
    /// `page` as its contents. The block reaches disk when the guard is released.
    pub fn allocate_new_page<P: PageCodec>(
        &self,
        file: &FileKey,
        page: P,
    ) -> Result<PageWriteGuard<P>> {
        let kind = file.file.page_kind();
        if kind != P::KIND {
            return Err(CairnError::PageKindMismatch {
                key: file.page(BlockAddress::new(0)),
                expected: P::KIND,
                actual: kind,
            });
        }

        let block_file = self.state.files.open(file)?;
        let address = block_file.allocate_new()?;
        let key = file.page(address);

        let slot = self.state.pool.acquire_free_slot(kind)?;
        let lock = slot.write_lock();
        self.state.register(&key, &slot);
        debug!(%key, slot = %slot.slot_id(), "allocated page");

        Ok(PageWriteGuard::new(
            key,
            page,
            slot,
            lock,
            Arc::clone(&self.state),
            true,
        ))
    }

    /// Number of identities currently mapped to a slot.
    pub fn resident_count(&self) -> usize {
        self.state.identities.lock().len()
    }

    /// Returns whether `key` is mapped to a slot.
    pub fn is_resident(&self, key: &PageKey) -> bool {
        self.state.identities.lock().contains_key(key)
    }

    /// Outstanding checkouts of `key`, or None if it is not resident.
    pub fn ref_count(&self, key: &PageKey) -> Option<u32> {
        self.state
            .identities
            .lock()
            .get(key)
            .map(|slot| slot.ref_count())
    }

    /// Number of slots, in either arena, whose identity is `key`.
    pub fn slots_holding(&self, key: &PageKey) -> usize {
        [PageKind::Record, PageKind::Catalog]
            .iter()
            .flat_map(|&kind| self.state.pool.slots(kind))
            .filter(|slot| slot.holds(key))
            .count()
    }
}
