use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::common::{PageKey, SlotId, PAGE_SIZE};

/// Bytes of one cached page
pub type PageBytes = Box<[u8; PAGE_SIZE]>;

/// Shared lock on a slot's bytes, owned independently of any borrow of the slot
pub type SlotReadLock = ArcRwLockReadGuard<RawRwLock, PageBytes>;

/// Exclusive lock on a slot's bytes, owned independently of any borrow of the slot
pub type SlotWriteLock = ArcRwLockWriteGuard<RawRwLock, PageBytes>;

/// BufferSlot is one in-memory cache entry of the buffer pool: a page's bytes
/// plus cache metadata. Slots are built once when the pool is created and are
/// only referenced afterwards.
pub struct BufferSlot {
    /// The slot ID (arena and index)
    slot_id: SlotId,
    /// The page identity this slot currently caches
    identity: Mutex<Option<PageKey>>,
    /// Number of outstanding checkouts, including ones waiting on the data lock
    ref_count: AtomicU32,
    /// Whether the slot has been handed out by the pool
    in_use: AtomicBool,
    /// Whether the bytes differ from what is on disk
    is_dirty: AtomicBool,
    /// Pool clock value at the most recent checkout
    last_touched: AtomicU64,
    /// The page bytes; the lock is the slot's reader/writer lock
    data: Arc<RwLock<PageBytes>>,
}

impl BufferSlot {
    pub fn new(slot_id: SlotId) -> Self {
        Self {
            slot_id,
            identity: Mutex::new(None),
            ref_count: AtomicU32::new(0),
            in_use: AtomicBool::new(false),
            is_dirty: AtomicBool::new(false),
            last_touched: AtomicU64::new(0),
            data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
        }
    }

    pub fn slot_id(&self) -> SlotId {
        self.slot_id
    }

    /// Returns the page identity cached in this slot.
    pub fn identity(&self) -> Option<PageKey> {
        self.identity.lock().clone()
    }

    pub(crate) fn assign(&self, key: PageKey) {
        *self.identity.lock() = Some(key);
    }

    pub(crate) fn clear_identity(&self) {
        *self.identity.lock() = None;
    }

    /// Returns whether this slot caches `key`.
    pub fn holds(&self, key: &PageKey) -> bool {
        self.identity.lock().as_ref() == Some(key)
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Increments the reference count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the reference count and returns the new value.
    /// Returns None if the count was already 0; it never goes negative.
    pub(crate) fn unpin(&self) -> Option<u32> {
        loop {
            let current = self.ref_count.load(Ordering::Acquire);
            if current == 0 {
                return None;
            }
            if self
                .ref_count
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(current - 1);
            }
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Marks the slot reserved. Returns false if it already was.
    pub(crate) fn reserve(&self) -> bool {
        !self.in_use.swap(true, Ordering::AcqRel)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self, stamp: u64) {
        self.last_touched.store(stamp, Ordering::Relaxed);
    }

    /// Takes the shared lock on the page bytes, blocking while a writer holds it.
    pub(crate) fn read_lock(&self) -> SlotReadLock {
        self.data.read_arc()
    }

    /// Takes the exclusive lock on the page bytes, blocking while anyone holds it.
    pub(crate) fn write_lock(&self) -> SlotWriteLock {
        self.data.write_arc()
    }

    /// Copies the page bytes out of the slot.
    pub fn copy_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE);
        data.copy_from_slice(&self.data.read()[..]);
    }

    /// Clears metadata so the slot can go back on the free list.
    /// Returns false if the slot was not in use.
    pub(crate) fn reset(&self) -> bool {
        *self.identity.lock() = None;
        self.ref_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.in_use.swap(false, Ordering::AcqRel)
    }
}
