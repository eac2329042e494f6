use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::common::{CairnError, PageKind, Result, SlotId, StorageConfig};

use super::BufferSlot;

/// The slots of one page kind plus their free list.
///
/// The free list is a bounded channel preloaded with every slot index:
/// acquiring receives an index, releasing sends it back, and a blocked
/// receiver is woken by the next release.
struct SlotArena {
    slots: Vec<Arc<BufferSlot>>,
    free_tx: Sender<u32>,
    free_rx: Receiver<u32>,
}

impl SlotArena {
    fn new(kind: PageKind, count: usize) -> Self {
        // A zero-capacity channel would be a rendezvous channel, so keep at least 1
        let (free_tx, free_rx) = bounded(count.max(1));
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            slots.push(Arc::new(BufferSlot::new(SlotId::new(kind, i as u32))));
            // Cannot fail: the channel has room for every index and we hold the receiver
            let _ = free_tx.send(i as u32);
        }
        Self {
            slots,
            free_tx,
            free_rx,
        }
    }
}

/// BufferPool owns every in-memory slot, split into a record arena and a
/// catalog arena sized once at startup. Slots are never evicted; a slot is
/// reused only after it has been explicitly released.
pub struct BufferPool {
    record: SlotArena,
    catalog: SlotArena,
    /// Logical clock for "most recently touched" bookkeeping
    clock: AtomicU64,
}

impl BufferPool {
    /// Creates a pool with the given number of slots per arena.
    pub fn new(record_slots: usize, catalog_slots: usize) -> Self {
        Self {
            record: SlotArena::new(PageKind::Record, record_slots),
            catalog: SlotArena::new(PageKind::Catalog, catalog_slots),
            clock: AtomicU64::new(0),
        }
    }

    /// Creates a pool partitioned from the configured buffer budget.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.record_slots(), config.catalog_slots())
    }

    fn arena(&self, kind: PageKind) -> &SlotArena {
        match kind {
            PageKind::Record => &self.record,
            PageKind::Catalog => &self.catalog,
        }
    }

    /// Takes a free slot of `kind` without waiting.
    /// Returns None when every slot of that kind is in use.
    pub fn try_acquire_free_slot(&self, kind: PageKind) -> Option<Arc<BufferSlot>> {
        let arena = self.arena(kind);
        match arena.free_rx.try_recv() {
            Ok(index) => Some(self.reserve(arena, index)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Takes a free slot of `kind`, blocking until another thread releases one.
    /// Fails with OutOfSpace only when the arena has no slots at all.
    pub fn acquire_free_slot(&self, kind: PageKind) -> Result<Arc<BufferSlot>> {
        let arena = self.arena(kind);
        if arena.slots.is_empty() {
            return Err(CairnError::OutOfSpace { kind });
        }

        if let Some(slot) = self.try_acquire_free_slot(kind) {
            return Ok(slot);
        }

        debug!(%kind, "no free slot, waiting for a release");
        let index = arena
            .free_rx
            .recv()
            .map_err(|_| CairnError::OutOfSpace { kind })?;
        Ok(self.reserve(arena, index))
    }

    fn reserve(&self, arena: &SlotArena, index: u32) -> Arc<BufferSlot> {
        let slot = Arc::clone(&arena.slots[index as usize]);
        if !slot.reserve() {
            warn!(slot = %slot.slot_id(), "free list handed out a slot already in use");
        }
        self.touch(&slot);
        slot
    }

    /// Clears the slot's metadata and returns it to its free list,
    /// waking one thread blocked in `acquire_free_slot`.
    pub fn release_slot(&self, slot: &BufferSlot) {
        if !slot.reset() {
            warn!(slot = %slot.slot_id(), "released a slot that was already free");
            return;
        }
        let arena = self.arena(slot.slot_id().kind);
        if arena.free_tx.send(slot.slot_id().index).is_err() {
            warn!(slot = %slot.slot_id(), "free list is closed");
        }
    }

    /// Stamps the slot with the next clock value.
    pub fn touch(&self, slot: &BufferSlot) {
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        slot.touch(stamp);
    }

    /// Returns the number of slots of `kind`.
    pub fn slot_count(&self, kind: PageKind) -> usize {
        self.arena(kind).slots.len()
    }

    /// Returns the number of free slots of `kind`.
    pub fn free_slot_count(&self, kind: PageKind) -> usize {
        self.arena(kind).free_rx.len()
    }

    /// Returns every slot of `kind`.
    pub fn slots(&self, kind: PageKind) -> &[Arc<BufferSlot>] {
        &self.arena(kind).slots
    }

    /// Returns the in-use slot of `kind` touched most recently.
    pub fn most_recently_touched(&self, kind: PageKind) -> Option<Arc<BufferSlot>> {
        self.slots(kind)
            .iter()
            .filter(|s| s.is_in_use())
            .max_by_key(|s| s.last_touched())
            .cloned()
    }
}
