//! Integration tests for the page cache: identity uniqueness, reference
//! counting, reader/writer exclusion and blocking on slot exhaustion

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use cairn::buffer::{BufferPool, PageCache};
use cairn::common::{BlockAddress, CairnError, FileKey, PageKey, PageKind, PAGE_SIZE};
use cairn::storage::disk::{FileLayout, FileRegistry};
use cairn::storage::page::{CatalogPage, DataFileHeader, PageCodec, RecordPage};
use rand::Rng;
use tempfile::TempDir;

/// Long enough for a spawned thread to reach its blocking call
const SETTLE: Duration = Duration::from_millis(100);

fn create_cache(record_slots: usize, catalog_slots: usize) -> (PageCache, TempDir) {
    let dir = TempDir::new().unwrap();
    let layout = FileLayout::new(dir.path());
    layout.create_database_dirs("db").unwrap();
    let cache = PageCache::new(
        BufferPool::new(record_slots, catalog_slots),
        FileRegistry::new(layout),
    );
    (cache, dir)
}

fn data_file() -> FileKey {
    FileKey::data("db", "t")
}

/// Allocates `count` record pages, each holding one zeroed u64 counter.
fn allocate_counters(cache: &PageCache, count: usize) -> Vec<PageKey> {
    cache
        .allocate_new_page(&data_file(), DataFileHeader::new())
        .unwrap()
        .release()
        .unwrap();

    (0..count)
        .map(|_| {
            let mut page = RecordPage::new(8);
            page.insert_record(&0u64.to_le_bytes()).unwrap();
            let guard = cache.allocate_new_page(&data_file(), page).unwrap();
            let key = guard.key().clone();
            guard.release().unwrap();
            key
        })
        .collect()
}

fn counter(page: &RecordPage) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(page.record(0).unwrap());
    u64::from_le_bytes(bytes)
}

#[test]
fn test_identity_uniqueness_under_random_interleavings() {
    let (cache, _dir) = create_cache(4, 1);
    let keys = Arc::new(allocate_counters(&cache, 6));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let keys = Arc::clone(&keys);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut writes = 0u64;
                for _ in 0..200 {
                    let key = &keys[rng.gen_range(0..keys.len())];
                    if rng.gen_bool(0.5) {
                        let mut guard = cache.checkout_for_write::<RecordPage>(key).unwrap();
                        assert_eq!(cache.slots_holding(key), 1);
                        let next = counter(&guard) + 1;
                        guard.overwrite_record(0, &next.to_le_bytes()).unwrap();
                        guard.release().unwrap();
                        writes += 1;
                    } else {
                        let guard = cache.checkout_for_read::<RecordPage>(key).unwrap();
                        assert_eq!(cache.slots_holding(key), 1);
                        assert!(cache.ref_count(key).unwrap() >= 1);
                        guard.release();
                    }
                }
                writes
            })
        })
        .collect();

    let total_writes: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let mut total = 0;
    for key in keys.iter() {
        let guard = cache.checkout_for_read::<RecordPage>(key).unwrap();
        total += counter(&guard);
    }
    assert_eq!(total, total_writes);

    // Every checkout was released, so every slot is free again
    assert_eq!(cache.resident_count(), 0);
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 4);
}

#[test]
fn test_ref_count_tracks_checkouts() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);
    assert_eq!(cache.ref_count(&key), None);

    let first = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    let second = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    assert_eq!(cache.ref_count(&key), Some(2));
    assert_eq!(cache.slots_holding(&key), 1);
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 1);

    first.release();
    assert_eq!(cache.ref_count(&key), Some(1));
    drop(second);
    assert_eq!(cache.ref_count(&key), None);
    assert!(!cache.is_resident(&key));
    assert_eq!(cache.slots_holding(&key), 0);
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 2);
}

#[test]
fn test_writer_excludes_readers() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);

    let mut writer = cache.checkout_for_write::<RecordPage>(&key).unwrap();
    let read_done = Arc::new(AtomicBool::new(false));

    let reader = {
        let cache = cache.clone();
        let key = key.clone();
        let read_done = Arc::clone(&read_done);
        thread::spawn(move || {
            let guard = cache.checkout_for_read::<RecordPage>(&key).unwrap();
            read_done.store(true, Ordering::SeqCst);
            counter(&guard)
        })
    };

    thread::sleep(SETTLE);
    assert!(!read_done.load(Ordering::SeqCst));

    writer.overwrite_record(0, &7u64.to_le_bytes()).unwrap();
    writer.release().unwrap();

    // The reader sees the value written before the writer released
    assert_eq!(reader.join().unwrap(), 7);
    assert!(read_done.load(Ordering::SeqCst));
}

#[test]
fn test_two_readers_block_writer() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);

    let first = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    let second = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    let write_done = Arc::new(AtomicBool::new(false));

    let writer = {
        let cache = cache.clone();
        let key = key.clone();
        let write_done = Arc::clone(&write_done);
        thread::spawn(move || {
            let mut guard = cache.checkout_for_write::<RecordPage>(&key).unwrap();
            write_done.store(true, Ordering::SeqCst);
            guard.overwrite_record(0, &1u64.to_le_bytes()).unwrap();
            guard.release().unwrap();
        })
    };

    thread::sleep(SETTLE);
    assert!(!write_done.load(Ordering::SeqCst));
    // The waiting writer holds a reference too
    assert_eq!(cache.ref_count(&key), Some(3));

    first.release();
    thread::sleep(SETTLE);
    assert!(!write_done.load(Ordering::SeqCst));

    second.release();
    writer.join().unwrap();
    assert!(write_done.load(Ordering::SeqCst));

    let guard = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    assert_eq!(counter(&guard), 1);
}

#[test]
fn test_checkout_blocks_until_a_slot_is_released() {
    let (cache, _dir) = create_cache(1, 1);
    let keys = allocate_counters(&cache, 2);

    let held = cache.checkout_for_read::<RecordPage>(&keys[0]).unwrap();
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 0);
    let done = Arc::new(AtomicBool::new(false));

    let waiter = {
        let cache = cache.clone();
        let key = keys[1].clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let guard = cache.checkout_for_read::<RecordPage>(&key).unwrap();
            done.store(true, Ordering::SeqCst);
            guard.release();
        })
    };

    thread::sleep(SETTLE);
    assert!(!done.load(Ordering::SeqCst));

    held.release();
    waiter.join().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 1);
}

#[test]
fn test_out_of_space_without_slots() {
    let (cache, _dir) = create_cache(0, 1);
    let key = data_file().page(BlockAddress::new(1));
    assert!(matches!(
        cache.checkout_for_read::<RecordPage>(&key),
        Err(CairnError::OutOfSpace {
            kind: PageKind::Record
        })
    ));
}

#[test]
fn test_page_kind_mismatch() {
    let (cache, _dir) = create_cache(1, 1);
    let key = data_file().page(BlockAddress::new(0));
    assert!(matches!(
        cache.checkout_for_read::<CatalogPage>(&key),
        Err(CairnError::PageKindMismatch { .. })
    ));
    assert!(matches!(
        cache.allocate_new_page(&FileKey::header("db", "t"), RecordPage::new(4)),
        Err(CairnError::PageKindMismatch { .. })
    ));
}

#[test]
fn test_catalog_pages_use_their_own_arena() {
    let (cache, _dir) = create_cache(1, 1);
    let record_key = allocate_counters(&cache, 1).remove(0);

    let catalog = cache
        .allocate_new_page(&FileKey::header("db", "t"), CatalogPage::new())
        .unwrap();
    let record = cache.checkout_for_read::<RecordPage>(&record_key).unwrap();
    assert_eq!(cache.pool().free_slot_count(PageKind::Record), 0);
    assert_eq!(cache.pool().free_slot_count(PageKind::Catalog), 0);
    assert_eq!(cache.resident_count(), 2);

    record.release();
    catalog.release().unwrap();
    assert_eq!(cache.resident_count(), 0);
}

#[test]
fn test_dirty_write_is_on_disk_after_release() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);

    let mut guard = cache.checkout_for_write::<RecordPage>(&key).unwrap();
    assert!(!guard.is_dirty());
    guard.overwrite_record(0, &42u64.to_le_bytes()).unwrap();
    assert!(guard.is_dirty());
    guard.release().unwrap();

    let file = cache.files().open(&key.file).unwrap();
    let mut data = vec![0u8; PAGE_SIZE];
    file.read(key.address, &mut data).unwrap();
    assert_eq!(counter(&RecordPage::deserialize(&data).unwrap()), 42);
}

#[test]
fn test_clean_checkouts_do_not_write() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);
    let file = cache.files().open(&key.file).unwrap();
    let writes = file.num_writes();

    cache.checkout_for_read::<RecordPage>(&key).unwrap().release();
    cache
        .checkout_for_write::<RecordPage>(&key)
        .unwrap()
        .release()
        .unwrap();
    assert_eq!(file.num_writes(), writes);
}

#[test]
fn test_dropped_write_checkout_writes_back() {
    let (cache, _dir) = create_cache(2, 1);
    let key = allocate_counters(&cache, 1).remove(0);

    {
        let mut guard = cache.checkout_for_write::<RecordPage>(&key).unwrap();
        guard.overwrite_record(0, &9u64.to_le_bytes()).unwrap();
    }

    assert!(!cache.is_resident(&key));
    let guard = cache.checkout_for_read::<RecordPage>(&key).unwrap();
    assert_eq!(counter(&guard), 9);
}

#[test]
fn test_catalog_readers_share_and_writer_waits() {
    let (cache, _dir) = create_cache(1, 1);
    let file = FileKey::header("db", "t");
    let key = {
        let guard = cache.allocate_new_page(&file, CatalogPage::new()).unwrap();
        let key = guard.key().clone();
        guard.release().unwrap();
        key
    };

    // Both readers hold the page at the same time
    let both_reading = Arc::new(Barrier::new(3));
    let may_release = Arc::new(Barrier::new(3));
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            let both_reading = Arc::clone(&both_reading);
            let may_release = Arc::clone(&may_release);
            thread::spawn(move || {
                let guard = cache.checkout_for_read::<CatalogPage>(&key).unwrap();
                both_reading.wait();
                may_release.wait();
                guard.release();
            })
        })
        .collect();
    both_reading.wait();
    assert_eq!(cache.ref_count(&key), Some(2));

    let write_done = Arc::new(AtomicBool::new(false));
    let writer = {
        let cache = cache.clone();
        let key = key.clone();
        let write_done = Arc::clone(&write_done);
        thread::spawn(move || {
            let mut guard = cache.checkout_for_write::<CatalogPage>(&key).unwrap();
            write_done.store(true, Ordering::SeqCst);
            guard.set_next_page(Some(BlockAddress::new(5)));
            guard.release().unwrap();
        })
    };

    thread::sleep(SETTLE);
    assert!(!write_done.load(Ordering::SeqCst));

    may_release.wait();
    for reader in readers {
        reader.join().unwrap();
    }
    writer.join().unwrap();

    let guard = cache.checkout_for_read::<CatalogPage>(&key).unwrap();
    assert_eq!(guard.next_page(), Some(BlockAddress::new(5)));
}
