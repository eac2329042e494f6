//! Integration tests for the storage engine's row operations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cairn::storage::disk::FileLayout;
use cairn::storage::page::RecordPage;
use cairn::table::decode_field;
use cairn::wal::{apply_record, WalRecord, WriteAheadLog};
use cairn::{
    CairnError, ColumnSpec, Comparison, PageKind, StorageConfig, StorageEngine, Value,
};
use tempfile::TempDir;

const DB: &str = "shop";
const TABLE: &str = "items";

fn config(dir: &TempDir) -> StorageConfig {
    StorageConfig::new(dir.path()).with_buffer_budget(64 * 4096)
}

fn columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::integer("id"),
        ColumnSpec::varchar("name", 16),
        ColumnSpec::float("price"),
    ]
}

fn item(id: i64, name: &str, price: f64) -> Vec<Value> {
    vec![Value::Integer(id), Value::from(name), Value::Float(price)]
}

/// An engine with `rows` items (ids 0..rows) in shop.items.
fn setup(dir: &TempDir, rows: i64) -> StorageEngine {
    let engine = StorageEngine::open(config(dir)).unwrap();
    engine.create_database(DB).unwrap();
    engine.create_table(DB, TABLE, &columns()).unwrap();
    for id in 0..rows {
        engine
            .insert_row(DB, TABLE, &item(id, &format!("item{id}"), id as f64))
            .unwrap();
    }
    engine
}

fn ids(engine: &StorageEngine) -> Vec<i64> {
    engine
        .select(DB, TABLE, Some(&["id"]))
        .unwrap()
        .into_iter()
        .map(|row| match row[0] {
            Value::Integer(id) => id,
            ref other => panic!("unexpected id {other}"),
        })
        .collect()
}

#[test]
fn test_open_rejects_tiny_budget() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::new(dir.path()).with_buffer_budget(4096);
    assert!(matches!(
        StorageEngine::open(config),
        Err(CairnError::InvalidConfig(_))
    ));
}

#[test]
fn test_insert_and_select() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 0);

    assert_eq!(engine.insert_row(DB, TABLE, &item(1, "bolt", 0.5)).unwrap(), 0);
    // Raw tokens from the SQL layer resolve to the column types
    let raw = [
        Value::Raw("2".to_string()),
        Value::Raw("'nut'".to_string()),
        Value::Raw("0.25".to_string()),
    ];
    assert_eq!(engine.insert_row(DB, TABLE, &raw).unwrap(), 1);

    assert_eq!(
        engine.select(DB, TABLE, None).unwrap(),
        vec![item(1, "bolt", 0.5), item(2, "nut", 0.25)]
    );
    assert_eq!(
        engine.select(DB, TABLE, Some(&["price", "name"])).unwrap(),
        vec![
            vec![Value::Float(0.5), Value::from("bolt")],
            vec![Value::Float(0.25), Value::from("nut")],
        ]
    );
}

#[test]
fn test_insert_validates_values() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 0);

    let err = engine
        .insert_row(DB, TABLE, &[Value::Integer(1)])
        .unwrap_err();
    assert!(err.is_schema_error());

    let too_long = item(1, "a name well past sixteen bytes", 1.0);
    assert!(matches!(
        engine.insert_row(DB, TABLE, &too_long),
        Err(CairnError::TypeMismatch { .. })
    ));
    assert!(ids(&engine).is_empty());
}

#[test]
fn test_select_where() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 6);

    let cheap = engine
        .select_where(DB, TABLE, "price", Comparison::Lt, &Value::Float(2.0), Some(&["id"]))
        .unwrap();
    assert_eq!(cheap, vec![vec![Value::Integer(0)], vec![Value::Integer(1)]]);

    let named = engine
        .select_where(
            DB,
            TABLE,
            "name",
            Comparison::Eq,
            &Value::Raw("'item4'".to_string()),
            None,
        )
        .unwrap();
    assert_eq!(named, vec![item(4, "item4", 4.0)]);

    let not_three = engine
        .select_where(DB, TABLE, "id", Comparison::Ne, &Value::Raw("3".to_string()), None)
        .unwrap();
    assert_eq!(not_three.len(), 5);

    assert!(matches!(
        engine.select_where(DB, TABLE, "colour", Comparison::Eq, &Value::Integer(1), None),
        Err(CairnError::ColumnNotFound { .. })
    ));
}

#[test]
fn test_update_and_delete_go_through_the_log() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 3);

    engine
        .begin_update(DB, TABLE, 1, &item(10, "renamed", 9.0))
        .unwrap();
    engine.begin_delete(DB, TABLE, 0).unwrap();

    // Later rows shift down after a delete
    assert_eq!(
        engine.select(DB, TABLE, None).unwrap(),
        vec![item(10, "renamed", 9.0), item(2, "item2", 2.0)]
    );

    // Both records are in the log and already applied
    let data = engine.catalog().open_table(DB, TABLE).unwrap();
    let header = data.header(engine.cache()).unwrap();
    let log = WriteAheadLog::open(FileLayout::new(dir.path()).log_path(DB, TABLE), false).unwrap();
    assert_eq!(header.applied_log_offset, log.end_offset());
    assert!(log.end_offset() > 0);
}

#[test]
fn test_missing_rows_are_rejected_before_logging() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 2);

    assert!(matches!(
        engine.begin_delete(DB, TABLE, 2),
        Err(CairnError::RowNotFound { tag: 2, .. })
    ));
    assert!(matches!(
        engine.begin_update(DB, TABLE, 5, &item(5, "x", 0.0)),
        Err(CairnError::RowNotFound { .. })
    ));

    let log = engine.logs().checkout(DB, TABLE).unwrap();
    assert!(log.is_empty());
}

#[test]
fn test_concurrent_mutation_of_one_table_is_refused() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 2);

    let held = engine.logs().checkout(DB, TABLE).unwrap();
    assert!(matches!(
        engine.begin_delete(DB, TABLE, 0),
        Err(CairnError::AlreadyInUse { .. })
    ));
    assert!(matches!(
        engine.begin_update(DB, TABLE, 0, &item(0, "x", 0.0)),
        Err(CairnError::AlreadyInUse { .. })
    ));
    drop(held);

    engine.begin_delete(DB, TABLE, 0).unwrap();
    assert_eq!(ids(&engine), vec![1]);
}

/// Writes log records the way a crash between logging and applying leaves them.
fn log_unapplied(dir: &TempDir, records: &[WalRecord]) {
    let path = FileLayout::new(dir.path()).log_path(DB, TABLE);
    let mut log = WriteAheadLog::open(path, false).unwrap();
    for record in records {
        log.append(record).unwrap();
    }
}

#[test]
fn test_recover_database_replays_unapplied_records() {
    let dir = TempDir::new().unwrap();
    drop(setup(&dir, 3));
    log_unapplied(
        &dir,
        &[
            WalRecord::update(2, &item(20, "patched", 2.5)),
            WalRecord::delete(0),
        ],
    );

    let engine = StorageEngine::open(config(&dir)).unwrap();
    let summaries = engine.recover_database(DB).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].0, TABLE);
    assert_eq!(summaries[0].1.applied, 2);

    assert_eq!(
        engine.select(DB, TABLE, None).unwrap(),
        vec![item(1, "item1", 1.0), item(20, "patched", 2.5)]
    );

    // A second recovery finds nothing to do
    let again = engine.recover_database(DB).unwrap();
    assert_eq!(again[0].1.applied, 0);
    assert_eq!(ids(&engine), vec![1, 20]);
}

#[test]
fn test_pending_records_are_applied_before_new_ones() {
    let dir = TempDir::new().unwrap();
    drop(setup(&dir, 3));
    log_unapplied(&dir, &[WalRecord::delete(0)]);

    let engine = StorageEngine::open(config(&dir)).unwrap();
    // Row 0 is item1 once the pending delete is applied
    engine.begin_update(DB, TABLE, 0, &item(11, "eleven", 1.0)).unwrap();
    assert_eq!(ids(&engine), vec![11, 2]);
}

#[test]
fn test_applied_delete_is_not_repeated_after_crash() {
    let dir = TempDir::new().unwrap();
    {
        let engine = setup(&dir, 3);
        let data = engine.catalog().open_table(DB, TABLE).unwrap();
        let mut log = engine.logs().checkout(DB, TABLE).unwrap();
        let record = WalRecord::delete(0);
        log.append(&record).unwrap();

        // Pages changed, then the process stopped before the marker moved
        apply_record(engine.cache(), &data, &record, log.end_offset()).unwrap();
    }

    let engine = StorageEngine::open(config(&dir)).unwrap();
    let summaries = engine.recover_database(DB).unwrap();
    assert_eq!(summaries[0].1.applied, 1);
    assert_eq!(ids(&engine), vec![1, 2]);

    // Later deletes still see the right rows
    engine.begin_delete(DB, TABLE, 0).unwrap();
    assert_eq!(ids(&engine), vec![2]);
}

#[test]
fn test_replay_log_and_checkpoint() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 2);
    engine.begin_delete(DB, TABLE, 1).unwrap();

    let summary = engine.replay_log(DB, TABLE).unwrap();
    // Already applied when logged, so replay only empties the log
    assert_eq!(summary.applied, 0);
    assert_eq!(summary.start_offset, summary.end_offset);

    let data = engine.catalog().open_table(DB, TABLE).unwrap();
    assert_eq!(data.header(engine.cache()).unwrap().replay_epoch, 1);
    assert!(engine.logs().checkout(DB, TABLE).unwrap().is_empty());

    engine.checkpoint(DB, TABLE).unwrap();
    assert_eq!(ids(&engine), vec![0]);
}

#[test]
fn test_read_column_and_append_row() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 0);
    engine
        .create_table(DB, "ticks", &[ColumnSpec::integer("n")])
        .unwrap();

    for n in 0..300i64 {
        engine
            .append_row(DB, "ticks", "n", &n.to_le_bytes())
            .unwrap();
    }

    let descriptor = engine.resolve_table(DB, "ticks").unwrap();
    let column = descriptor.column(0).unwrap();
    let pages: Vec<RecordPage> = engine
        .read_column(DB, "ticks", "n")
        .unwrap()
        .collect::<cairn::Result<_>>()
        .unwrap();
    // 8-byte records, 510 per page
    assert_eq!(pages.len(), 1);

    let values: Vec<Value> = pages
        .iter()
        .flat_map(|page| page.records())
        .map(|record| decode_field(&column, record).unwrap())
        .collect();
    assert_eq!(values.len(), 300);
    assert_eq!(values[299], Value::Integer(299));

    assert!(matches!(
        engine.append_row(DB, "ticks", "n", &[0u8; 3]),
        Err(CairnError::RecordLength { .. })
    ));
}

#[test]
fn test_rows_span_many_pages() {
    let dir = TempDir::new().unwrap();
    let engine = setup(&dir, 500);

    let rows = engine.select(DB, TABLE, None).unwrap();
    assert_eq!(rows.len(), 500);
    assert_eq!(rows[499], item(499, "item499", 499.0));

    engine.begin_delete(DB, TABLE, 250).unwrap();
    engine.begin_update(DB, TABLE, 498, &item(-1, "last", 0.0)).unwrap();
    let ids = ids(&engine);
    assert_eq!(ids.len(), 499);
    assert_eq!(ids[250], 251);
    assert_eq!(ids[498], -1);
}

#[test]
fn test_concurrent_inserts_keep_columns_aligned() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(setup(&dir, 0));

    let handles: Vec<_> = (0..4i64)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100i64 {
                    let id = worker * 1000 + i;
                    engine
                        .insert_row(DB, TABLE, &item(id, &format!("w{worker}"), id as f64))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rows = engine.select(DB, TABLE, None).unwrap();
    assert_eq!(rows.len(), 400);
    for row in rows {
        let Value::Integer(id) = row[0] else {
            panic!("unexpected row {row:?}");
        };
        assert_eq!(row[1], Value::from(format!("w{}", id / 1000)));
        assert_eq!(row[2], Value::Float(id as f64));
    }

    let stats = engine.stats();
    assert_eq!(stats.free_record_slots, stats.record_slots);
    assert_eq!(stats.resident_pages, 0);
    assert_eq!(engine.cache().pool().free_slot_count(PageKind::Catalog), stats.catalog_slots);
}

#[test]
fn test_select_while_inserting_sees_whole_rows() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(setup(&dir, 0));
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let engine = Arc::clone(&engine);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for id in 0..1000i64 {
                engine
                    .insert_row(DB, TABLE, &item(id, &format!("item{id}"), id as f64))
                    .unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut seen = 0;
    while !done.load(Ordering::SeqCst) {
        let rows = engine.select(DB, TABLE, None).unwrap();
        assert!(rows.len() >= seen);
        seen = rows.len();
        for (tag, row) in rows.iter().enumerate() {
            assert_eq!(row, &item(tag as i64, &format!("item{tag}"), tag as f64));
        }

        let pages: Vec<RecordPage> = engine
            .read_column(DB, TABLE, "id")
            .unwrap()
            .collect::<cairn::Result<_>>()
            .unwrap();
        let count: usize = pages.iter().map(RecordPage::record_count).sum();
        assert!(count >= seen);
    }
    writer.join().unwrap();
    assert_eq!(engine.select(DB, TABLE, None).unwrap().len(), 1000);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = setup(&dir, 4);
        engine.begin_delete(DB, TABLE, 3).unwrap();
    }

    let engine = StorageEngine::open(config(&dir)).unwrap();
    assert_eq!(engine.list_databases().unwrap(), vec![DB.to_string()]);
    assert_eq!(engine.list_tables(DB).unwrap(), vec![TABLE.to_string()]);
    assert_eq!(ids(&engine), vec![0, 1, 2]);
}
