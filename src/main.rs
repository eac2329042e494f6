use std::path::PathBuf;

use cairn::{
    ColumnSpec, Comparison, Filter, RowOperation, StatementOutcome, StatementResult,
    StorageConfig, StorageEngine, Value,
};
use tracing_subscriber::EnvFilter;

const DATABASE: &str = "demo";
const TABLE: &str = "parts";

fn main() -> cairn::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Cairn - a disk-backed storage kernel");
    println!("====================================\n");

    // Use the given install root, or a scratch directory that is removed at the end
    let (root, scratch) = match std::env::args().nth(1) {
        Some(path) => (PathBuf::from(path), false),
        None => (std::env::temp_dir().join(format!("cairn-demo-{}", std::process::id())), true),
    };

    let config = StorageConfig::from_env(&root)?;
    let engine = StorageEngine::open(config)?;
    println!("Opened engine at {}", root.display());

    if !engine.catalog().database_exists(DATABASE) {
        engine.create_database(DATABASE)?;
    }
    let session = engine.session(DATABASE)?;

    report(session.run(RowOperation::CreateTable {
        table: TABLE.to_string(),
        columns: vec![
            ColumnSpec::integer("id"),
            ColumnSpec::varchar("name", 24),
            ColumnSpec::float("weight"),
        ],
    }));

    let parts = [(1, "bolt", 0.2), (2, "gear", 1.5), (3, "axle", 4.0), (4, "spring", 0.1)];
    for (id, name, weight) in parts {
        report(session.run(RowOperation::Insert {
            table: TABLE.to_string(),
            values: vec![
                Value::Raw(id.to_string()),
                Value::Raw(format!("'{name}'")),
                Value::Raw(weight.to_string()),
            ],
        }));
    }

    report(session.run(RowOperation::Update {
        table: TABLE.to_string(),
        tag: 1,
        values: vec![Value::Integer(2), Value::from("cog"), Value::Float(1.25)],
    }));
    report(session.run(RowOperation::Delete {
        table: TABLE.to_string(),
        tag: 0,
    }));

    report(session.run(RowOperation::Select {
        table: TABLE.to_string(),
        columns: None,
        filter: None,
    }));
    report(session.run(RowOperation::Select {
        table: TABLE.to_string(),
        columns: Some(vec!["name".to_string()]),
        filter: Some(Filter::new("weight", Comparison::Gt, 1.0)),
    }));

    // Fold the log into the data file
    report(session.run(RowOperation::Replay {
        table: TABLE.to_string(),
    }));
    engine.checkpoint(DATABASE, TABLE)?;

    let stats = engine.stats();
    println!("\nEngine stats:");
    println!("  - Record slots free: {}/{}", stats.free_record_slots, stats.record_slots);
    println!("  - Catalog slots free: {}/{}", stats.free_catalog_slots, stats.catalog_slots);
    println!("  - Open block files: {}", stats.open_files);
    println!("  - Open logs: {}", stats.open_logs);

    drop(session);
    drop(engine);
    if scratch {
        std::fs::remove_dir_all(&root)?;
    }
    println!("\nDemo completed successfully!");
    Ok(())
}

fn report(outcome: StatementOutcome) {
    match outcome {
        StatementOutcome::Success(StatementResult::Rows { columns, rows }) => {
            println!("{}", columns.join(" | "));
            for row in rows {
                let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
                println!("{}", cells.join(" | "));
            }
        }
        StatementOutcome::Success(StatementResult::Replayed(summary)) => {
            println!("Replayed {} log records", summary.applied);
        }
        StatementOutcome::Success(result) => println!("ok: {result:?}"),
        StatementOutcome::SchemaError(msg) => println!("schema error: {msg}"),
        StatementOutcome::StorageError(msg) => println!("storage error: {msg}"),
    }
}
