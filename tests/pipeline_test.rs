// ABOUTME: End-to-end pipeline tests against in-memory source and destination
// ABOUTME: Covers DDL creation, batch partitioning, incremental extraction and polling

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pgtoch::error::{EtlError, Result};
use pgtoch::etl::{
    extract_since, BatchHandler, BatchLoader, ChangePoller, Column, DestinationWriter, PollSpec,
    SourceReader, TableSnapshot, Value, Watermark,
};
use pgtoch::pipeline::{run_ingest, run_poll, IngestOptions};
use pgtoch::progress::NoopProgress;
use tokio_util::sync::CancellationToken;

/// A single `(id integer, name text)` table kept in memory.
///
/// Interprets just enough of the generated SQL to honour the watermark
/// filter, the ORDER BY and the LIMIT.
struct MemorySource {
    columns: Vec<Column>,
    rows: Mutex<Vec<(i64, String)>>,
}

impl MemorySource {
    fn new(rows: &[(i64, &str)]) -> Self {
        Self {
            columns: vec![Column::new("id", "integer"), Column::new("name", "text")],
            rows: Mutex::new(rows.iter().map(|(i, n)| (*i, n.to_string())).collect()),
        }
    }

    fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    fn insert(&self, id: i64, name: &str) {
        self.rows.lock().unwrap().push((id, name.to_string()));
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn describe_columns(&self, _table: &str) -> Result<Vec<Column>> {
        Ok(self.columns.clone())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let mut params = params.iter();
        let floor = if sql.contains("WHERE") {
            match params.next() {
                Some(Value::Text(t)) => t
                    .parse::<i64>()
                    .map_err(|e| EtlError::Query(e.to_string()))?,
                other => return Err(EtlError::Query(format!("bad watermark {:?}", other))),
            }
        } else {
            i64::MIN
        };
        let limit = match params.next() {
            Some(Value::Integer(n)) => *n as usize,
            _ => usize::MAX,
        };

        let mut rows: Vec<(i64, String)> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id > floor)
            .cloned()
            .collect();
        if sql.contains("ORDER BY") {
            rows.sort_by_key(|(id, _)| *id);
        }
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(id, name)| vec![Value::Integer(id), Value::Text(name)])
            .collect())
    }
}

#[derive(Default)]
struct MemoryDestination {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MemoryDestination {
    fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }

    fn inserted_ids(&self) -> Vec<i64> {
        self.statements()
            .iter()
            .filter(|(sql, _)| sql.starts_with("INSERT"))
            .flat_map(|(_, params)| params.clone())
            .filter_map(|v| match v {
                Value::Integer(i) => Some(i),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DestinationWriter for MemoryDestination {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(())
    }
}

/// Loads each polled batch into a shared in-memory destination.
struct LoadInto(Arc<MemoryDestination>);

#[async_trait]
impl BatchHandler for LoadInto {
    async fn handle(&self, snapshot: &TableSnapshot) -> Result<()> {
        BatchLoader::new(self.0.as_ref())
            .load("users", &snapshot.column_names(), &snapshot.rows, 2)
            .await?;
        Ok(())
    }
}

fn options(batch_size: usize) -> IngestOptions {
    IngestOptions {
        table: "users".to_string(),
        limit: 0,
        batch_size,
        delta_column: None,
    }
}

#[tokio::test]
async fn test_ingest_creates_table_once_and_loads_in_batches() {
    let source = MemorySource::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let destination = MemoryDestination::default();

    let report = run_ingest(
        &source,
        &destination,
        &options(2),
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let statements = destination.statements();
    assert_eq!(statements.len(), 3);

    let ddl_count = statements
        .iter()
        .filter(|(sql, _)| sql.starts_with("CREATE TABLE IF NOT EXISTS"))
        .count();
    assert_eq!(ddl_count, 1);
    assert_eq!(
        statements[0].0,
        "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" Int32, \"name\" String) \
         ENGINE = MergeTree() ORDER BY tuple()"
    );

    // Two inserts: two rows then one row
    assert_eq!(
        statements[1].0,
        "INSERT INTO \"users\" (\"id\", \"name\") VALUES (?, ?), (?, ?)"
    );
    assert_eq!(statements[1].1.len(), 4);
    assert_eq!(
        statements[2].0,
        "INSERT INTO \"users\" (\"id\", \"name\") VALUES (?, ?)"
    );
    assert_eq!(
        statements[2].1,
        vec![Value::Integer(3), Value::Text("c".to_string())]
    );

    assert_eq!(report.rows_extracted, 3);
    assert_eq!(report.rows_loaded, 3);
    assert_eq!(report.batches, 2);
    assert_eq!(report.watermark, Watermark::Unset);
}

#[tokio::test]
async fn test_incremental_extract_returns_rows_after_watermark_in_order() {
    // Stored out of order; the incremental scan must sort by the delta column
    let source = MemorySource::new(&[(3, "c"), (1, "a"), (2, "b")]);

    let snapshot = extract_since(&source, "users", "id", &Watermark::from_text("1"), 0)
        .await
        .unwrap();

    assert_eq!(
        snapshot.rows,
        vec![
            vec![Value::Integer(2), Value::Text("b".to_string())],
            vec![Value::Integer(3), Value::Text("c".to_string())],
        ]
    );
    assert_eq!(snapshot.column_names(), vec!["id", "name"]);
}

#[tokio::test]
async fn test_poll_cycle_advances_watermark_to_last_row() {
    let source = MemorySource::new(&[(1, "a"), (2, "b"), (3, "c")]);
    let destination = Arc::new(MemoryDestination::default());
    let spec = PollSpec {
        table: "users".to_string(),
        delta_column: "id".to_string(),
        interval: Duration::from_secs(1),
        limit: 0,
        start_watermark: Watermark::from_text("1"),
    };
    let mut poller = ChangePoller::new(source, LoadInto(destination.clone()), spec);

    poller.run_cycle().await.unwrap();

    assert_eq!(poller.watermark().to_string(), "3");
    assert_eq!(destination.inserted_ids(), vec![2, 3]);
}

#[tokio::test]
async fn test_poll_limit_bounds_each_cycle() {
    let source = MemorySource::new(&[(4, "d"), (2, "b"), (3, "c"), (5, "e")]);
    let destination = Arc::new(MemoryDestination::default());
    let spec = PollSpec {
        table: "users".to_string(),
        delta_column: "id".to_string(),
        interval: Duration::from_secs(1),
        limit: 2,
        start_watermark: Watermark::from_text("1"),
    };
    let mut poller = ChangePoller::new(source, LoadInto(destination.clone()), spec);

    poller.run_cycle().await.unwrap();
    assert_eq!(poller.watermark(), &Watermark::At(Value::Integer(3)));
    poller.run_cycle().await.unwrap();
    assert_eq!(poller.watermark(), &Watermark::At(Value::Integer(5)));

    // Every row delivered exactly once, in delta order
    assert_eq!(destination.inserted_ids(), vec![2, 3, 4, 5]);
}

#[tokio::test]
async fn test_unmapped_type_fails_before_any_ddl() {
    let source = MemorySource::new(&[(1, "a")]).with_columns(vec![
        Column::new("id", "integer"),
        Column::new("shape", "geometry"),
    ]);
    let destination = MemoryDestination::default();

    let err = run_ingest(
        &source,
        &destination,
        &options(10),
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<EtlError>(),
        Some(EtlError::TypeMapping { .. })
    ));
    assert!(err.to_string().contains("users"));
    assert!(destination.statements().is_empty());
}

#[tokio::test]
async fn test_missing_delta_column_fails_before_any_ddl() {
    let source = MemorySource::new(&[(1, "a")]);
    let destination = MemoryDestination::default();
    let mut opts = options(10);
    opts.delta_column = Some("updated_at".to_string());

    let err = run_ingest(
        &source,
        &destination,
        &opts,
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<EtlError>(),
        Some(EtlError::Validation(_))
    ));
    assert!(destination.statements().is_empty());
}

#[tokio::test]
async fn test_ingest_reports_initial_watermark() {
    let source = MemorySource::new(&[(2, "b"), (7, "g"), (5, "e")]);
    let destination = MemoryDestination::default();
    let mut opts = options(10);
    opts.delta_column = Some("id".to_string());

    let report = run_ingest(
        &source,
        &destination,
        &opts,
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.watermark, Watermark::At(Value::Integer(7)));
}

#[tokio::test(start_paused = true)]
async fn test_ingest_then_poll_until_cancelled() {
    let source = MemorySource::new(&[(1, "a"), (2, "b")]);
    let destination = Arc::new(MemoryDestination::default());
    let mut opts = options(2);
    opts.delta_column = Some("id".to_string());

    let report = run_ingest(
        &source,
        destination.as_ref(),
        &opts,
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(destination.inserted_ids(), vec![1, 2]);

    // A row arrives after the initial load
    source.insert(3, "c");

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        token.cancel();
    });

    let spec = PollSpec {
        table: "users".to_string(),
        delta_column: "id".to_string(),
        interval: Duration::from_secs(10),
        limit: 0,
        start_watermark: report.watermark,
    };
    let watermark = run_poll(
        source,
        LoadInto(destination.clone()),
        spec,
        Arc::new(NoopProgress),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(watermark, Watermark::At(Value::Integer(3)));
    assert_eq!(destination.inserted_ids(), vec![1, 2, 3]);
}
