// ABOUTME: Ingest orchestration - describe, create, extract, load, then optionally poll
// ABOUTME: Adds phase and table context to core errors for the command layer

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::error::EtlError;
use crate::etl::{
    build_create_table_statement, describe_columns, extract_all, initial_watermark, BatchHandler,
    BatchLoader, ChangePoller, DestinationWriter, PollSpec, SourceReader, Watermark,
};
use crate::progress::{ProgressEvent, ProgressSink};

/// Parameters of a one-shot ingest.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub table: String,
    /// Row limit for the full scan; zero or less means no limit
    pub limit: i64,
    pub batch_size: usize,
    /// Delta column of a trailing poll, checked before anything is created
    pub delta_column: Option<String>,
}

/// What a one-shot ingest did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub columns: usize,
    pub rows_extracted: usize,
    pub rows_loaded: usize,
    pub batches: usize,
    /// Largest delta value loaded, when a delta column was given
    pub watermark: Watermark,
}

/// Run the full load of one table
///
/// Steps run strictly in order and any failure aborts the run:
/// 1. Describe the source columns
/// 2. Map types and build the CREATE TABLE statement
/// 3. Create the destination table
/// 4. Extract all rows (up to `limit`)
/// 5. Load them in batches
pub async fn run_ingest<S, D>(
    source: &S,
    destination: &D,
    options: &IngestOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> Result<IngestReport>
where
    S: SourceReader + ?Sized,
    D: DestinationWriter + ?Sized,
{
    let table = options.table.as_str();

    progress.notify(&ProgressEvent::PhaseStarted {
        phase: "Reading source schema",
        table: table.to_string(),
    });
    let columns = describe_columns(source, table)
        .await
        .with_context(|| format!("Failed to read columns of source table {}", table))?;
    if columns.is_empty() {
        bail!(EtlError::Validation(format!(
            "source table {} does not exist or has no columns",
            table
        )));
    }

    if let Some(delta) = &options.delta_column {
        if !columns.iter().any(|c| &c.name == delta) {
            bail!(EtlError::Validation(format!(
                "delta column '{}' not found in table {}",
                delta, table
            )));
        }
    }

    let ddl = build_create_table_statement(table, &columns)
        .with_context(|| format!("Failed to map column types for {}", table))?;

    progress.notify(&ProgressEvent::PhaseStarted {
        phase: "Creating destination table",
        table: table.to_string(),
    });
    tracing::debug!("Creating destination table with: {}", ddl);
    destination
        .execute(&ddl, &[])
        .await
        .with_context(|| format!("Failed to create destination table {}", table))?;
    progress.notify(&ProgressEvent::TableCreated {
        table: table.to_string(),
    });

    progress.notify(&ProgressEvent::PhaseStarted {
        phase: "Extracting rows",
        table: table.to_string(),
    });
    let snapshot = extract_all(source, table, options.limit)
        .await
        .with_context(|| format!("Failed to extract rows from {}", table))?;
    tracing::info!(
        "Extracted {} rows ({} columns) from {}",
        snapshot.len(),
        snapshot.columns.len(),
        table
    );
    progress.notify(&ProgressEvent::RowsExtracted {
        table: table.to_string(),
        rows: snapshot.len(),
    });

    let stats = BatchLoader::new(destination)
        .with_progress(progress.clone())
        .with_cancel(cancel)
        .load(
            table,
            &snapshot.column_names(),
            &snapshot.rows,
            options.batch_size,
        )
        .await
        .with_context(|| format!("Failed to load rows into {}", table))?;

    let watermark = options
        .delta_column
        .as_deref()
        .map(|delta| initial_watermark(&snapshot, delta))
        .unwrap_or_default();

    tracing::info!(
        "Loaded {} rows into {} in {} batches",
        stats.rows,
        table,
        stats.batches
    );

    Ok(IngestReport {
        columns: snapshot.columns.len(),
        rows_extracted: snapshot.len(),
        rows_loaded: stats.rows,
        batches: stats.batches,
        watermark,
    })
}

/// Run a change poller until cancelled
///
/// Cancellation is the normal way a poll ends, so it is returned as the
/// final watermark rather than an error.
pub async fn run_poll<S, H>(
    source: S,
    handler: H,
    spec: PollSpec,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> Result<Watermark>
where
    S: SourceReader,
    H: BatchHandler,
{
    let table = spec.table.clone();
    let mut poller = ChangePoller::new(source, handler, spec).with_progress(progress);

    match poller.start(cancel).await {
        Err(EtlError::Cancelled) | Ok(()) => {
            tracing::info!("Poller for {} stopped at {}", table, poller.watermark());
            Ok(poller.watermark().clone())
        }
        Err(e) => Err(e).with_context(|| format!("Polling {} failed", table)),
    }
}
