// ABOUTME: Batch loader - partitions rows and issues multi-row INSERTs with retry
// ABOUTME: No cross-batch atomicity; batches committed before a failure stay committed

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, Result};
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink};
use crate::retry::{retry, RetryPolicy};
use crate::utils::{quote_ident, quote_qualified, validate_bare_identifier};

use super::value::Value;

/// Write access to the analytical destination.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Execute a DDL or DML statement with `?` positional parameters.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<()>;
}

/// Counts from one [`BatchLoader::load`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub batches: usize,
    pub rows: usize,
}

/// Loads rows into one destination in bounded batches
///
/// Each batch is a single `INSERT ... VALUES (...), (...)` executed under
/// [`RetryPolicy::batch_insert`]. Delivery is at-least-once and not
/// idempotent: loading the same rows twice inserts them twice.
pub struct BatchLoader<'a, D: DestinationWriter + ?Sized> {
    destination: &'a D,
    policy: RetryPolicy,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<'a, D: DestinationWriter + ?Sized> BatchLoader<'a, D> {
    pub fn new(destination: &'a D) -> Self {
        Self {
            destination,
            policy: RetryPolicy::batch_insert(),
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the retry policy (tests use a fast one).
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Insert `rows` into `table`, `batch_size` rows per statement
    ///
    /// # Arguments
    ///
    /// * `table` - Destination table, optionally `database.table`
    /// * `columns` - Column names in the same order as each row's values
    /// * `rows` - Rows to insert
    /// * `batch_size` - Maximum rows per INSERT
    ///
    /// # Errors
    ///
    /// - [`EtlError::Validation`] if the table or any column name is not a
    ///   bare identifier, or `batch_size` is zero. Nothing is sent.
    /// - [`EtlError::BatchFailed`] wrapping the retry error of the first
    ///   batch that could not be inserted
    pub async fn load(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        batch_size: usize,
    ) -> Result<LoadStats> {
        validate_bare_identifier("table", table)?;
        for column in columns {
            validate_bare_identifier("column", column)?;
        }
        if columns.is_empty() {
            return Err(EtlError::Validation(format!(
                "no columns to insert into {}",
                table
            )));
        }
        if batch_size == 0 {
            return Err(EtlError::validation("batch size must be greater than 0"));
        }
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(EtlError::Validation(format!(
                "row has {} values but {} columns were given",
                row.len(),
                columns.len()
            )));
        }

        let mut stats = LoadStats::default();
        if rows.is_empty() {
            tracing::debug!("No rows to insert into {}", table);
            return Ok(stats);
        }

        let total = rows.len().div_ceil(batch_size);
        tracing::info!(
            "Inserting {} rows into {} in {} batches of up to {}",
            rows.len(),
            table,
            total,
            batch_size
        );

        for (idx, chunk) in rows.chunks(batch_size).enumerate() {
            let batch = idx + 1;
            let sql = build_insert_query(table, columns, chunk.len());
            let params: Vec<Value> = chunk.iter().flatten().cloned().collect();

            retry(self.policy, &self.cancel, || {
                self.destination.execute(&sql, &params)
            })
            .await
            .map_err(|e| EtlError::BatchFailed {
                table: table.to_string(),
                batch,
                total,
                source: Box::new(e),
            })?;

            stats.batches += 1;
            stats.rows += chunk.len();
            tracing::debug!(
                "Inserted batch {}/{} ({} rows) into {}",
                batch,
                total,
                chunk.len(),
                table
            );
            self.progress.notify(&ProgressEvent::BatchInserted {
                table: table.to_string(),
                batch,
                total,
                rows: chunk.len(),
            });
        }

        self.progress.notify(&ProgressEvent::LoadFinished {
            table: table.to_string(),
            rows: stats.rows,
        });
        Ok(stats)
    }
}

/// Build a multi-row INSERT with `?` placeholders
///
/// Generates a statement like:
/// ```sql
/// INSERT INTO "users" ("id", "name") VALUES (?, ?), (?, ?)
/// ```
pub fn build_insert_query(table: &str, columns: &[String], row_count: usize) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row_placeholder.as_str(); row_count].join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_qualified(table),
        column_list.join(", "),
        values
    )
}
