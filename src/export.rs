// ABOUTME: Dump a destination table to a delimited text file
// ABOUTME: Streams ClickHouse CSVWithNames/TabSeparatedWithNames output straight to disk

use std::path::{Path, PathBuf};

use tokio::io::BufWriter;

use crate::clickhouse::ClickHouseClient;
use crate::error::{EtlError, Result};
use crate::utils::{quote_qualified, validate_bare_identifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Tsv,
}

impl ExportFormat {
    /// ClickHouse output format name; both include a header row.
    pub fn clickhouse_format(self) -> &'static str {
        match self {
            ExportFormat::Csv => "CSVWithNames",
            ExportFormat::Tsv => "TabSeparatedWithNames",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: u64,
    pub bytes: u64,
}

/// `<out_dir>/<table>.<ext>`
pub fn export_path(out_dir: &Path, table: &str, format: ExportFormat) -> PathBuf {
    out_dir.join(format!("{}.{}", table, format.extension()))
}

pub fn build_export_query(table: &str, format: ExportFormat) -> String {
    format!(
        "SELECT * FROM {} FORMAT {}",
        quote_qualified(table),
        format.clickhouse_format()
    )
}

/// Export every row of `table` into `out_dir`
///
/// The output directory is created if needed; an existing file of the same
/// name is replaced.
///
/// # Errors
///
/// - [`EtlError::Validation`] if the table name is invalid or the table
///   does not exist
/// - Connection/query errors from ClickHouse, IO errors from the file
pub async fn export_table(
    client: &ClickHouseClient,
    table: &str,
    format: ExportFormat,
    out_dir: &Path,
) -> Result<ExportReport> {
    validate_bare_identifier("table", table)?;

    if !client.table_exists(table).await? {
        return Err(EtlError::Validation(format!(
            "table {} does not exist in ClickHouse",
            table
        )));
    }
    let rows = client.count_rows(table).await?;
    tracing::info!("Exporting {} rows from {}", rows, table);

    tokio::fs::create_dir_all(out_dir).await?;
    let path = export_path(out_dir, table, format);
    let file = tokio::fs::File::create(&path).await?;
    let mut writer = BufWriter::new(file);

    let bytes = client
        .query_to_writer(&build_export_query(table, format), &mut writer)
        .await?;

    tracing::info!("Wrote {} bytes to {}", bytes, path.display());
    Ok(ExportReport { path, rows, bytes })
}
