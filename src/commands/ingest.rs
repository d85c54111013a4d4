// ABOUTME: ingest command - full load of one table, optionally followed by polling
// ABOUTME: Merges config file and flags, then drives the pipeline until done or cancelled

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::clickhouse::ClickHouseClient;
use crate::config::{Config, ConfigOverrides, DEFAULT_CONFIG_PATH};
use crate::etl::{LoadingHandler, PollSpec, PostgresSource};
use crate::pipeline::{run_ingest, run_poll, IngestOptions};
use crate::progress::{ConsoleProgress, ProgressEvent, ProgressSink};
use crate::utils::strip_password_from_url;

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Path to the YAML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// PostgreSQL connection URL (overrides config)
    #[arg(long = "pg-url")]
    pub pg_url: Option<String>,
    /// ClickHouse HTTP URL (overrides config)
    #[arg(long = "ch-url")]
    pub ch_url: Option<String>,
    /// Table to ingest (overrides config)
    #[arg(long)]
    pub table: Option<String>,
    /// Max rows in the initial load, 0 for all (overrides config)
    #[arg(long)]
    pub limit: Option<i64>,
    /// Rows per INSERT (overrides config)
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Keep polling for new rows after the initial load
    #[arg(long)]
    pub poll: bool,
    /// Column used to detect new rows
    #[arg(long = "poll-delta")]
    pub poll_delta: Option<String>,
    /// Seconds between polls
    #[arg(long = "poll-interval")]
    pub poll_interval: Option<u64>,
    /// Delta value to start polling after, instead of the largest loaded value
    #[arg(long = "start-from")]
    pub start_from: Option<String>,
}

impl From<IngestArgs> for ConfigOverrides {
    fn from(args: IngestArgs) -> Self {
        ConfigOverrides {
            pg_url: args.pg_url,
            ch_url: args.ch_url,
            table: args.table,
            limit: args.limit,
            batch_size: args.batch_size,
            poll: args.poll,
            poll_delta: args.poll_delta,
            poll_interval: args.poll_interval,
            start_from: args.start_from,
        }
    }
}

pub async fn command(args: IngestArgs, cancel: CancellationToken) -> Result<()> {
    let mut config = Config::load(&args.config).context("Failed to load config")?;
    config.apply(args.into());
    config.validate_for_ingest()?;

    println!("Ingest configuration:");
    println!("  PostgreSQL:  {}", strip_password_from_url(&config.pg_url));
    println!("  ClickHouse:  {}", strip_password_from_url(&config.ch_url));
    println!("  Table:       {}", config.table);
    println!("  Batch size:  {} rows", config.batch_size);
    if config.limit > 0 {
        println!("  Limit:       {} rows", config.limit);
    }
    println!();

    let progress: Arc<dyn ProgressSink> = Arc::new(ConsoleProgress::new());

    let source = PostgresSource::connect(&config.pg_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let destination = ClickHouseClient::connect(&config.ch_url)
        .await
        .context("Failed to connect to ClickHouse")?;

    let polling = config.polling.enabled;
    let options = IngestOptions {
        table: config.table.clone(),
        limit: config.limit,
        batch_size: config.batch_size,
        delta_column: polling.then(|| config.polling.delta_column.clone()),
    };

    let report = run_ingest(
        &source,
        &destination,
        &options,
        progress.clone(),
        cancel.clone(),
    )
    .await?;
    // The poller opens its own destination connection per batch
    drop(destination);

    progress.notify(&ProgressEvent::IngestComplete {
        table: config.table.clone(),
        rows: report.rows_loaded,
    });

    if !polling {
        return Ok(());
    }

    let start_watermark = config.start_watermark().unwrap_or(report.watermark);
    println!();
    println!(
        "Polling {} every {}s on {} (press Ctrl+C to stop)",
        config.table, config.polling.interval_seconds, config.polling.delta_column
    );

    let handler = LoadingHandler::new(
        config.ch_url.clone(),
        config.table.clone(),
        config.batch_size,
        cancel.clone(),
    )
    .with_progress(progress.clone());
    let spec = PollSpec {
        table: config.table.clone(),
        delta_column: config.polling.delta_column.clone(),
        interval: config.poll_interval(),
        limit: config.limit,
        start_watermark,
    };

    let watermark = run_poll(source, handler, spec, progress, cancel).await?;
    println!("✓ Polling stopped (last watermark: {})", watermark);
    Ok(())
}
