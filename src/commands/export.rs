// ABOUTME: export command - dumps a ClickHouse table to CSV or TSV
// ABOUTME: Resolves destination and table from config file and flags

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::clickhouse::ClickHouseClient;
use crate::config::{Config, ConfigOverrides, DEFAULT_CONFIG_PATH};
use crate::export::{export_table, ExportFormat};

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Path to the YAML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// ClickHouse HTTP URL (overrides config)
    #[arg(long = "ch-url")]
    pub ch_url: Option<String>,
    /// Table to export (overrides config)
    #[arg(long)]
    pub table: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    pub format: ExportFormat,
    /// Output directory
    #[arg(long, default_value = ".")]
    pub out: PathBuf,
}

pub async fn command(args: ExportArgs) -> Result<()> {
    let mut config = Config::load(&args.config).context("Failed to load config")?;
    config.apply(ConfigOverrides {
        ch_url: args.ch_url,
        table: args.table,
        ..Default::default()
    });
    config.validate_for_export()?;

    let client = ClickHouseClient::connect(&config.ch_url)
        .await
        .context("Failed to connect to ClickHouse")?;

    let report = export_table(&client, &config.table, args.format, &args.out)
        .await
        .with_context(|| format!("Failed to export {}", config.table))?;

    println!(
        "✓ Exported {} rows from {} to {}",
        report.rows,
        config.table,
        report.path.display()
    );
    Ok(())
}
