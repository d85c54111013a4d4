// ABOUTME: connect command - checks that source and destination are reachable
// ABOUTME: Opens a PostgreSQL session and pings the ClickHouse HTTP interface

use anyhow::{Context, Result};
use clap::Args;

use crate::clickhouse::ClickHouseClient;
use crate::utils::strip_password_from_url;

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// PostgreSQL connection URL
    #[arg(long = "pg-url", env = "PGTOCH_PG_URL")]
    pub pg_url: String,
    /// ClickHouse HTTP URL (http://, https://, tcp:// or host:port)
    #[arg(long = "ch-url", env = "PGTOCH_CH_URL")]
    pub ch_url: String,
}

pub async fn command(args: ConnectArgs) -> Result<()> {
    tracing::info!(
        "Testing PostgreSQL connection to {}",
        strip_password_from_url(&args.pg_url)
    );
    let client = crate::postgres::connect(&args.pg_url)
        .await
        .context("PostgreSQL connection failed")?;
    client
        .simple_query("SELECT 1")
        .await
        .context("PostgreSQL connection failed")?;
    println!("✓ PostgreSQL connection successful");

    tracing::info!(
        "Testing ClickHouse connection to {}",
        strip_password_from_url(&args.ch_url)
    );
    ClickHouseClient::connect(&args.ch_url)
        .await
        .context("ClickHouse connection failed")?;
    println!("✓ ClickHouse connection successful");

    println!();
    println!("All databases are reachable");
    Ok(())
}
