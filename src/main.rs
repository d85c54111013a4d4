// ABOUTME: CLI entry point for pgtoch
// ABOUTME: Parses commands, sets up logging and Ctrl+C cancellation, routes to handlers

use clap::{Parser, Subcommand};
use pgtoch::commands::{self, ConnectArgs, ExportArgs, IngestArgs, SampleConfigArgs};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pgtoch")]
#[command(about = "Move PostgreSQL tables into ClickHouse, once or continuously", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that PostgreSQL and ClickHouse are reachable
    Connect(ConnectArgs),
    /// Copy a PostgreSQL table into ClickHouse, then optionally poll for new rows
    Ingest(IngestArgs),
    /// Export a ClickHouse table to a CSV or TSV file
    Export(ExportArgs),
    /// Write a sample configuration file
    SampleConfig(SampleConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    pgtoch::tls::init_tls_policy(cli.allow_self_signed_certs);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    match cli.command {
        Commands::Connect(args) => commands::connect::command(args).await,
        Commands::Ingest(args) => commands::ingest::command(args, cancel).await,
        Commands::Export(args) => commands::export::command(args).await,
        Commands::SampleConfig(args) => commands::sample_config::command(args).await,
    }
}
