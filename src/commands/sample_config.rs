// ABOUTME: sample-config command - writes a commented starter configuration file
// ABOUTME: Refuses to overwrite an existing file unless --force is given

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::{self, DEFAULT_CONFIG_PATH};

#[derive(Args, Debug, Clone)]
pub struct SampleConfigArgs {
    /// Where to write the sample config
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub path: PathBuf,
    /// Overwrite the file if it already exists
    #[arg(long)]
    pub force: bool,
}

pub async fn command(args: SampleConfigArgs) -> Result<()> {
    config::write_sample(&args.path, args.force)
        .with_context(|| format!("Failed to write sample config to {}", args.path.display()))?;
    tracing::info!("Wrote sample config to {}", args.path.display());

    println!("✓ Sample config written to {}", args.path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} with your connection URLs", args.path.display());
    println!("  2. Set the table and polling options");
    println!("  3. Run `pgtoch ingest` to start the transfer");
    Ok(())
}
