//! jobsync CLI: mirror Workiz jobs into a Google Sheet.
//!
//! Each run upserts one row per job, keyed by the job UUID, and writes
//! changes in batches with backoff on rate limits.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
