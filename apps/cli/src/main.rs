//! reviewcrawl CLI: incremental crawler for OpenReview venues.
//!
//! Streams canonical paper, review, decision and comment records for a
//! venue into JSONL files, skipping forums that have not changed since the
//! last run.

mod commands;
mod sink;

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
