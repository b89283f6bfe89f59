//! hearings CLI: resumable committee oral-evidence harvester.
//!
//! Walks a committee's session catalog, stores every transcript as plain
//! text next to a ledger, and hands the corpus to a topic-model bridge.

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
