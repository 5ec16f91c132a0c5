//! affilscan CLI: pull arXiv source archives and extract affiliation blocks.
//!
//! Reads a feed of abstract links, downloads each paper's LaTeX source,
//! and writes the raw affiliation blocks found in it as JSONL.

mod commands;
mod feed;

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
