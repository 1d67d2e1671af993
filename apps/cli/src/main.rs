//! research CLI: multi-source research pipeline.
//!
//! Fetches newsletters, feeds and web pages, summarizes them with an LLM,
//! and stores summaries, insights and links for later review.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
