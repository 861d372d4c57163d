//! tagcrawl CLI: mirror a tagged article catalog as Markdown.
//!
//! Crawls every tag of the catalog, converts each article to Markdown, and
//! keeps completion markers so repeated runs only fetch what is new.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
