//! assetforge CLI: front-end asset builds, watch mode and dev server.
//!
//! Exit codes: 0 on success, 1 when a task or the filesystem fails,
//! 2 on configuration errors.

mod commands;
mod output;

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
