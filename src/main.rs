//! Entry point: parses the CLI surface, configures tracing, and hands off
//! to `cli::execute`. Kept as thin as the teacher's own `main.rs` — argument
//! parsing and tracing setup live here, everything else is a collaborator.

mod block;
mod cli;
mod config;
mod crawler;
mod dirparser;
mod downloader;
mod error;
mod merge;
mod notifier;
mod pipeline;
mod runtime;
mod scheduler;
mod scraper;
mod store;
mod tracker;

use clap::Parser;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let format_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .compact();
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(format_layer)
        .init();

    // `run` is the only subcommand that drives actual downloads, so only it
    // needs `yt-dlp` on `PATH` (spec §6 Downloader contract).
    if matches!(cli.command, cli::Command::Run) && which::which("yt-dlp").is_err() {
        eprintln!("no 'yt-dlp' executable found on PATH, make sure it is installed");
        std::process::exit(cli::EXIT_RUNTIME_ERROR);
    }

    let code = cli::execute(cli).await;
    std::process::exit(code);
}
