mod app;
mod catalog;
mod cli;
mod config;
mod error;
mod history;
mod http;
mod logging;
mod paths;
mod player;

use anyhow::Result;
use clap::Parser;

use crate::cli::Command;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    // The full-screen library owns the terminal; log to the file only.
    let console = !matches!(cli.command, None | Some(Command::Tui));
    let _log_guard = logging::init(console)?;
    app::run(cli)
}
