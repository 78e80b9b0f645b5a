use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "ibuki",
    version,
    about = "Watch anime in mpv and pick up where you left off"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search the catalog.
    Search { query: String },
    /// List the episodes of a search result.
    Episodes {
        query: String,
        /// Which search result to use (1-based).
        #[arg(long, default_value_t = 1)]
        pick: usize,
    },
    /// Play an episode and wait until playback ends.
    Play {
        query: String,
        episode: u32,
        #[arg(long, default_value_t = 1)]
        pick: usize,
        /// Start position in seconds; defaults to the saved position for that episode.
        #[arg(long)]
        start: Option<u64>,
    },
    /// Resume a series from history, or the most recent unfinished one.
    Resume { anime_id: Option<String> },
    /// Show unfinished series.
    Continue {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the whole watch history.
    List,
    /// Remove a series from the watch history.
    Forget { anime_id: String },
    /// Print the effective settings.
    Settings,
    /// Open the full-screen library (the default).
    Tui,
}
