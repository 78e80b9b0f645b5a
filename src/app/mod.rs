mod coordinator;
mod format;
mod prompt;
mod tui;


use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::catalog::{AllAnimeCatalog, AnimeRef};
use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::history::{HistoryEntry, WatchHistory};
use crate::paths::{control_endpoint_path, progress_file_path, settings_file_path};
use crate::player::{Supervisor, with_sigint_ignored};

use self::coordinator::Coordinator;
use self::format::{format_last_watched, format_position, truncate};

pub fn run(cli: Cli) -> Result<()> {
    let settings_path = settings_file_path()?;
    let settings = Settings::load(&settings_path)?;

    let command = cli.command.unwrap_or(Command::Tui);
    if let Command::Settings = command {
        return run_settings(&settings_path, &settings);
    }

    let coordinator = build_coordinator(settings)?;
    match command {
        Command::Search { query } => run_search(&coordinator, &query),
        Command::Episodes { query, pick } => run_episodes(&coordinator, &query, pick),
        Command::Play {
            query,
            episode,
            pick,
            start,
        } => run_play(&coordinator, &query, episode, pick, start),
        Command::Resume { anime_id } => run_resume(&coordinator, anime_id.as_deref()),
        Command::Continue { limit } => run_continue(&coordinator, limit),
        Command::List => run_list(&coordinator),
        Command::Forget { anime_id } => run_forget(&coordinator, &anime_id),
        Command::Tui => tui::run_tui(&coordinator),
        Command::Settings => Ok(()),
    }
}

fn build_coordinator(settings: Settings) -> Result<Coordinator> {
    let history = Arc::new(WatchHistory::open(&progress_file_path()?));
    let endpoint = control_endpoint_path()?;
    let player = Arc::new(Supervisor::new(settings.player.clone(), endpoint));
    let catalog = Arc::new(AllAnimeCatalog::new());
    Ok(Coordinator::new(catalog, player, history, settings))
}

fn run_settings(path: &Path, settings: &Settings) -> Result<()> {
    println!("# {}", path.display());
    println!("{settings}");
    Ok(())
}

fn run_search(coordinator: &Coordinator, query: &str) -> Result<()> {
    let results = coordinator.search(query);
    if results.is_empty() {
        println!("No results for \"{query}\".");
        return Ok(());
    }

    println!("{:<4} {:<20} {:<50} {:<6}", "#", "ID", "TITLE", "EPS");
    for (idx, anime) in results.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<50} {:<6}",
            idx + 1,
            truncate(&anime.id, 20),
            truncate(&anime.name, 50),
            anime
                .available_episodes
                .map(|count| count.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

fn pick_result(coordinator: &Coordinator, query: &str, pick: usize) -> Result<AnimeRef> {
    let results = coordinator.search(query);
    if results.is_empty() {
        bail!("no results for \"{query}\"");
    }
    pick.checked_sub(1)
        .and_then(|idx| results.get(idx).cloned())
        .with_context(|| format!("result #{pick} out of range (1-{})", results.len()))
}

fn run_episodes(coordinator: &Coordinator, query: &str, pick: usize) -> Result<()> {
    let anime = pick_result(coordinator, query, pick)?;
    let episodes = coordinator.episodes(&anime);
    if episodes.is_empty() {
        println!("No episodes available for {}.", anime.name);
        return Ok(());
    }

    println!("{} ({} episodes)", anime.name, episodes.len());
    let labels: Vec<String> = episodes.iter().map(u32::to_string).collect();
    println!("{}", labels.join(" "));
    Ok(())
}

fn run_play(
    coordinator: &Coordinator,
    query: &str,
    episode: u32,
    pick: usize,
    start: Option<u64>,
) -> Result<()> {
    let anime = pick_result(coordinator, query, pick)?;
    println!("Playing {} episode {episode}", anime.name);

    with_sigint_ignored(|| {
        let launched = match start {
            Some(start) => {
                let stream = coordinator
                    .stream(&anime, episode)
                    .with_context(|| format!("no stream for {} episode {episode}", anime.name))?;
                coordinator.play_episode(&anime, episode, &stream, start)
            }
            None => coordinator.play_selected(&anime, episode),
        };
        if !launched {
            bail!("could not start playback for {} episode {episode}", anime.name);
        }
        coordinator.wait_until_idle();
        Ok(())
    })?;

    print_saved_progress(coordinator, &anime.id);
    Ok(())
}

fn run_resume(coordinator: &Coordinator, anime_id: Option<&str>) -> Result<()> {
    let anime_id = match anime_id {
        Some(id) => id.to_string(),
        None => match coordinator.continue_watching(1).into_iter().next() {
            Some(item) => item.anime_id,
            None => {
                println!("Nothing to resume. Run `ibuki play` first.");
                return Ok(());
            }
        },
    };
    let Some(entry) = coordinator.history().get_entry(&anime_id) else {
        bail!("no watch history for {anime_id}");
    };
    println!(
        "Resuming {} episode {} at {}",
        entry.anime_name,
        entry.episode,
        format_position(entry.timestamp, entry.total_duration)
    );

    with_sigint_ignored(|| {
        if !coordinator.resume_anime(&anime_id, None) {
            bail!("could not resume {}", entry.anime_name);
        }
        coordinator.wait_until_idle();
        Ok(())
    })?;

    print_saved_progress(coordinator, &anime_id);
    Ok(())
}

fn run_continue(coordinator: &Coordinator, limit: Option<usize>) -> Result<()> {
    let limit = limit.unwrap_or(coordinator.settings().history_limit);
    let items = coordinator.continue_watching(limit);
    if items.is_empty() {
        println!("Nothing in progress.");
        return Ok(());
    }

    println!(
        "{:<20} {:<40} {:<5} {:<8} {:<24}",
        "ID", "TITLE", "EP", "DONE", "LAST WATCHED"
    );
    for item in items {
        println!(
            "{:<20} {:<40} {:<5} {:<8} {:<24}",
            truncate(&item.anime_id, 20),
            truncate(&item.anime_name, 40),
            item.episode,
            format!("{:.1}%", item.progress_percent),
            format_last_watched(&item.last_watched)
        );
    }
    Ok(())
}

fn run_list(coordinator: &Coordinator) -> Result<()> {
    let entries = coordinator.history().entries();
    if entries.is_empty() {
        println!(
            "No watch history yet in {}. Run `ibuki play` first.",
            coordinator.history().path().display()
        );
        return Ok(());
    }

    println!(
        "{:<20} {:<40} {:<5} {:<18} {:<24}",
        "ID", "TITLE", "EP", "POSITION", "LAST WATCHED"
    );
    for (anime_id, entry) in entries {
        println!(
            "{:<20} {:<40} {:<5} {:<18} {:<24}",
            truncate(&anime_id, 20),
            truncate(&entry.anime_name, 40),
            entry.episode,
            format_position(entry.timestamp, entry.total_duration),
            format_last_watched(&entry.last_watched)
        );
    }
    Ok(())
}

fn run_forget(coordinator: &Coordinator, anime_id: &str) -> Result<()> {
    if coordinator.forget(anime_id) {
        println!("Removed {anime_id} from watch history.");
    } else {
        println!("{anime_id} is not in the watch history.");
    }
    Ok(())
}

fn print_saved_progress(coordinator: &Coordinator, anime_id: &str) {
    match coordinator.history().get_entry(anime_id) {
        Some(entry) => println!("{}", saved_progress_line(&entry)),
        None => println!("Progress not saved."),
    }
}

fn saved_progress_line(entry: &HistoryEntry) -> String {
    format!(
        "Saved: {} episode {} at {} ({:.1}%)",
        entry.anime_name,
        entry.episode,
        format_position(entry.timestamp, entry.total_duration),
        entry.progress_percent
    )
}
