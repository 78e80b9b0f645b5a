use ratatui::widgets::TableState;

use crate::history::HistoryEntry;

use super::super::coordinator::{Coordinator, HistoryAction, PlaybackState};
use super::super::prompt::Selection;

pub(super) type LibraryItem = (String, HistoryEntry);

pub(super) fn refresh_items(
    coordinator: &Coordinator,
    items: &mut Vec<LibraryItem>,
    table_state: &mut TableState,
    preferred_id: Option<&str>,
) {
    let selected_id = preferred_id.map(str::to_string).or_else(|| {
        table_state
            .selected()
            .and_then(|idx| items.get(idx))
            .map(|(id, _)| id.clone())
    });

    *items = coordinator.history().entries();
    if items.is_empty() {
        table_state.select(None);
        return;
    }

    if let Some(id) = selected_id.as_deref()
        && let Some(idx) = items.iter().position(|(item_id, _)| item_id == id)
    {
        table_state.select(Some(idx));
        return;
    }

    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(items.len() - 1))),
        None => table_state.select(Some(0)),
    }
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

pub(super) fn run_selected_action(
    coordinator: &Coordinator,
    item: &LibraryItem,
    action: HistoryAction,
) -> String {
    let (anime_id, entry) = item;
    if coordinator.play_from_history(anime_id, action) {
        status_info(&format!("Playing {}", now_playing_label(coordinator, entry)))
    } else {
        status_error(&format!(
            "Could not start {} for {}. See the log for details.",
            action.label(),
            entry.anime_name
        ))
    }
}

pub(super) fn play_selection(coordinator: &Coordinator, selection: &Selection) -> String {
    if coordinator.play_selected(&selection.anime, selection.episode) {
        status_info(&format!(
            "Playing {} episode {}",
            selection.anime.name, selection.episode
        ))
    } else {
        status_error(&format!(
            "Could not start {} episode {}. See the log for details.",
            selection.anime.name, selection.episode
        ))
    }
}

fn now_playing_label(coordinator: &Coordinator, entry: &HistoryEntry) -> String {
    match coordinator.state() {
        PlaybackState::Playing { episode, .. } => format!("{} episode {episode}", entry.anime_name),
        PlaybackState::Idle => entry.anime_name.clone(),
    }
}

/// Short header text for the current playback.
pub(super) fn playback_label(state: &PlaybackState, items: &[LibraryItem]) -> String {
    match state {
        PlaybackState::Idle => "idle".to_string(),
        PlaybackState::Playing { anime_id, episode } => {
            let name = items
                .iter()
                .find(|(id, _)| id == anime_id)
                .map(|(_, entry)| entry.anime_name.as_str())
                .unwrap_or(anime_id.as_str());
            format!("playing {name} ep {episode}")
        }
    }
}
