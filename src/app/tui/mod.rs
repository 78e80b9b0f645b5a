mod actions;
mod render;
mod session;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;

use super::coordinator::{Coordinator, HistoryAction};
use super::format::truncate;
use super::prompt::search_and_pick;

use self::actions::{
    LibraryItem, play_selection, refresh_items, run_selected_action, status_error, status_info,
};
use self::render::draw_tui;
use self::session::TuiSession;

impl HistoryAction {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Resume => "RESUME",
            Self::Next => "NEXT",
            Self::Restart => "RESTART",
        }
    }

    pub(crate) fn move_left(self) -> Self {
        match self {
            Self::Resume => Self::Resume,
            Self::Next => Self::Resume,
            Self::Restart => Self::Next,
        }
    }

    pub(crate) fn move_right(self) -> Self {
        match self {
            Self::Resume => Self::Next,
            Self::Next => Self::Restart,
            Self::Restart => Self::Restart,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct PendingDelete {
    pub(super) anime_id: String,
    pub(super) anime_name: String,
}

#[derive(Debug, Clone)]
pub(super) struct PendingNotice {
    pub(super) message: String,
}

pub(crate) fn run_tui(coordinator: &Coordinator) -> Result<()> {
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let mut items: Vec<LibraryItem> = Vec::new();
    let mut table_state = TableState::default();
    refresh_items(coordinator, &mut items, &mut table_state, None);
    let mut action = HistoryAction::Resume;
    let mut pending_delete = None::<PendingDelete>;
    let mut pending_notice = None::<PendingNotice>;
    let mut status = if items.is_empty() {
        status_info("No watch history yet. Press `s` to search.")
    } else {
        status_info("Ready.")
    };

    loop {
        // Progress written by the tracker shows up on the next tick.
        refresh_items(coordinator, &mut items, &mut table_state, None);
        let playback = coordinator.state();
        terminal.draw(|frame| {
            draw_tui(
                frame,
                &items,
                &mut table_state,
                action,
                &playback,
                &status,
                pending_delete.as_ref(),
                pending_notice.as_ref(),
            )
        })?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if pending_notice.is_some() {
            pending_notice = None;
            continue;
        }

        if let Some(dialog) = pending_delete.as_ref() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    let deleting_id = dialog.anime_id.clone();
                    let deleting_name = dialog.anime_name.clone();
                    pending_delete = None;
                    if coordinator.forget(&deleting_id) {
                        status = status_info(&format!("Removed from history: {deleting_name}"));
                    } else {
                        status = status_error("Delete failed: entry no longer exists.");
                    }
                    refresh_items(coordinator, &mut items, &mut table_state, None);
                }
                KeyCode::Esc | KeyCode::Char('n') => {
                    pending_delete = None;
                    status = status_info("Delete canceled.");
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Char('x') => {
                coordinator.close_player();
                status = status_info("Player stopped.");
            }
            KeyCode::Char('s') => {
                let picked = session.suspended(|| {
                    let stdin = io::stdin();
                    let mut input = stdin.lock();
                    let mut output = io::stdout();
                    search_and_pick(coordinator, &mut input, &mut output)
                })?;
                terminal.clear()?;

                match picked {
                    Ok(Some(selection)) => {
                        status = play_selection(coordinator, &selection);
                        refresh_items(
                            coordinator,
                            &mut items,
                            &mut table_state,
                            Some(&selection.anime.id),
                        );
                    }
                    Ok(None) => status = status_info("Search canceled."),
                    Err(err) => status = status_error(&format!("Search failed: {err}")),
                }
            }
            KeyCode::Up => {
                if let Some(selected) = table_state.selected() {
                    table_state.select(Some(selected.saturating_sub(1)));
                }
            }
            KeyCode::Down => {
                if let Some(selected) = table_state.selected()
                    && !items.is_empty()
                {
                    let next = (selected + 1).min(items.len().saturating_sub(1));
                    table_state.select(Some(next));
                }
            }
            KeyCode::Left => action = action.move_left(),
            KeyCode::Right => action = action.move_right(),
            KeyCode::Char('d') => {
                let Some((anime_id, entry)) = table_state.selected().and_then(|idx| items.get(idx))
                else {
                    status = status_error("Delete failed: no entry selected.");
                    continue;
                };
                pending_delete = Some(PendingDelete {
                    anime_id: anime_id.clone(),
                    anime_name: entry.anime_name.clone(),
                });
                status = status_info("Confirm delete: y/Enter to delete, n/Esc to cancel.");
            }
            KeyCode::Enter => {
                let Some(item) = table_state
                    .selected()
                    .and_then(|idx| items.get(idx))
                    .cloned()
                else {
                    continue;
                };

                if action == HistoryAction::Next && !coordinator.has_next_episode(&item.0) {
                    pending_notice = Some(PendingNotice {
                        message: format!(
                            "No more episodes available.\n\n{}\n\nPress any key to continue.",
                            truncate(&item.1.anime_name, 50)
                        ),
                    });
                    status = status_info("No next episode available.");
                    continue;
                }

                status = status_info(&format!("Starting {}...", item.1.anime_name));
                terminal.draw(|frame| {
                    draw_tui(
                        frame,
                        &items,
                        &mut table_state,
                        action,
                        &playback,
                        &status,
                        None,
                        None,
                    )
                })?;
                status = run_selected_action(coordinator, &item, action);
                refresh_items(coordinator, &mut items, &mut table_state, Some(&item.0));
            }
            _ => {}
        }
    }

    coordinator.close_player();
    terminal.show_cursor()?;
    session.leave()?;
    Ok(())
}
