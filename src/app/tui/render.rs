use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Gauge, Padding, Paragraph, Row, Table, TableState,
    Wrap,
};

use super::super::coordinator::{HistoryAction, PlaybackState};
use super::super::format::{format_last_watched_tui, format_position, progress_gauge, truncate};
use super::actions::{LibraryItem, playback_label};
use super::{PendingDelete, PendingNotice};

const ACCENT: Color = Color::Rgb(255, 150, 170);

#[allow(clippy::too_many_arguments)]
pub(super) fn draw_tui(
    frame: &mut Frame,
    items: &[LibraryItem],
    table_state: &mut TableState,
    action: HistoryAction,
    playback: &PlaybackState,
    status: &str,
    pending_delete: Option<&PendingDelete>,
    pending_notice: Option<&PendingNotice>,
) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let playing = matches!(playback, PlaybackState::Playing { .. });
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "IBUKI",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("{} series", items.len()),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            playback_label(playback, items),
            if playing {
                Style::default()
                    .fg(Color::Rgb(140, 220, 150))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Rgb(185, 195, 210))
            },
        ),
        Span::styled("   ", Style::default()),
        Span::styled(action.label(), Style::default().fg(Color::Yellow)),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Dashboard"));
    frame.render_widget(header, chunks[0]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(chunks[1]);
    let details_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(8), Constraint::Length(3)])
        .split(body_chunks[1]);

    let rows: Vec<Row> = items
        .iter()
        .map(|(_, entry)| {
            Row::new(vec![
                Cell::from(entry.anime_name.clone()),
                Cell::from(entry.episode.to_string()),
                Cell::from(format_position(entry.timestamp, entry.total_duration)),
                Cell::from(format!("{:.1}%", entry.progress_percent)),
                Cell::from(format_last_watched_tui(&entry.last_watched)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(40),
            Constraint::Length(5),
            Constraint::Length(17),
            Constraint::Length(7),
            Constraint::Length(17),
        ],
    )
    .header(
        Row::new(vec!["Title", "Ep", "Position", "Done", "Last Watched"]).style(
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
    )
    .block(panel_block("Library"))
    .row_highlight_style(
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, body_chunks[0], table_state);

    let (selection_text, gauge) = match table_state.selected().and_then(|idx| items.get(idx)) {
        Some((anime_id, entry)) => {
            let mut selection_text = format!(
                "Title\n{}\n\nEpisode\n{}\n\nPosition\n{}\n\nAnime ID\n{}\n\nLast Watched\n{}",
                truncate(&entry.anime_name, 40),
                entry.episode,
                format_position(entry.timestamp, entry.total_duration),
                truncate(anime_id, 28),
                format_last_watched_tui(&entry.last_watched),
            );
            if !entry.is_in_progress() {
                selection_text.push_str("\n\nStatus\nFinished or not started");
            }
            (
                selection_text,
                progress_gauge(entry.timestamp, entry.total_duration),
            )
        }
        None => (
            "No watch history yet.\n\nPress s to search and start watching.".to_string(),
            None,
        ),
    };
    let selection = Paragraph::new(selection_text)
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .block(panel_block("Selected"))
        .alignment(Alignment::Left);
    frame.render_widget(selection, details_chunks[0]);
    if let Some((ratio, label)) = gauge {
        let progress = Gauge::default()
            .block(panel_block("Progress"))
            .gauge_style(
                Style::default()
                    .fg(ACCENT)
                    .bg(Color::Black)
                    .add_modifier(Modifier::BOLD),
            )
            .label(label)
            .ratio(ratio);
        frame.render_widget(progress, details_chunks[1]);
    }

    let command_bar = Paragraph::new(action_selector_line(action))
        .alignment(Alignment::Center)
        .block(panel_block("Controls"));
    frame.render_widget(command_bar, chunks[2]);

    let status_widget = Paragraph::new(status.to_string())
        .style(status_style(status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[3]);

    if let Some(confirm) = pending_delete {
        let popup_text = format!(
            "Remove from watch history?\n\n{}\n\nThe saved position is lost.\n\n[y / Enter] Remove   [n / Esc] Cancel",
            truncate(&confirm.anime_name, 56)
        );
        render_popup(frame, &popup_text, "Confirm Delete");
    } else if let Some(notice) = pending_notice {
        render_popup(frame, &notice.message, "No More Episodes");
    }
}

fn render_popup(frame: &mut Frame, text: &str, title: &'static str) {
    let popup_area = popup_rect_for_text(frame.area(), text);
    render_popup_shadow(frame, popup_area);
    frame.render_widget(Clear, popup_area);
    let popup = Paragraph::new(text.to_string())
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .block(modal_block(title));
    frame.render_widget(popup, popup_area);
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(235, 180, 195))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn action_pill_style(action: HistoryAction, current: HistoryAction) -> Style {
    if action == current {
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .bg(Color::Rgb(72, 82, 96))
            .fg(Color::Rgb(230, 235, 242))
    }
}

fn action_selector_line(current: HistoryAction) -> Line<'static> {
    let mut spans = Vec::new();
    for action in [HistoryAction::Resume, HistoryAction::Next, HistoryAction::Restart] {
        spans.push(Span::styled(
            format!(" {} ", action.label()),
            action_pill_style(action, current),
        ));
        spans.push(Span::styled(" ", Style::default()));
    }
    spans.push(Span::styled(
        "  ↑/↓ move  ←/→ action  Enter play  s search  x stop  d delete  q quit",
        Style::default().fg(Color::Rgb(185, 195, 210)),
    ));
    Line::from(spans)
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn centered_fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let clamped_width = width.min(area.width.max(1));
    let clamped_height = height.min(area.height.max(1));
    let x = area.x + area.width.saturating_sub(clamped_width) / 2;
    let y = area.y + area.height.saturating_sub(clamped_height) / 2;
    Rect::new(x, y, clamped_width, clamped_height)
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let max_line_width = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let min_width = 48.min(available_width);
    let max_width = 72.min(available_width);
    let width = max_line_width
        .saturating_add(12)
        .clamp(min_width, max_width);

    let available_height = area.height.saturating_sub(2).max(1);
    let min_height = 10.min(available_height);
    let max_height = 18.min(available_height);
    let height = line_count.saturating_add(6).clamp(min_height, max_height);

    centered_fixed_rect(width, height, area)
}
