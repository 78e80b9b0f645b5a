use chrono::{DateTime, Local};

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub(crate) fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub(crate) fn format_position(timestamp: u64, total_duration: u64) -> String {
    format!(
        "{} / {}",
        format_clock(timestamp),
        format_clock(total_duration)
    )
}

pub(crate) fn format_last_watched(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M %:z").to_string()
}

pub(crate) fn format_last_watched_tui(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub(crate) fn progress_gauge(timestamp: u64, total_duration: u64) -> Option<(f64, String)> {
    if total_duration == 0 {
        return None;
    }
    let ratio = (timestamp as f64 / total_duration as f64).clamp(0.0, 1.0);
    Some((ratio, format!("{:.1}%", ratio * 100.0)))
}
