use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Entries at or below this position count as untouched.
const STARTED_THRESHOLD_SECS: u64 = 5;
/// Entries at or past this fraction of their duration count as finished.
const FINISHED_RATIO: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub anime_name: String,
    pub episode: u32,
    pub timestamp: u64,
    pub total_duration: u64,
    #[serde(deserialize_with = "deserialize_last_watched")]
    pub last_watched: DateTime<Local>,
    pub progress_percent: f64,
}

impl HistoryEntry {
    pub fn is_in_progress(&self) -> bool {
        self.timestamp > STARTED_THRESHOLD_SECS
            && (self.timestamp as f64) < self.total_duration as f64 * FINISHED_RATIO
    }
}

/// Accepts RFC 3339 as well as offset-less ISO timestamps, read as local time.
fn deserialize_last_watched<'de, D>(deserializer: D) -> std::result::Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(serde::de::Error::custom)?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time {raw}")))
}

/// `100 * timestamp / total_duration` rounded to one decimal, or 0 when the duration is unknown.
pub fn progress_percent(timestamp: u64, total_duration: u64) -> f64 {
    if total_duration == 0 {
        return 0.0;
    }
    let percent = timestamp as f64 / total_duration as f64 * 100.0;
    (percent * 10.0).round() / 10.0
}

/// Durable per-anime last position, persisted as one JSON document.
#[derive(Debug)]
pub struct WatchHistory {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, HistoryEntry>>,
}

impl WatchHistory {
    pub fn open(path: &Path) -> Self {
        let entries = load_entries(path);
        debug!(path = %path.display(), entries = entries.len(), "watch history loaded");
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn update_progress(
        &self,
        anime_id: &str,
        anime_name: &str,
        episode: u32,
        timestamp: u64,
        total_duration: u64,
    ) {
        let mut entries = self.lock();
        let now = Local::now();
        let last_watched = match entries.get(anime_id) {
            Some(previous) if previous.last_watched > now => previous.last_watched,
            _ => now,
        };

        entries.insert(
            anime_id.to_string(),
            HistoryEntry {
                anime_name: anime_name.to_string(),
                episode,
                timestamp,
                total_duration,
                last_watched,
                progress_percent: progress_percent(timestamp, total_duration),
            },
        );
        self.persist(&entries);
        debug!(anime = anime_name, episode, timestamp, total_duration, "progress updated");
    }

    pub fn get_entry(&self, anime_id: &str) -> Option<HistoryEntry> {
        self.lock().get(anime_id).cloned()
    }

    pub fn remove_entry(&self, anime_id: &str) -> bool {
        let mut entries = self.lock();
        if entries.remove(anime_id).is_none() {
            return false;
        }
        self.persist(&entries);
        info!(anime_id, "removed from watch history");
        true
    }

    /// Started but unfinished entries, most recently watched first.
    pub fn continue_watching(&self, limit: usize) -> Vec<(String, HistoryEntry)> {
        let mut active: Vec<(String, HistoryEntry)> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_in_progress())
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        sort_recent_first(&mut active);
        active.truncate(limit);
        active
    }

    pub fn entries(&self) -> Vec<(String, HistoryEntry)> {
        let mut all: Vec<(String, HistoryEntry)> = self
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        sort_recent_first(&mut all);
        all
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, HistoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the lock held so writes hit the disk in update order.
    fn persist(&self, entries: &BTreeMap<String, HistoryEntry>) {
        if let Err(err) = write_atomic(&self.path, entries) {
            error!(path = %self.path.display(), error = %err, "failed to save watch history");
        }
    }
}

fn sort_recent_first(items: &mut [(String, HistoryEntry)]) {
    items.sort_by(|(_, left), (_, right)| right.last_watched.cmp(&left.last_watched));
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, HistoryEntry>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn load_entries(path: &Path) -> BTreeMap<String, HistoryEntry> {
    if let Some(entries) = read_entries(path) {
        return entries;
    }
    let tmp = tmp_path(path);
    if let Some(entries) = read_entries(&tmp) {
        warn!(path = %tmp.display(), "recovered watch history from temporary file");
        return entries;
    }
    BTreeMap::new()
}

fn read_entries(path: &Path) -> Option<BTreeMap<String, HistoryEntry>> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(entries) => Some(entries),
        Err(err) => {
            error!(path = %path.display(), error = %err, "failed to load watch history");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, WatchHistory) {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = WatchHistory::open(&dir.path().join("progress.json"));
        (dir, history)
    }

    #[test]
    fn progress_percent_rounds_to_one_decimal() {
        assert_eq!(progress_percent(600, 1440), 41.7);
        assert_eq!(progress_percent(1, 3), 33.3);
        assert_eq!(progress_percent(100, 0), 0.0);
        assert_eq!(progress_percent(0, 1440), 0.0);
    }

    #[test]
    fn update_progress_writes_entry() {
        let (_dir, history) = store();
        history.update_progress("A", "N", 3, 600, 1440);

        let entry = history.get_entry("A").expect("entry should exist");
        assert_eq!(entry.anime_name, "N");
        assert_eq!(entry.episode, 3);
        assert_eq!(entry.timestamp, 600);
        assert_eq!(entry.total_duration, 1440);
        assert_eq!(entry.progress_percent, 41.7);
    }

    #[test]
    fn update_progress_replaces_and_allows_seeking_backward() {
        let (_dir, history) = store();
        history.update_progress("A", "N", 3, 900, 1440);
        history.update_progress("A", "N", 3, 120, 1440);

        let entry = history.get_entry("A").expect("entry should exist");
        assert_eq!(entry.timestamp, 120);
        assert_eq!(entry.progress_percent, 8.3);
    }

    #[test]
    fn last_watched_never_moves_backwards() {
        let (_dir, history) = store();
        history.update_progress("A", "N", 1, 60, 1440);
        let first = history.get_entry("A").expect("entry").last_watched;
        history.update_progress("A", "N", 1, 70, 1440);
        let second = history.get_entry("A").expect("entry").last_watched;
        assert!(second >= first);
    }

    #[test]
    fn continue_watching_filters_untouched_and_finished() {
        let (_dir, history) = store();
        history.update_progress("x", "X", 1, 3, 100);
        history.update_progress("y", "Y", 1, 50, 100);
        history.update_progress("z", "Z", 1, 97, 100);

        let active = history.continue_watching(10);
        let ids: Vec<&str> = active.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["y"]);
    }

    #[test]
    fn continue_watching_boundaries_are_exclusive() {
        let (_dir, history) = store();
        history.update_progress("five", "Five", 1, 5, 100);
        history.update_progress("six", "Six", 1, 6, 100);
        history.update_progress("ninety-five", "NinetyFive", 1, 95, 100);
        history.update_progress("ninety-four", "NinetyFour", 1, 94, 100);
        history.update_progress("unknown", "Unknown", 1, 600, 0);

        let mut ids: Vec<String> = history
            .continue_watching(10)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["ninety-four".to_string(), "six".to_string()]);
    }

    #[test]
    fn continue_watching_is_recent_first_and_limited() {
        let (_dir, history) = store();
        for (idx, id) in ["a", "b", "c", "d"].iter().enumerate() {
            history.update_progress(id, id, 1, 100 + idx as u64, 1000);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let active = history.continue_watching(3);
        let ids: Vec<&str> = active.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);
        for pair in active.windows(2) {
            assert!(pair[0].1.last_watched >= pair[1].1.last_watched);
        }
    }

    #[test]
    fn reload_round_trips_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let history = WatchHistory::open(&path);
        history.update_progress("A", "Show A", 3, 600, 1440);
        history.update_progress("B", "Show B", 7, 0, 0);

        let reloaded = WatchHistory::open(&path);
        assert_eq!(reloaded.entries(), history.entries());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn remove_entry_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let history = WatchHistory::open(&path);
        history.update_progress("A", "Show A", 3, 600, 1440);

        assert!(history.remove_entry("A"));
        assert!(!history.remove_entry("A"));
        assert!(WatchHistory::open(&path).get_entry("A").is_none());
    }

    #[test]
    fn malformed_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        fs::write(&path, "{ not json").expect("write garbage");

        let history = WatchHistory::open(&path);
        assert!(history.entries().is_empty());
    }

    #[test]
    fn corrupt_main_file_falls_back_to_tmp_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let history = WatchHistory::open(&path);
        history.update_progress("A", "Show A", 3, 600, 1440);

        fs::copy(&path, tmp_path(&path)).expect("copy to tmp");
        fs::write(&path, "").expect("truncate main file");

        let recovered = WatchHistory::open(&path);
        assert_eq!(recovered.get_entry("A").map(|entry| entry.episode), Some(3));
    }

    #[test]
    fn reads_file_written_with_original_field_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        fs::write(
            &path,
            r#"{"abc": {"anime_name": "Show", "episode": 2, "timestamp": 300,
                "total_duration": 1400, "last_watched": "2025-03-01T20:15:00+01:00",
                "progress_percent": 21.4}}"#,
        )
        .expect("write history");

        let entry = WatchHistory::open(&path).get_entry("abc").expect("entry");
        assert_eq!(entry.episode, 2);
        assert_eq!(entry.timestamp, 300);
    }

    #[test]
    fn reads_offset_less_timestamps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        fs::write(
            &path,
            r#"{"abc": {"anime_name": "Show", "episode": 2, "timestamp": 300,
                "total_duration": 1400, "last_watched": "2025-03-01T20:15:00.123456",
                "progress_percent": 21.4}}"#,
        )
        .expect("write history");

        let entry = WatchHistory::open(&path).get_entry("abc").expect("entry");
        assert_eq!(
            entry.last_watched.naive_local().to_string(),
            "2025-03-01 20:15:00.123456"
        );
    }

    #[test]
    fn concurrent_updates_are_serialised() {
        let (_dir, history) = store();
        let history = std::sync::Arc::new(history);
        let handles: Vec<_> = (0..8)
            .map(|idx| {
                let history = std::sync::Arc::clone(&history);
                std::thread::spawn(move || {
                    for ts in 0..10 {
                        history.update_progress(&format!("id-{idx}"), "Show", 1, ts, 100);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let reloaded = WatchHistory::open(history.path());
        assert_eq!(reloaded.entries().len(), 8);
        assert!(reloaded.entries().iter().all(|(_, entry)| entry.timestamp == 9));
    }
}
