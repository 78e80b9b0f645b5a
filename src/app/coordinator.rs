use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use crate::catalog::{AnimeRef, Catalog, Quality, Stream, classify_referrer};
use crate::config::Settings;
use crate::history::WatchHistory;
use crate::player::{
    ExitHook, LaunchRequest, MediaPlayer, PlaybackSnapshot, ProgressHook, SessionHooks,
    final_progress,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlaybackState {
    Idle,
    Playing { anime_id: String, episode: u32 },
}

/// Continue-watching row handed to the UI.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContinueItem {
    pub(crate) anime_id: String,
    pub(crate) anime_name: String,
    pub(crate) episode: u32,
    pub(crate) progress_percent: f64,
    pub(crate) timestamp: u64,
    pub(crate) last_watched: DateTime<Local>,
}

/// What to play for a series already in the watch history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HistoryAction {
    Resume,
    Next,
    Restart,
}

#[derive(Debug)]
struct StateSlot {
    state: PlaybackState,
    // Bumped on every transition so a stale end-file hook cannot steer a newer playback.
    generation: u64,
}

/// Everything an end-file hook needs about the playback it belongs to.
#[derive(Debug, Clone)]
struct PlaybackContext {
    anime: AnimeRef,
    episode: u32,
    generation: u64,
}

/// Drives catalog lookups, the player and the watch history for one user.
#[derive(Clone)]
pub(crate) struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    catalog: Arc<dyn Catalog>,
    player: Arc<dyn MediaPlayer>,
    history: Arc<WatchHistory>,
    settings: Settings,
    anime_cache: Mutex<HashMap<String, AnimeRef>>,
    episode_cache: Mutex<HashMap<String, Vec<u32>>>,
    state: Mutex<StateSlot>,
    idle: Condvar,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub(crate) fn new(
        catalog: Arc<dyn Catalog>,
        player: Arc<dyn MediaPlayer>,
        history: Arc<WatchHistory>,
        settings: Settings,
    ) -> Self {
        debug!(?settings, "coordinator settings");
        Self {
            inner: Arc::new(Inner {
                catalog,
                player,
                history,
                settings,
                anime_cache: Mutex::new(HashMap::new()),
                episode_cache: Mutex::new(HashMap::new()),
                state: Mutex::new(StateSlot {
                    state: PlaybackState::Idle,
                    generation: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn history(&self) -> &WatchHistory {
        &self.inner.history
    }

    pub(crate) fn state(&self) -> PlaybackState {
        lock(&self.inner.state).state.clone()
    }

    /// Blocks until the current playback, including any auto-next chain, is over.
    pub(crate) fn wait_until_idle(&self) {
        let slot = lock(&self.inner.state);
        let _idle = self
            .inner
            .idle
            .wait_while(slot, |slot| slot.state != PlaybackState::Idle)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Searches the catalog; failures are logged and yield no results.
    pub(crate) fn search(&self, query: &str) -> Vec<AnimeRef> {
        self.inner.search(query)
    }

    pub(crate) fn episodes(&self, anime: &AnimeRef) -> Vec<u32> {
        self.inner.episodes(anime)
    }

    pub(crate) fn stream(&self, anime: &AnimeRef, episode: u32) -> Option<Stream> {
        self.inner.stream(anime, episode, self.inner.settings.quality)
    }

    pub(crate) fn play_episode(
        &self,
        anime: &AnimeRef,
        episode: u32,
        stream: &Stream,
        start_seconds: u64,
    ) -> bool {
        self.inner.play_episode(anime, episode, stream, start_seconds)
    }

    /// Plays an episode picked by the user, resuming it when the history points at it.
    pub(crate) fn play_selected(&self, anime: &AnimeRef, episode: u32) -> bool {
        let Some(stream) = self.stream(anime, episode) else {
            warn!(anime_id = %anime.id, episode, "no stream available");
            return false;
        };
        let start_seconds = match self.inner.history.get_entry(&anime.id) {
            Some(entry) if self.inner.settings.auto_resume && entry.episode == episode => {
                entry.timestamp
            }
            _ => 0,
        };
        self.inner.play_episode(anime, episode, &stream, start_seconds)
    }

    pub(crate) fn resume_anime(&self, anime_id: &str, quality: Option<Quality>) -> bool {
        let Some(entry) = self.inner.history.get_entry(anime_id) else {
            warn!(anime_id, "nothing to resume");
            return false;
        };
        let Some(anime) = self.inner.recover_anime(anime_id, &entry.anime_name) else {
            warn!(anime_id, name = %entry.anime_name, "could not find series to resume");
            return false;
        };
        let quality = quality.unwrap_or(self.inner.settings.quality);
        let Some(stream) = self.inner.stream(&anime, entry.episode, quality) else {
            warn!(anime_id, episode = entry.episode, "no stream to resume");
            return false;
        };
        self.inner
            .play_episode(&anime, entry.episode, &stream, entry.timestamp)
    }

    /// Runs a library action for a series already in the history.
    pub(crate) fn play_from_history(&self, anime_id: &str, action: HistoryAction) -> bool {
        if action == HistoryAction::Resume {
            return self.resume_anime(anime_id, None);
        }
        let Some(entry) = self.inner.history.get_entry(anime_id) else {
            return false;
        };
        let Some(anime) = self.inner.recover_anime(anime_id, &entry.anime_name) else {
            return false;
        };
        let episode = match action {
            HistoryAction::Next => match self.inner.next_episode(&anime, entry.episode) {
                Some(next) => next,
                None => {
                    info!(anime_id, episode = entry.episode, "no next episode");
                    return false;
                }
            },
            HistoryAction::Restart | HistoryAction::Resume => entry.episode,
        };
        let Some(stream) = self.stream(&anime, episode) else {
            warn!(anime_id, episode, "no stream available");
            return false;
        };
        self.inner.play_episode(&anime, episode, &stream, 0)
    }

    pub(crate) fn has_next_episode(&self, anime_id: &str) -> bool {
        let Some(entry) = self.inner.history.get_entry(anime_id) else {
            return false;
        };
        let Some(anime) = self.inner.cached_anime(anime_id) else {
            // Unknown episode list; let the action find out.
            return true;
        };
        self.inner.next_episode(&anime, entry.episode).is_some()
    }

    pub(crate) fn continue_watching(&self, limit: usize) -> Vec<ContinueItem> {
        self.inner
            .history
            .continue_watching(limit)
            .into_iter()
            .map(|(anime_id, entry)| ContinueItem {
                anime_id,
                anime_name: entry.anime_name,
                episode: entry.episode,
                progress_percent: entry.progress_percent,
                timestamp: entry.timestamp,
                last_watched: entry.last_watched,
            })
            .collect()
    }

    pub(crate) fn forget(&self, anime_id: &str) -> bool {
        self.inner.history.remove_entry(anime_id)
    }

    /// Stops the player without waiting for end-file, keeping the last observed position.
    pub(crate) fn close_player(&self) {
        let playing = self.state();
        let snapshot = self.inner.player.close();
        if let (PlaybackState::Playing { anime_id, episode }, Some(snapshot)) = (playing, snapshot)
        {
            self.inner.save_on_close(&anime_id, episode, snapshot);
        }
        self.inner.set_idle(None);
    }
}

impl Inner {
    fn search(&self, query: &str) -> Vec<AnimeRef> {
        match self.catalog.search(query) {
            Ok(results) => {
                let mut cache = lock(&self.anime_cache);
                for anime in &results {
                    cache.insert(anime.id.clone(), anime.clone());
                }
                results
            }
            Err(err) => {
                warn!(query, error = %err, "catalog search failed");
                Vec::new()
            }
        }
    }

    fn episodes(&self, anime: &AnimeRef) -> Vec<u32> {
        if let Some(cached) = lock(&self.episode_cache).get(&anime.id) {
            return cached.clone();
        }
        match self.catalog.list_episodes(anime, self.settings.language) {
            Ok(episodes) => {
                lock(&self.episode_cache).insert(anime.id.clone(), episodes.clone());
                episodes
            }
            Err(err) => {
                warn!(anime_id = %anime.id, error = %err, "failed to list episodes");
                Vec::new()
            }
        }
    }

    fn stream(&self, anime: &AnimeRef, episode: u32, quality: Quality) -> Option<Stream> {
        match self
            .catalog
            .get_stream(anime, episode, self.settings.language, quality)
        {
            Ok(stream) => stream,
            Err(err) => {
                warn!(anime_id = %anime.id, episode, error = %err, "failed to fetch stream");
                None
            }
        }
    }

    fn cached_anime(&self, anime_id: &str) -> Option<AnimeRef> {
        lock(&self.anime_cache).get(anime_id).cloned()
    }

    fn recover_anime(&self, anime_id: &str, anime_name: &str) -> Option<AnimeRef> {
        if let Some(anime) = self.cached_anime(anime_id) {
            return Some(anime);
        }
        let first = self.search(anime_name).into_iter().next()?;
        debug!(anime_id, found = %first.id, "recovered series by name");
        Some(first)
    }

    fn next_episode(&self, anime: &AnimeRef, episode: u32) -> Option<u32> {
        let next = episode + 1;
        (next as usize <= self.episodes(anime).len()).then_some(next)
    }

    fn begin_playback(&self, anime_id: &str, episode: u32) -> u64 {
        let mut slot = lock(&self.state);
        slot.generation += 1;
        slot.state = PlaybackState::Playing {
            anime_id: anime_id.to_string(),
            episode,
        };
        slot.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.state).generation == generation
    }

    /// Goes idle; with `Some(generation)` only if no newer playback has started.
    fn set_idle(&self, generation: Option<u64>) {
        let mut slot = lock(&self.state);
        if generation.is_some_and(|generation| generation != slot.generation) {
            return;
        }
        slot.generation += 1;
        slot.state = PlaybackState::Idle;
        self.idle.notify_all();
    }

    fn save_on_close(&self, anime_id: &str, episode: u32, snapshot: PlaybackSnapshot) {
        // No position yet; keep whatever is stored.
        if snapshot.position.is_none() {
            debug!(anime_id, episode, "closed before any position was known");
            return;
        }
        let anime_name = match self.cached_anime(anime_id) {
            Some(anime) => anime.name,
            None => match self.history.get_entry(anime_id) {
                Some(entry) => entry.anime_name,
                None => return,
            },
        };
        let (elapsed, duration) = final_progress(snapshot);
        self.history
            .update_progress(anime_id, &anime_name, episode, elapsed, duration);
        info!(anime_id, episode, elapsed, duration, "saved progress on close");
    }

    fn remember(&self, anime: &AnimeRef) {
        lock(&self.anime_cache)
            .entry(anime.id.clone())
            .or_insert_with(|| anime.clone());
    }

    fn play_episode(
        self: &Arc<Self>,
        anime: &AnimeRef,
        episode: u32,
        stream: &Stream,
        start_seconds: u64,
    ) -> bool {
        let effective_start = start_seconds + self.settings.skip_intro_seconds;
        let referrer = stream
            .referrer
            .clone()
            .unwrap_or_else(|| classify_referrer(&stream.url).to_string());

        let mut extra_args = Vec::new();
        if self.settings.fullscreen {
            extra_args.push("-fs".to_string());
        }
        extra_args.push(format!("--referrer={referrer}"));

        self.remember(anime);
        let generation = self.begin_playback(&anime.id, episode);
        let context = PlaybackContext {
            anime: anime.clone(),
            episode,
            generation,
        };
        let owner: Weak<Inner> = Arc::downgrade(self);
        let on_exit: ExitHook = Box::new(move |snapshot| {
            if let Some(inner) = owner.upgrade() {
                inner.handle_end_file(context, snapshot);
            }
        });

        let history = Arc::clone(&self.history);
        let anime_id = anime.id.clone();
        let anime_name = anime.name.clone();
        let on_progress: ProgressHook = Box::new(move |elapsed, duration| {
            history.update_progress(&anime_id, &anime_name, episode, elapsed, duration);
        });

        info!(anime_id = %anime.id, episode, start = effective_start, "starting playback");
        let launched = self.player.launch(
            LaunchRequest {
                url: stream.url.clone(),
                start_seconds: effective_start,
                extra_args,
            },
            SessionHooks {
                on_exit,
                progress_interval: self.settings.progress_interval(),
                on_progress,
            },
        );
        if !launched {
            error!(anime_id = %anime.id, episode, "failed to launch player");
            self.set_idle(Some(generation));
        }
        launched
    }

    fn handle_end_file(self: &Arc<Self>, context: PlaybackContext, snapshot: PlaybackSnapshot) {
        let PlaybackContext {
            anime,
            episode,
            generation,
        } = context;
        let (elapsed, duration) = final_progress(snapshot);
        self.history
            .update_progress(&anime.id, &anime.name, episode, elapsed, duration);
        info!(anime_id = %anime.id, episode, elapsed, duration, "playback finished");

        if !self.is_current(generation) {
            debug!(anime_id = %anime.id, episode, "playback was superseded");
            return;
        }

        if self.settings.auto_next_episode
            && let Some(next) = self.next_episode(&anime, episode)
        {
            match self.stream(&anime, next, self.settings.quality) {
                Some(stream) => {
                    info!(anime_id = %anime.id, episode = next, "auto-playing next episode");
                    if self.play_episode(&anime, next, &stream, 0) {
                        return;
                    }
                }
                None => info!(anime_id = %anime.id, episode = next, "no stream for next episode"),
            }
        }

        self.set_idle(Some(generation));
    }
}
