//! Player control: supervising the external player process and talking to it over IPC.

mod endpoint;
mod process;
mod protocol;
mod supervisor;
mod tracker;
mod transport;

use std::time::Duration;

pub(crate) use process::with_sigint_ignored;
pub use supervisor::Supervisor;
pub use tracker::final_progress;

/// Last values the session observed before playback ended.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub position: Option<f64>,
    pub duration: Option<f64>,
}

/// Called once per session when the player reports end of file.
pub type ExitHook = Box<dyn FnOnce(PlaybackSnapshot) + Send>;

/// Called with `(elapsed, duration)` in whole seconds on every tracker tick.
pub type ProgressHook = Box<dyn FnMut(u64, u64) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub url: String,
    pub start_seconds: u64,
    pub extra_args: Vec<String>,
}

/// Callbacks bound to the one session a launch creates.
pub struct SessionHooks {
    pub on_exit: ExitHook,
    /// Tracker cadence; the tracker samples this session only and stops with it.
    pub progress_interval: Duration,
    pub on_progress: ProgressHook,
}

/// What the playback coordinator needs from a media player.
pub trait MediaPlayer: Send + Sync {
    /// Starts a new session, replacing any active one, and tracks its progress.
    /// Failures are logged and reported as `false`.
    fn launch(&self, request: LaunchRequest, hooks: SessionHooks) -> bool;

    /// Tears down the active session without firing its exit hook.
    /// Returns what a still-playing session last observed.
    fn close(&self) -> Option<PlaybackSnapshot>;
}
