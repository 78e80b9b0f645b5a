use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{Language, Quality};
use crate::error::{Error, Result};

/// Read-only snapshot of user preferences consumed by the playback core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub quality: Quality,
    pub language: Language,
    pub auto_resume: bool,
    pub fullscreen: bool,
    pub skip_intro_seconds: u64,
    pub skip_outro_seconds: u64,
    pub auto_next_episode: bool,
    pub save_progress_interval: u64,
    pub minimal_progress_threshold: u64,
    pub history_limit: usize,
    pub player: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quality: Quality::Best,
            language: Language::Sub,
            auto_resume: true,
            fullscreen: false,
            skip_intro_seconds: 0,
            skip_outro_seconds: 0,
            auto_next_episode: false,
            save_progress_interval: 10,
            minimal_progress_threshold: 5,
            history_limit: 10,
            player: "mpv".to_string(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        Self::parse(&raw).map_err(|source| Error::Settings {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse(raw: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.save_progress_interval.max(1))
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match toml::to_string_pretty(self) {
            Ok(text) => f.write_str(text.trim_end()),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}
