use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn player `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("player exited before its control channel was ready ({status}){}", stderr_suffix(.stderr))]
    PlayerExited { status: String, stderr: String },

    #[error("could not connect to player endpoint {} after {attempts} attempt(s)", .endpoint.display())]
    Connect { endpoint: PathBuf, attempts: usize },

    #[error("HTTP status {status}{}", body_suffix(.body))]
    HttpStatus { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: usize, last: Box<Error> },

    #[error("unexpected catalog response: {0}")]
    CatalogResponse(String),

    #[error("invalid settings file {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a retry of the same HTTP request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            Self::Transport(_) => true,
            _ => false,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

fn body_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        let truncated = trimmed.chars().take(240).collect::<String>();
        format!(" ({truncated})")
    }
}
