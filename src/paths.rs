use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const APP_NAME: &str = "ibuki";

pub fn progress_file_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join(APP_NAME).join("progress.json"))
}

pub fn settings_file_path() -> Result<PathBuf> {
    if let Some(custom) = env::var_os("IBUKI_CONFIG").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(custom));
    }
    let base = dirs::config_dir().context("unable to resolve config directory")?;
    Ok(base.join(APP_NAME).join("settings.toml"))
}

/// Per-user state directory; `dirs` only knows one on Linux.
pub fn state_dir() -> Result<PathBuf> {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .context("unable to resolve state directory")?;
    Ok(base.join(APP_NAME))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("log"))
}

#[cfg(unix)]
pub fn control_endpoint_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("mpv.sock"))
}

#[cfg(windows)]
pub fn control_endpoint_path() -> Result<PathBuf> {
    Ok(PathBuf::from(format!(r"\\.\pipe\{APP_NAME}-ipc")))
}
