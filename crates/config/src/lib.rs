//! Where Amity keeps its files
//!
//! Settings files such as `messaging.json` live in `~/.config/amity/`. The
//! message database lives in the platform data directory instead
//! (`~/.local/share/amity/` on Linux), so wiping settings never touches
//! stored messages. Each crate parses its own settings file through
//! [`load_optional_json`].
//!
//! The mailbox binary calls [`init`] once at startup.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "amity";

/// Create the settings directory so users have somewhere to drop
/// `messaging.json`.
pub fn init() -> Result<PathBuf> {
    ensure_dir(config_dir(), "config")
}

/// `~/.config/amity/`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Home of the message database (`~/.local/share/amity/` on Linux)
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join(APP_DIR))
}

pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Read a settings file from the config directory.
///
/// A missing file is `Ok(None)` so callers fall back to their defaults; a
/// file that exists but can't be read or parsed is an error.
pub fn load_optional_json<T: DeserializeOwned>(filename: &str) -> Result<Option<T>> {
    let path = config_path(filename).context("Could not determine config directory")?;
    if !path.exists() {
        return Ok(None);
    }
    load_json_file(&path).map(Some)
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Create the data directory if needed and return it, ready for the
/// database file
pub fn ensure_data_dir() -> Result<PathBuf> {
    ensure_dir(data_dir(), "data")
}

fn ensure_dir(dir: Option<PathBuf>, kind: &str) -> Result<PathBuf> {
    let dir = dir.with_context(|| format!("Could not determine {kind} directory"))?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {kind} directory: {}", dir.display()))?;
    Ok(dir)
}
