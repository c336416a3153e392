//! Configuration for the messaging layer
//!
//! Settings are resolved in layers, later layers winning:
//! 1. Built-in defaults
//! 2. JSON file (~/.config/amity/messaging.json)
//! 3. Environment variables (`AMITY_DB_PATH`, `AMITY_DEFAULT_PAGE_SIZE`,
//!    `AMITY_MAX_PAGE_SIZE`)

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config filename in the Amity config directory
const CONFIG_FILE: &str = "messaging.json";

/// Database filename in the Amity data directory
const DATABASE_FILE: &str = "messages.sqlite";

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 50;

/// Messaging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// SQLite database file. Defaults to the Amity data directory.
    pub database_path: Option<PathBuf>,
    /// Page size used when a mailbox request doesn't give one
    pub default_page_size: usize,
    /// Larger requested page sizes are capped to this
    pub max_page_size: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl MessagingConfig {
    /// Load settings from the config file (if present) and the environment
    pub fn load() -> Result<Self> {
        let base: Self = config::load_optional_json(CONFIG_FILE)?.unwrap_or_default();

        let config = base.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a specific JSON file, without environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = config::load_json_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse messaging config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup("AMITY_DB_PATH").filter(|p| !p.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = lookup("AMITY_DEFAULT_PAGE_SIZE") {
            self.default_page_size = size
                .parse()
                .context("AMITY_DEFAULT_PAGE_SIZE is not a positive integer")?;
        }
        if let Some(size) = lookup("AMITY_MAX_PAGE_SIZE") {
            self.max_page_size = size
                .parse()
                .context("AMITY_MAX_PAGE_SIZE is not a positive integer")?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_page_size == 0 {
            bail!("max_page_size must be at least 1");
        }
        if self.default_page_size == 0 {
            bail!("default_page_size must be at least 1");
        }
        if self.default_page_size > self.max_page_size {
            bail!(
                "default_page_size ({}) is larger than max_page_size ({})",
                self.default_page_size,
                self.max_page_size
            );
        }
        Ok(())
    }

    /// Resolve the database path, falling back to the Amity data directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config::ensure_data_dir()?.join(DATABASE_FILE)),
        }
    }
}
