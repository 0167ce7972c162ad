//! Configuration types and loading for agentstore.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{Error, env_prefix, paths};

/// Environment variable holding the connection string supplied by the host.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable overriding the log filter.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection string for the store (e.g. `sqlite:///var/lib/agentstore/agentstore.db`).
    pub database_url: String,

    /// Upper bound on pooled connections.
    pub max_connections: u32,

    /// Default log filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite://{}", paths::default_database_path().display()),
            max_connections: 5,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        let mut config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        paths::config_dir().join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    /// Environment overrides are applied to the returned value but never
    /// written back to disk.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from_path(path)?
        } else {
            let config = Self::default();
            config.save_to_path(path)?;
            config
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `DATABASE_URL`, `AGENTSTORE_MAX_CONNECTIONS` and `LOG_LEVEL`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_var(DATABASE_URL_ENV) {
            self.database_url = url;
        }

        let max_connections_var = format!("{}_MAX_CONNECTIONS", env_prefix());
        if let Some(raw) = non_empty_var(&max_connections_var) {
            self.max_connections = raw.parse().map_err(|_| {
                Error::Config(format!("{max_connections_var} must be a positive integer, got '{raw}'"))
            })?;
        }

        if let Some(level) = non_empty_var(LOG_LEVEL_ENV) {
            self.log_level = level.to_lowercase();
        }

        self.expand_paths();
        self.validate()
    }

    /// Reject values the store cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("database_url must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    /// Filesystem path of the database file for `sqlite:` URLs, `None` for
    /// in-memory databases and other schemes.
    pub fn sqlite_path(url: &str) -> Option<PathBuf> {
        let rest = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Some(PathBuf::from(path))
    }

    fn expand_paths(&mut self) {
        if let Some(path) = Self::sqlite_path(&self.database_url) {
            let expanded = Self::expand_path(&path.to_string_lossy());
            let query = self
                .database_url
                .split_once('?')
                .map(|(_, q)| format!("?{q}"))
                .unwrap_or_default();
            self.database_url = format!("sqlite://{}{query}", expanded.display());
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
