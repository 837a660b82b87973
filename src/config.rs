//! Configuration file parser for ~/.config/newsroll/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::net::{DEFAULT_MAX_BYTES, DEFAULT_USER_AGENT};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A value parsed but is outside its allowed range.
    #[error("Invalid config value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Engine and CLI configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feeds refreshed more recently than this are skipped by `refresh`
    /// without `--force`.
    pub min_refresh_interval_secs: u64,

    /// Whole-request timeout for feed and icon fetches.
    pub request_timeout_secs: u64,

    /// Largest response body accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Feeds refreshed at the same time by a refresh of everything.
    pub max_concurrent_refreshes: usize,

    /// Entries kept by the icon fetch cache.
    pub cache_capacity: usize,

    /// Total body size kept by the icon fetch cache, in bytes.
    pub cache_max_bytes: usize,

    pub cache_ttl_secs: u64,

    /// Edge length of stored feed icons, in pixels.
    pub icon_size: u32,

    pub user_agent: String,

    /// Overrides `~/.config/newsroll/newsroll.db`.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_refresh_interval_secs: 60,
            request_timeout_secs: 30,
            max_feed_bytes: DEFAULT_MAX_BYTES,
            max_concurrent_refreshes: crate::refresh::DEFAULT_MAX_CONCURRENT,
            cache_capacity: crate::cache::DEFAULT_CAPACITY,
            cache_max_bytes: crate::cache::DEFAULT_MAX_BYTES,
            cache_ttl_secs: crate::cache::DEFAULT_TTL.as_secs(),
            icon_size: crate::icon::DEFAULT_ICON_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            database_path: None,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "min_refresh_interval_secs",
        "request_timeout_secs",
        "max_feed_bytes",
        "max_concurrent_refreshes",
        "cache_capacity",
        "cache_max_bytes",
        "cache_ttl_secs",
        "icon_size",
        "user_agent",
        "database_path",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Zero timeouts, sizes or concurrency → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            min_refresh_interval_secs = config.min_refresh_interval_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("request_timeout_secs", self.request_timeout_secs == 0),
            ("max_feed_bytes", self.max_feed_bytes == 0),
            ("max_concurrent_refreshes", self.max_concurrent_refreshes == 0),
            ("icon_size", self.icon_size == 0),
        ];
        for (key, is_zero) in positive {
            if is_zero {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn min_refresh_interval(&self) -> chrono::Duration {
        // chrono durations top out at i64::MAX milliseconds
        let secs = i64::try_from(self.min_refresh_interval_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// The configured database path, or `newsroll.db` inside `config_dir`.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("newsroll.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================
