//! Configuration file parser for the engine.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields`
//! off), though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Engine configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`. The engine receives this
/// as an immutable value at construction; nothing reads configuration from
/// globals.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path.
    pub database_path: String,

    /// Number of concurrent refresh workers.
    pub worker_count: usize,

    /// Per-request HTTP timeout in seconds (feed fetch and scraper fetch).
    pub http_timeout_secs: u64,

    /// Maximum feed document size in bytes.
    pub max_body_size: usize,

    /// Minutes between scheduled global sweeps.
    pub polling_frequency_minutes: u64,

    /// Maximum number of jobs per scheduled sweep.
    pub batch_size: i64,

    /// Base interval added to `next_check_at` after a refresh attempt.
    pub polling_interval_minutes: i64,

    /// Consecutive failures before a feed is auto-disabled.
    pub max_parsing_errors: i64,

    /// Extra minutes of delay per consecutive failure.
    pub error_backoff_factor_minutes: i64,

    /// Upper bound on the failure backoff interval.
    pub error_backoff_cap_minutes: i64,

    /// Deferral after an HTTP 429 carrying no `Retry-After` header.
    pub rate_limit_backoff_minutes: i64,

    /// Global block rules applied to every feed (`Field=regex` lines).
    pub block_filter_rules: String,

    /// Global keep rules; when non-empty, only matching candidates survive.
    pub keep_filter_rules: String,

    /// User agent sent when a feed has no custom one configured.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "gleaner.db".to_string(),
            worker_count: 8,
            http_timeout_secs: 20,
            max_body_size: 10 * 1024 * 1024,
            polling_frequency_minutes: 60,
            batch_size: 100,
            polling_interval_minutes: 60,
            max_parsing_errors: 3,
            error_backoff_factor_minutes: 30,
            error_backoff_cap_minutes: 24 * 60,
            rate_limit_backoff_minutes: 12 * 60,
            block_filter_rules: String::new(),
            keep_filter_rules: String::new(),
            user_agent: concat!("gleaner/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "worker_count",
                "http_timeout_secs",
                "max_body_size",
                "polling_frequency_minutes",
                "batch_size",
                "polling_interval_minutes",
                "max_parsing_errors",
                "error_backoff_factor_minutes",
                "error_backoff_cap_minutes",
                "rate_limit_backoff_minutes",
                "block_filter_rules",
                "keep_filter_rules",
                "user_agent",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            workers = config.worker_count,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
