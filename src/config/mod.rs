//! Configuration module for vision-stream
//!
//! Application configuration is read from a TOML file. Every field is
//! optional; a missing file means defaults.
//!
//! # Config Location
//!
//! `--config <path>` wins. Otherwise the platform configuration directory
//! is used:
//! - **Linux**: `~/.config/vision-stream/config.toml`
//! - **macOS**: `~/Library/Application Support/vision-stream/config.toml`
//! - **Windows**: `%APPDATA%\vision-stream\config.toml`
//!
//! # Example
//!
//! ```toml
//! mode = "object_detection"
//! channel_capacity = 2
//! grace_period_ms = 2000
//! log_dir = "/var/log/vision-stream"
//!
//! [overrides]
//! "source.width" = "640"
//! "object-detection.mode" = "payload"
//! ```

use crate::error::{AppError, Result};
use crate::pipeline::{AssemblySettings, Overrides, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "vision-stream";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default capacity of each inter-stage channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = crate::pipeline::assembler::DEFAULT_CHANNEL_CAPACITY;

/// Default cancellation grace period in milliseconds
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,vision_stream=debug";

// ==================== Config Directory ====================

/// Get the application config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== App Config ====================

/// File-based application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Mode to run when none is given on the command line.
    /// Absent means the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    /// Capacity of each inter-stage channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Time stages get to stop after cancellation
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Directory for a daily rolling log file, in addition to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// Tracing filter used when `RUST_LOG` is not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,

    /// Option overrides keyed by `namespace.key`
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_grace_period_ms() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            log_dir: None,
            log_filter: None,
            overrides: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml(&content)
            .map_err(|e| e.with_context(format!("Failed to parse config file {:?}", path)))
    }

    /// Load the explicit path if given, else the default path if it exists,
    /// else defaults. A missing explicit path is an error.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {:?}", path);
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| {
            AppError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(AppError::Config("channel_capacity must be at least 1".into()));
        }
        if self.grace_period_ms == 0 {
            return Err(AppError::Config("grace_period_ms must be positive".into()));
        }
        Ok(())
    }

    /// Assembler settings derived from this config
    pub fn assembly_settings(&self) -> AssemblySettings {
        AssemblySettings {
            channel_capacity: self.channel_capacity.max(1),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    /// File overrides as a validated override set
    pub fn overrides(&self) -> PipelineResult<Overrides> {
        let mut overrides = Overrides::new();
        for (key, value) in &self.overrides {
            overrides.insert(key, value.as_str())?;
        }
        Ok(overrides)
    }

    /// Tracing filter to use when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
