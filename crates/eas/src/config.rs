//! Engine tuning knobs
//!
//! Loads sync policy from (in order of priority):
//! 1. JSON file (~/.config/eas/sync.json)
//! 2. Runtime environment variables
//! 3. Compiled-in defaults
//!
//! Later sources only fill in values the earlier ones left unset, so a
//! config file can pin one knob while the rest stay at their defaults.

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config filename in the engine config directory
const CONFIG_FILE: &str = "sync.json";

/// How long to wait before retrying push after a failed ping or sync.
/// A fixed delay, not a curve: the failure is usually a flaky network
/// path, and minutes of quiet is enough to avoid a battery-draining spin.
const DEFAULT_PING_ERROR_BACKOFF_SECS: u64 = 5 * 60;

/// Period of the safety-net sync that restarts a silently-dead push
const DEFAULT_KICK_INTERVAL_SECS: u64 = 60 * 60;

/// Sync engine policy knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Delay before push is retried after an error
    pub ping_error_backoff: Duration,
    /// Interval of the periodic push-kick
    pub kick_interval: Duration,
    /// Whether the periodic kick is scheduled at all
    pub schedule_kick: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ping_error_backoff: Duration::from_secs(DEFAULT_PING_ERROR_BACKOFF_SECS),
            kick_interval: Duration::from_secs(DEFAULT_KICK_INTERVAL_SECS),
            schedule_kick: true,
        }
    }
}

/// On-disk representation; every field optional so partial files work
#[derive(Debug, Default, Deserialize)]
struct SyncConfigFile {
    ping_error_backoff_secs: Option<u64>,
    kick_interval_secs: Option<u64>,
    schedule_kick: Option<bool>,
}

impl SyncConfig {
    /// Load configuration from file and environment, falling back to
    /// defaults. Never fails: an unreadable file is logged and skipped.
    pub fn load() -> Self {
        let file = match Self::config_path() {
            Some(path) if path.exists() => match Self::read_file(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("ignoring unreadable sync config: {:#}", e);
                    SyncConfigFile::default()
                }
            },
            _ => SyncConfigFile::default(),
        };
        Self::from_parts(file).apply_env()
    }

    /// Load configuration from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::from_parts(Self::read_file(path)?))
    }

    /// Get the default config file path (~/.config/eas/sync.json)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("eas").join(CONFIG_FILE))
    }

    fn read_file(path: &Path) -> Result<SyncConfigFile> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn from_parts(file: SyncConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            ping_error_backoff: file
                .ping_error_backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.ping_error_backoff),
            kick_interval: file
                .kick_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.kick_interval),
            schedule_kick: file.schedule_kick.unwrap_or(defaults.schedule_kick),
        }
    }

    /// Apply environment variable overrides for any knob the file left
    /// at its default. Unparseable values are logged and ignored.
    fn apply_env(mut self) -> Self {
        if let Some(secs) = env_u64("EAS_PING_ERROR_BACKOFF_SECS") {
            self.ping_error_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("EAS_KICK_INTERVAL_SECS") {
            self.kick_interval = Duration::from_secs(secs);
        }
        if let Ok(value) = std::env::var("EAS_SCHEDULE_KICK") {
            match value.parse::<bool>() {
                Ok(flag) => self.schedule_kick = flag,
                Err(_) => warn!("ignoring invalid EAS_SCHEDULE_KICK value: {}", value),
            }
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.parse::<u64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring invalid {} value: {}", name, value);
            None
        }
    }
}
