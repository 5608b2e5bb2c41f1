//! Configuration types for the DDNS system
//!
//! - [`Settings`]: user-facing settings persisted by [`SettingsStore`](crate::settings::SettingsStore)
//! - [`EngineConfig`]: engine knobs supplied by the embedding process

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logs::LogLevel;
use crate::model::domain::validate_interval;

/// UI theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

/// Which detection strategies the IP detector may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionPreference {
    /// Full chain: api, then dns, then interface
    #[default]
    Auto,
    Api,
    Dns,
    Interface,
}

/// User settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub theme: Theme,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Interval applied to new domains that don't specify one (seconds)
    #[serde(default = "default_update_interval")]
    pub default_update_interval: u64,

    #[serde(default)]
    pub ip_detection_method: DetectionPreference,

    #[serde(default = "default_true")]
    pub enable_notifications: bool,

    /// Start the scheduler when the daemon boots
    #[serde(default)]
    pub auto_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            log_level: LogLevel::default(),
            default_update_interval: default_update_interval(),
            ip_detection_method: DetectionPreference::default(),
            enable_notifications: true,
            auto_start: false,
        }
    }
}

impl Settings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_interval(self.default_update_interval)
    }

    /// Apply a partial update, returning the merged settings
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        Self {
            theme: patch.theme.unwrap_or(self.theme),
            log_level: patch.log_level.unwrap_or(self.log_level),
            default_update_interval: patch
                .default_update_interval
                .unwrap_or(self.default_update_interval),
            ip_detection_method: patch
                .ip_detection_method
                .unwrap_or(self.ip_detection_method),
            enable_notifications: patch
                .enable_notifications
                .unwrap_or(self.enable_notifications),
            auto_start: patch.auto_start.unwrap_or(self.auto_start),
        }
    }
}

/// Partial settings for `update_settings`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default)]
    pub default_update_interval: Option<u64>,
    #[serde(default)]
    pub ip_detection_method: Option<DetectionPreference>,
    #[serde(default)]
    pub enable_notifications: Option<bool>,
    #[serde(default)]
    pub auto_start: Option<bool>,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a detected address stays fresh (in seconds)
    #[serde(default = "default_ip_cache_ttl_secs")]
    pub ip_cache_ttl_secs: u64,

    /// Timeout for a single detection strategy attempt (in seconds)
    #[serde(default = "default_strategy_timeout_secs")]
    pub strategy_timeout_secs: u64,

    /// Timeout for a single provider request (in seconds)
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// TTL applied to records that don't override it (in seconds)
    #[serde(default = "default_record_ttl")]
    pub default_record_ttl: u32,

    /// Number of log entries the in-memory sink retains
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Number of history entries retained per domain
    #[serde(default = "default_history_per_domain")]
    pub history_per_domain: usize,

    /// Capacity of the scheduler's command channel
    #[serde(default = "default_command_channel_capacity")]
    pub command_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ip_cache_ttl_secs: default_ip_cache_ttl_secs(),
            strategy_timeout_secs: default_strategy_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            default_record_ttl: default_record_ttl(),
            log_capacity: default_log_capacity(),
            history_per_domain: default_history_per_domain(),
            command_channel_capacity: default_command_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.strategy_timeout_secs == 0 {
            return Err(crate::Error::config("Strategy timeout must be > 0"));
        }
        if self.provider_timeout_secs == 0 {
            return Err(crate::Error::config("Provider timeout must be > 0"));
        }
        if self.log_capacity == 0 {
            return Err(crate::Error::config("Log capacity must be > 0"));
        }
        if self.command_channel_capacity == 0 {
            return Err(crate::Error::config("Command channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn ip_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.ip_cache_ttl_secs)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_update_interval() -> u64 {
    300
}

fn default_ip_cache_ttl_secs() -> u64 {
    60
}

fn default_strategy_timeout_secs() -> u64 {
    10
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_record_ttl() -> u32 {
    600
}

fn default_log_capacity() -> usize {
    1000
}

fn default_history_per_domain() -> usize {
    100
}

fn default_command_channel_capacity() -> usize {
    64
}
