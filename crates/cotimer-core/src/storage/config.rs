//! TOML-based application configuration.
//!
//! Stores:
//! - Engine tunables (activity window, confirmation timeout, cycle policy)
//! - Default settings applied to newly created timers
//!
//! Configuration is stored at `~/.config/cotimer/config.toml`.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::data_dir;
use crate::error::ConfigError;
use crate::timer::{CycleResetPolicy, EngineOptions, TimerSettings, MAX_PHASE_MS, MINUTE_MS};

/// Thirty days.
const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trailing window, in seconds, within which a member counts as active.
    #[serde(default = "default_activity_window_secs")]
    pub activity_window_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default)]
    pub cycle_reset: CycleResetPolicy,
    #[serde(default = "default_max_catch_up_steps")]
    pub max_catch_up_steps: usize,
}

/// Settings given to timers created without explicit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u64,
    #[serde(default = "default_rest_minutes")]
    pub rest_minutes: u64,
    #[serde(default = "default_big_rest_minutes")]
    pub big_rest_minutes: u64,
    #[serde(default = "default_true")]
    pub big_rest_enabled: bool,
    #[serde(default = "default_big_rest_per")]
    pub big_rest_per: u32,
    #[serde(default)]
    pub everyone_can_pause: bool,
    #[serde(default)]
    pub confirmation_required: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/cotimer/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

// Default functions
fn default_activity_window_secs() -> u64 {
    300
}
fn default_confirmation_timeout_secs() -> u64 {
    60
}
fn default_max_catch_up_steps() -> usize {
    10_000
}
fn default_work_minutes() -> u64 {
    25
}
fn default_rest_minutes() -> u64 {
    5
}
fn default_big_rest_minutes() -> u64 {
    10
}
fn default_big_rest_per() -> u32 {
    4
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            activity_window_secs: default_activity_window_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            cycle_reset: CycleResetPolicy::default(),
            max_catch_up_steps: default_max_catch_up_steps(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            rest_minutes: default_rest_minutes(),
            big_rest_minutes: default_big_rest_minutes(),
            big_rest_enabled: true,
            big_rest_per: default_big_rest_per(),
            everyone_can_pause: false,
            confirmation_required: false,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as bool")))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| invalid(format!("cannot parse '{value}' as a non-negative integer")))?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid("cannot replace a whole section".to_string()));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults on first use.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path` or create it with defaults when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or holds
    /// invalid values, or if the default config cannot be written.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config =
                    toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(err) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. The whole config is
    /// validated before the change is kept; nothing is written to disk.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |key: &str, value: u64| {
            if value == 0 {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };
        positive("engine.activity_window_secs", self.engine.activity_window_secs)?;
        positive("engine.confirmation_timeout_secs", self.engine.confirmation_timeout_secs)?;
        positive("engine.max_catch_up_steps", self.engine.max_catch_up_steps as u64)?;
        let at_most = |key: &str, value: u64, max: u64| {
            if value > max {
                Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be at most {max}"),
                })
            } else {
                Ok(())
            }
        };
        at_most("engine.activity_window_secs", self.engine.activity_window_secs, MAX_WINDOW_SECS)?;
        at_most("engine.confirmation_timeout_secs", self.engine.confirmation_timeout_secs, MAX_PHASE_MS / 1000)?;
        self.default_settings()?;
        Ok(())
    }

    /// Settings for new timers.
    pub fn default_settings(&self) -> Result<TimerSettings, ConfigError> {
        let d = &self.defaults;
        let settings = TimerSettings {
            work_time_ms: d.work_minutes.saturating_mul(MINUTE_MS),
            rest_time_ms: d.rest_minutes.saturating_mul(MINUTE_MS),
            big_rest_time_ms: d.big_rest_minutes.saturating_mul(MINUTE_MS),
            big_rest_enabled: d.big_rest_enabled,
            big_rest_per: d.big_rest_per,
            is_everyone_can_pause: d.everyone_can_pause,
            is_confirmation_required: d.confirmation_required,
        };
        settings.validate().map_err(|e| ConfigError::InvalidValue {
            key: "defaults".to_string(),
            message: e.to_string(),
        })?;
        Ok(settings)
    }

    pub fn engine_options(&self) -> EngineOptions {
        let secs = |s: u64| Duration::seconds(i64::try_from(s.min(MAX_WINDOW_SECS)).unwrap_or(0));
        EngineOptions {
            activity_window: secs(self.engine.activity_window_secs),
            confirmation_timeout: secs(self.engine.confirmation_timeout_secs),
            cycle_reset: self.engine.cycle_reset,
            max_catch_up_steps: self.engine.max_catch_up_steps,
        }
    }
}
