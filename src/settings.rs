//! Engine settings.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.
//!
//! A running task works on a snapshot taken when it was accepted; updates
//! only affect the next task.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agent::RetryStrategy;

/// Slowest execution-speed setting.
pub const MIN_EXECUTION_SPEED: u8 = 1;

/// Fastest execution-speed setting.
pub const MAX_EXECUTION_SPEED: u8 = 5;

/// Settings errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize settings: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Model API base URL
    pub endpoint: String,
    /// Model API key
    pub api_key: String,
    /// Model name
    pub model_name: String,
    /// Execution speed dial, 1 (careful) to 5 (fast)
    pub execution_speed: u8,
    /// Retry strategy
    pub retry_strategy: RetryStrategy,
    /// Retry failed steps at all
    pub smart_recovery: bool,
    /// Per-task duration cap in minutes
    pub task_duration_minutes: u32,
    /// Higher sampling temperature
    pub advanced_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model_name: String::new(),
            execution_speed: 3,
            retry_strategy: RetryStrategy::Balanced,
            smart_recovery: true,
            task_duration_minutes: 2,
            advanced_mode: false,
        }
    }
}

/// Partial settings change; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    #[serde(alias = "baseUrl")]
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    #[serde(alias = "modelName")]
    pub model: Option<String>,
    pub execution_speed: Option<u8>,
    pub retry_strategy: Option<RetryStrategy>,
    pub smart_recovery: Option<bool>,
    #[serde(alias = "taskDuration")]
    pub task_duration_minutes: Option<u32>,
    pub advanced_mode: Option<bool>,
}

impl Settings {
    /// Create settings with the model connection filled in.
    pub fn with_model(
        mut self,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        self.endpoint = endpoint.into();
        self.api_key = api_key.into();
        self.model_name = model_name.into();
        self
    }

    /// Set the execution speed (clamped to 1..=5).
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.execution_speed = speed.clamp(MIN_EXECUTION_SPEED, MAX_EXECUTION_SPEED);
        self
    }

    /// Set the retry strategy.
    pub fn with_retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Set the task duration cap in minutes.
    pub fn with_task_duration(mut self, minutes: u32) -> Self {
        self.task_duration_minutes = minutes;
        self
    }

    /// Whether endpoint, key and model are all set.
    pub fn is_configured(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.api_key.trim().is_empty()
            && !self.model_name.trim().is_empty()
    }

    pub fn task_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.task_duration_minutes) * 60)
    }

    /// Speed clamped into the valid range.
    pub fn speed(&self) -> u8 {
        self.execution_speed
            .clamp(MIN_EXECUTION_SPEED, MAX_EXECUTION_SPEED)
    }

    /// Merge a partial update.
    pub fn apply(&mut self, update: SettingsUpdate) {
        if let Some(endpoint) = update.endpoint {
            self.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(api_key) = update.api_key {
            self.api_key = api_key;
        }
        if let Some(model) = update.model {
            self.model_name = model;
        }
        if let Some(speed) = update.execution_speed {
            self.execution_speed = speed.clamp(MIN_EXECUTION_SPEED, MAX_EXECUTION_SPEED);
        }
        if let Some(strategy) = update.retry_strategy {
            self.retry_strategy = strategy;
        }
        if let Some(smart_recovery) = update.smart_recovery {
            self.smart_recovery = smart_recovery;
        }
        if let Some(minutes) = update.task_duration_minutes {
            self.task_duration_minutes = minutes;
        }
        if let Some(advanced_mode) = update.advanced_mode {
            self.advanced_mode = advanced_mode;
        }
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "aura-copilot")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.execution_speed, 3);
        assert_eq!(settings.retry_strategy, RetryStrategy::Balanced);
        assert!(settings.smart_recovery);
        assert_eq!(settings.task_duration(), Duration::from_secs(120));
        assert!(!settings.is_configured());
    }

    #[test]
    fn test_apply_partial_update() {
        let mut settings = Settings::default().with_model("http://a/v1", "key", "m1");
        let update: SettingsUpdate = serde_json::from_str(
            r#"{"baseUrl":"https://api.example.com/v1/","executionSpeed":9,
                "retryStrategy":"relentless","advancedMode":true}"#,
        )
        .unwrap();
        settings.apply(update);

        assert_eq!(settings.endpoint, "https://api.example.com/v1");
        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.model_name, "m1");
        assert_eq!(settings.execution_speed, MAX_EXECUTION_SPEED);
        assert_eq!(settings.retry_strategy, RetryStrategy::Relentless);
        assert!(settings.advanced_mode);
        assert!(settings.is_configured());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings::default()
            .with_model("http://localhost:8000/v1", "secret", "gpt-4o-mini")
            .with_speed(5)
            .with_task_duration(10);
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_fills_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"api_key":"k"}"#).unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.api_key, "k");
        assert_eq!(loaded.execution_speed, 3);
    }
}
