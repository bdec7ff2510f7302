//! Configuration for the EMG Trigger Agent.

use crate::collector::types::SampleField;
use crate::core::decider::{
    ConfirmationPolicy, DEFAULT_BAND_PCT, DEFAULT_BAND_THRESHOLD, DEFAULT_CONSECUTIVE_THRESHOLD,
    DEFAULT_MAJORITY_VOTES,
};
use crate::core::features::DEFAULT_AR_ORDER;
use crate::core::windowing::{BAND_WINDOW, CLASSIFIER_WINDOW};
use crate::storage::stream::DEFAULT_LOGGING_INTERVAL;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interval between stream log samples
    #[serde(with = "duration_serde")]
    pub logging_interval: Duration,

    /// Autoregressive model order for feature extraction
    pub ar_order: usize,

    /// Window size of the classifier path
    pub classifier_window: usize,

    /// Window size of the threshold-band path
    pub band_window: usize,

    /// Positive windows needed to confirm a classifier trigger
    pub consecutive_threshold: usize,

    /// Whether a negative window resets the positive count
    pub reset_on_false: bool,

    /// Votes collected per band confirmation
    pub majority_votes: usize,

    /// Centre of the band
    pub band_threshold: f64,

    /// Band half-width as a fraction of the centre
    pub band_pct: f64,

    /// Sample field fed to the classifier path
    pub input_field: SampleField,

    /// Device to read samples from
    pub device_path: PathBuf,

    /// Trained classifier weights
    pub model_path: PathBuf,

    /// Directory for the stream, session and statistics files
    pub data_path: PathBuf,

    /// How long shutdown waits for the stream flush
    #[serde(with = "duration_serde")]
    pub stop_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emg-trigger-agent");

        Self {
            logging_interval: DEFAULT_LOGGING_INTERVAL,
            ar_order: DEFAULT_AR_ORDER,
            classifier_window: CLASSIFIER_WINDOW,
            band_window: BAND_WINDOW,
            consecutive_threshold: DEFAULT_CONSECUTIVE_THRESHOLD,
            reset_on_false: false,
            majority_votes: DEFAULT_MAJORITY_VOTES,
            band_threshold: DEFAULT_BAND_THRESHOLD,
            band_pct: DEFAULT_BAND_PCT,
            input_field: SampleField::Envelope,
            device_path: PathBuf::from("/dev/ttyACM0"),
            model_path: data_dir.join("model.json"),
            data_path: data_dir,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("emg-trigger-agent")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ar_order", self.ar_order),
            ("band_window", self.band_window),
            ("consecutive_threshold", self.consecutive_threshold),
            ("majority_votes", self.majority_votes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
            }
        }
        if self.classifier_window < 2 {
            return Err(ConfigError::Invalid(
                "classifier_window must be at least 2".into(),
            ));
        }
        if !(self.band_pct >= 0.0) {
            return Err(ConfigError::Invalid("band_pct must be non-negative".into()));
        }
        if self.logging_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "logging_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Confirmation policy for the classifier path.
    pub fn classifier_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy::Consecutive {
            threshold: self.consecutive_threshold,
            reset_on_false: self.reset_on_false,
        }
    }

    /// Confirmation policy for the threshold-band path.
    pub fn band_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy::Majority {
            votes: self.majority_votes,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ar_order, 4);
        assert_eq!(config.classifier_window, 50);
        assert_eq!(config.band_window, 100);
        assert_eq!(config.consecutive_threshold, 5);
        assert_eq!(config.band_threshold, 110.0);
        assert!(!config.reset_on_false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_and_partial_file() {
        let dir = std::env::temp_dir().join(format!("emg-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.json");

        let mut config = Config::default();
        config.logging_interval = Duration::from_millis(250);
        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.logging_interval, Duration::from_millis(250));

        // Missing keys fall back to defaults
        std::fs::write(&path, r#"{"ar_order": 6}"#).unwrap();
        let partial = Config::load_from(&path).unwrap();
        assert_eq!(partial.ar_order, 6);
        assert_eq!(partial.classifier_window, 50);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.ar_order = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.classifier_window = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policies() {
        let config = Config::default();
        assert_eq!(config.classifier_policy(), ConfirmationPolicy::consecutive());
        assert_eq!(config.band_policy(), ConfirmationPolicy::majority());
    }
}
