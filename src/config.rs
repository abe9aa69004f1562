//! Configuration for the Fatigue Sensor Agent.

use crate::capture::CaptureSettings;
use crate::core::{FeatureAggregator, WindowAssigner, WindowError};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the sensor agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Width of each feature window in milliseconds
    pub window_width_ms: i64,

    /// Maximum events held in memory between flushes
    pub buffer_capacity: usize,

    /// Period of the background flush
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// Gaps longer than this count towards the idle ratio
    pub idle_gap_threshold_ms: i64,

    /// IANA zone for the time-of-day encoding
    pub timezone: String,

    /// Which input sources to capture
    pub sources: SourceConfig,

    /// Root for raw logs, features, labels and datasets
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fatigue-sensor-agent");

        Self {
            window_width_ms: crate::core::DEFAULT_WINDOW_MS,
            buffer_capacity: crate::capture::DEFAULT_CAPACITY,
            flush_interval: crate::capture::DEFAULT_FLUSH_INTERVAL,
            idle_gap_threshold_ms: crate::core::IDLE_GAP_THRESHOLD_MS,
            timezone: "UTC".to_string(),
            sources: SourceConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fatigue-sensor-agent")
            .join("config.json")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_path.join("raw")
    }

    pub fn features_dir(&self) -> PathBuf {
        self.data_path.join("features")
    }

    pub fn labels_path(&self) -> PathBuf {
        self.data_path.join("labels").join("labels.csv")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_path.join("datasets")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            self.raw_dir(),
            self.features_dir(),
            self.data_path.join("labels"),
            self.datasets_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        Ok(())
    }

    /// Parsed time zone for the time-of-day features.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    /// Sources named on the command line, or the configured ones.
    pub fn sources_with_override(&self, flag: Option<&str>) -> SourceConfig {
        flag.map(SourceConfig::from_csv)
            .unwrap_or_else(|| self.sources.clone())
    }

    /// Capture settings, rejecting a zero flush interval or buffer capacity.
    pub fn capture_settings(&self) -> Result<CaptureSettings, ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush_interval must be at least 1 second".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        Ok(CaptureSettings {
            buffer_capacity: self.buffer_capacity,
            flush_interval: self.flush_interval,
        })
    }

    pub fn window_assigner(&self) -> Result<WindowAssigner, WindowError> {
        WindowAssigner::new(self.window_width_ms)
    }

    /// Aggregator using this configuration's window width, idle threshold and zone.
    pub fn feature_aggregator(&self) -> Result<FeatureAggregator, ConfigError> {
        Ok(FeatureAggregator {
            nominal_span_ms: self.window_width_ms,
            idle_gap_threshold_ms: self.idle_gap_threshold_ms,
            timezone: self.tz()?,
        })
    }
}

/// Configuration for which input sources to capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub keyboard: bool,
    pub mouse: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            keyboard: true,
            mouse: true,
        }
    }
}

impl SourceConfig {
    /// Parse source configuration from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let sources: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();

        Self {
            keyboard: sources.iter().any(|s| s == "keyboard" || s == "all"),
            mouse: sources.iter().any(|s| s == "mouse" || s == "all"),
        }
    }

    /// Check if at least one source is enabled.
    pub fn any_enabled(&self) -> bool {
        self.keyboard || self.mouse
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    UnknownTimezone(String),
    /// A setting has an unusable value
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::UnknownTimezone(tz) => {
                write!(f, "Unknown time zone {tz:?} (expected an IANA name like Europe/Berlin)")
            }
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
