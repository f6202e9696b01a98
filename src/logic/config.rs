//! Monitor Configuration
//!
//! Immutable settings handed to each component at construction.
//! Defaults come from `constants.rs` (env-aware); a JSON file may override any field.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::logic::profile::SizeBucket;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Config IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Sensor / camera validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub distance_max_mm: f64,
    pub distance_min_mm: f64,
    pub max_sensor_gap_mm: f64,
    /// Oldest acceptable facial data (device milliseconds)
    pub facial_max_age_ms: u64,
    pub sensor_fault_limit: Option<u32>,
    pub camera_fault_limit: Option<u32>,
    /// Used when a group has no limit of its own
    pub default_fault_limit: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            distance_max_mm: DEFAULT_DISTANCE_MAX_MM,
            distance_min_mm: DEFAULT_DISTANCE_MIN_MM,
            max_sensor_gap_mm: DEFAULT_MAX_SENSOR_GAP_MM,
            facial_max_age_ms: DEFAULT_FACIAL_MAX_AGE_MS,
            sensor_fault_limit: Some(DEFAULT_SENSOR_FAULT_LIMIT),
            camera_fault_limit: Some(DEFAULT_CAMERA_FAULT_LIMIT),
            default_fault_limit: DEFAULT_FAULT_LIMIT,
        }
    }
}

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Default decision threshold per size bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketThresholds {
    pub xs: f64,
    pub s: f64,
    pub m: f64,
    pub l: f64,
    pub xl: f64,
}

impl Default for BucketThresholds {
    fn default() -> Self {
        Self {
            xs: 66.0,
            s: 67.0,
            m: 80.0,
            l: 88.0,
            xl: 95.0,
        }
    }
}

impl BucketThresholds {
    pub fn for_bucket(&self, bucket: SizeBucket) -> f64 {
        match bucket {
            SizeBucket::XS => self.xs,
            SizeBucket::S => self.s,
            SizeBucket::M => self.m,
            SizeBucket::L => self.l,
            SizeBucket::XL => self.xl,
        }
    }
}

/// Adaptive threshold settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub buckets: BucketThresholds,
    /// Added to the threshold after `feedback_limit` incorrect responses
    pub threshold_increment: f64,
    pub feedback_limit: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            buckets: BucketThresholds::default(),
            threshold_increment: DEFAULT_THRESHOLD_INCREMENT,
            feedback_limit: DEFAULT_FEEDBACK_LIMIT,
        }
    }
}

// ============================================================================
// ALARM
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    pub required_interval_ms: u64,
    /// Fraction of the interval that must be abnormal
    pub alert_ratio: f64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            required_interval_ms: DEFAULT_REQUIRED_INTERVAL_MS,
            alert_ratio: DEFAULT_ALERT_RATIO,
        }
    }
}

// ============================================================================
// LOGGING
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub logs_dir: PathBuf,
    /// Rows per rotated window file
    pub buffer_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            logs_dir: get_logs_dir(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

// ============================================================================
// MODELS
// ============================================================================

/// One classifier: ONNX graph + fitted scaler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model: PathBuf,
    pub scaler: PathBuf,
    /// Expected SHA-256 (hex) of the model file
    #[serde(default)]
    pub sha256: Option<String>,
}

impl ModelArtifact {
    fn in_models_dir(model: &str, scaler: &str) -> Self {
        let dir = get_models_dir();
        Self {
            model: dir.join(model),
            scaler: dir.join(scaler),
            sha256: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// When false both classifiers abstain and only the threshold rule decides
    pub enabled: bool,
    pub model_a: ModelArtifact,
    pub model_b: ModelArtifact,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_a: ModelArtifact::in_models_dir("model_a.onnx", "scaler_a.json"),
            model_b: ModelArtifact::in_models_dir("model_b.onnx", "scaler_b.json"),
        }
    }
}

// ============================================================================
// MONITOR CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub validation: ValidationConfig,
    pub thresholds: ThresholdConfig,
    pub alarm: AlarmConfig,
    pub logging: LoggingConfig,
    pub models: ModelsConfig,
    pub profiles_path: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            thresholds: ThresholdConfig::default(),
            alarm: AlarmConfig::default(),
            logging: LoggingConfig::default(),
            models: ModelsConfig::default(),
            profiles_path: get_profiles_path(),
            poll_interval_ms: get_poll_interval_ms(),
        }
    }
}

impl MonitorConfig {
    /// Load from a JSON file (missing fields take defaults)
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load from `POSTURE_CONFIG` if set, defaults otherwise
    pub fn from_env() -> Result<Self, ConfigError> {
        match get_config_path() {
            Some(path) => Self::load(&path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("logging.buffer_capacity must be > 0".into()));
        }
        if self.alarm.required_interval_ms == 0 {
            return Err(ConfigError::Invalid("alarm.required_interval_ms must be > 0".into()));
        }
        if !(self.alarm.alert_ratio > 0.0 && self.alarm.alert_ratio <= 1.0) {
            return Err(ConfigError::Invalid("alarm.alert_ratio must be in (0, 1]".into()));
        }
        if self.thresholds.feedback_limit == 0 {
            return Err(ConfigError::Invalid("thresholds.feedback_limit must be > 0".into()));
        }
        if self.validation.distance_min_mm > self.validation.distance_max_mm {
            return Err(ConfigError::Invalid("validation.distance_min_mm exceeds distance_max_mm".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.validation.distance_max_mm, 850.0);
        assert_eq!(config.validation.sensor_fault_limit, Some(10));
        assert_eq!(config.thresholds.buckets.for_bucket(SizeBucket::M), 80.0);
        assert_eq!(config.alarm.required_interval_ms, 10_000);
        assert_eq!(config.logging.buffer_capacity, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "alarm": { "alert_ratio": 0.5 }, "models": { "enabled": false } }"#).unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.alarm.alert_ratio, 0.5);
        assert_eq!(config.alarm.required_interval_ms, 10_000);
        assert!(!config.models.enabled);
        assert_eq!(config.thresholds.threshold_increment, 10.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "logging": { "buffer_capacity": 0 } }"#).unwrap();
        assert!(matches!(MonitorConfig::load(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(MonitorConfig::load(&path), Err(ConfigError::Parse(_))));
    }
}
