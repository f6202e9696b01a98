//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Runtime overrides come from environment variables, then from the JSON config file.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "posture-core";

/// Data folder name under the platform's local data directory
pub const DATA_DIR_NAME: &str = "posture-monitor";

/// Local time format used in logs and annotation tables
pub const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Session id / file stamp format
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Canonical missing-value marker in CSV logs
pub const MISSING_MARKER: &str = "NaN";

/// Profile id used when nobody is signed in
pub const ANONYMOUS_USER_ID: i64 = -1;

// ============================================
// Sensor validation defaults (millimeters)
// ============================================

pub const DEFAULT_DISTANCE_MAX_MM: f64 = 850.0;
pub const DEFAULT_DISTANCE_MIN_MM: f64 = 400.0;
pub const DEFAULT_MAX_SENSOR_GAP_MM: f64 = 300.0;
pub const DEFAULT_FACIAL_MAX_AGE_MS: u64 = 2_000;

/// Consecutive failures tolerated before a fault notice
pub const DEFAULT_SENSOR_FAULT_LIMIT: u32 = 10;
pub const DEFAULT_CAMERA_FAULT_LIMIT: u32 = 100;
pub const DEFAULT_FAULT_LIMIT: u32 = 20;

// ============================================
// Threshold adaptation defaults
// ============================================

pub const DEFAULT_THRESHOLD_INCREMENT: f64 = 10.0;
pub const DEFAULT_FEEDBACK_LIMIT: u32 = 1;

// ============================================
// Alarm / logging / loop defaults
// ============================================

pub const DEFAULT_REQUIRED_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_ALERT_RATIO: f64 = 0.8;
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Base data directory (`<local data>/posture-monitor`)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}

/// Config file path from environment, if any
pub fn get_config_path() -> Option<PathBuf> {
    std::env::var("POSTURE_CONFIG").ok().map(PathBuf::from)
}

/// Session logs directory from environment or default
pub fn get_logs_dir() -> PathBuf {
    std::env::var("POSTURE_LOGS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("logs"))
}

/// User profile table from environment or default
pub fn get_profiles_path() -> PathBuf {
    std::env::var("POSTURE_PROFILES")
        .map(PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("users").join("profiles.csv"))
}

/// Model artifacts directory from environment or default
pub fn get_models_dir() -> PathBuf {
    std::env::var("POSTURE_MODELS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("models"))
}

/// Poll interval from environment or default
pub fn get_poll_interval_ms() -> u64 {
    std::env::var("POSTURE_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
}
