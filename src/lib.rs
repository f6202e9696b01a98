//! Posture Monitor Core
//!
//! Sensor fusion, ensemble posture decisions, debounced alarms, adaptive
//! per-user thresholds and crash-tolerant session logging.

pub mod constants;
pub mod logic;

pub use logic::monitor::Monitor;
pub use logic::config::MonitorConfig;
