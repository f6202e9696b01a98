//! Logic Module - Business Logic & Engines
//!
//! ## Pipeline
//! - `fusion/` - Device line parsing, record fusion, hysteresis validation
//! - `features/` - Feature engineering (versioned layout)
//! - `model/` - Estimators (threshold, ONNX), ensemble voting, adaptive threshold
//! - `alarm` - Debounce state machine
//! - `dataset/` - Session log buffer, rotated CSV files, reconciler
//! - `monitor` - Orchestrates the pipeline under one lock

pub mod config;
pub mod events;
pub mod profile;
pub mod session;
pub mod alarm;
pub mod monitor;
pub mod analysis_loop;

pub mod fusion;
pub mod features;
pub mod model;
pub mod dataset;
