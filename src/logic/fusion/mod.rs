//! Fusion Module - Device Data Fusion & Validation
//!
//! ## Pipeline
//! 1. `parser` - firmware log line → (timestamp, partial fields)
//! 2. `record` - partial fields merged into one record per timestamp
//! 3. `validator` - hysteresis fault detection on completed records

pub mod parser;
pub mod record;
pub mod validator;

use std::fmt;

pub use parser::{LineParser, ParsedLine};
pub use record::{DeviceTimestamp, Field, FusedRecord, Fuser, Ingest, RawFields, FIELD_COUNT};
pub use validator::{Condition, ConditionGroup, FaultNotice, ValidationOutcome, Validator};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FusionError {
    /// Update for a timestamp older than the open record
    Stale { open: DeviceTimestamp, received: DeviceTimestamp },
    /// Line pattern failed to compile
    Pattern(String),
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionError::Stale { open, received } => {
                write!(f, "Stale device timestamp {} (open record is {})", received, open)
            }
            FusionError::Pattern(e) => write!(f, "Invalid line pattern: {}", e),
        }
    }
}

impl std::error::Error for FusionError {}
