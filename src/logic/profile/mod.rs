//! Profile Module - User identity, body size and decision threshold
//!
//! - `storage.rs`: `ProfileStore` trait, CSV user table, in-memory store

pub mod storage;

use serde::{Deserialize, Serialize};

use crate::constants::ANONYMOUS_USER_ID;

pub use storage::{CsvProfileStore, MemoryProfileStore, ProfileError, ProfileStore};

// ============================================================================
// SIZE BUCKET
// ============================================================================

/// Body size category derived from height
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeBucket {
    XS,
    S,
    M,
    L,
    XL,
}

impl SizeBucket {
    /// Cut points: <157, [157,162), [162,167), [167,172), >=172
    pub fn from_height(height_cm: f64) -> Self {
        if height_cm < 157.0 {
            SizeBucket::XS
        } else if height_cm < 162.0 {
            SizeBucket::S
        } else if height_cm < 167.0 {
            SizeBucket::M
        } else if height_cm < 172.0 {
            SizeBucket::L
        } else {
            SizeBucket::XL
        }
    }

    /// Ordinal feature value 0..=4
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }
}

// ============================================================================
// USER PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    /// Persisted decision threshold; `None` until calibrated or adapted
    pub threshold: Option<f64>,
}

impl UserProfile {
    pub fn new(id: i64, name: impl Into<String>, height_cm: f64, weight_kg: f64) -> Self {
        Self {
            id,
            name: name.into(),
            height_cm: Some(height_cm),
            weight_kg: Some(weight_kg),
            threshold: None,
        }
    }

    /// Default profile when nobody is signed in
    pub fn anonymous() -> Self {
        Self {
            id: ANONYMOUS_USER_ID,
            name: "anonymous".to_string(),
            height_cm: None,
            weight_kg: None,
            threshold: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS_USER_ID
    }

    pub fn size_bucket(&self) -> Option<SizeBucket> {
        self.height_cm.map(SizeBucket::from_height)
    }
}
