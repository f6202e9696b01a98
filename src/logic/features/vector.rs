//! Feature Vector - Core data structure for estimator input
//!
//! Versioned, layout-checked vector of `f32`. `NaN` marks a missing
//! optional input (no face in frame); estimators needing it abstain.

use serde::{Deserialize, Serialize};

use crate::logic::fusion::{Field, FusedRecord};
use crate::logic::profile::UserProfile;
use super::layout::{
    feature_index, layout_hash, validate_layout, LayoutMismatchError,
    FEATURE_COUNT, FEATURE_VERSION,
};

// ============================================================================
// VERSIONED FEATURE VECTOR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Feature layout version
    pub version: u8,
    /// CRC32 hash of the feature layout
    pub layout_hash: u32,
    /// Values in the order defined by FEATURE_LAYOUT
    pub values: [f32; FEATURE_COUNT],
}

impl FeatureVector {
    /// All-missing vector with current version
    pub fn new() -> Self {
        Self {
            version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            values: [f32::NAN; FEATURE_COUNT],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Present (non-NaN) value by name
    pub fn get_by_name(&self, name: &str) -> Option<f32> {
        feature_index(name)
            .and_then(|i| self.values.get(i).copied())
            .filter(|v| !v.is_nan())
    }

    /// Set by name; returns false for unknown names
    pub fn set_by_name(&mut self, name: &str, value: f32) -> bool {
        match feature_index(name) {
            Some(index) => {
                self.values[index] = value;
                true
            }
            None => false,
        }
    }

    /// Values for `names`, in that order. `Err` carries the first missing name.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<f32>, String> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get_by_name(name).ok_or_else(|| name.to_string())
            })
            .collect()
    }

    /// Fails for a vector built against another layout
    pub fn validate(&self) -> Result<(), LayoutMismatchError> {
        validate_layout(self.version, self.layout_hash)
    }

    // ========================================================================
    // DERIVATION
    // ========================================================================

    /// Engineer features from a completed record and the active profile.
    ///
    /// Returns `None` when a range value is missing or non-positive, or when
    /// the profile is absent or lacks height/weight.
    pub fn derive(record: &FusedRecord, profile: Option<&UserProfile>) -> Option<Self> {
        let (a, b) = record.sensors()?;
        if a <= 0.0 || b <= 0.0 {
            return None;
        }
        let profile = profile?;
        let height = profile.height_cm?;
        let weight = profile.weight_kg?;
        let bucket = profile.size_bucket()?;

        let mut v = Self::new();

        for field in [Field::SensorA, Field::SensorB]
            .into_iter()
            .chain(Field::BBOX)
            .chain(Field::LANDMARKS)
        {
            if let Some(value) = record.get(field) {
                v.set_by_name(field.name(), value as f32);
            }
        }

        let diff = b - a;
        v.set_by_name("diff", diff as f32);
        v.set_by_name("diff_ratio_a", (diff / a) as f32);
        v.set_by_name("diff_ratio_b", (diff / b) as f32);

        if record.has_bbox() {
            let x1 = record.get(Field::BboxX1).unwrap_or(f64::NAN);
            let y1 = record.get(Field::BboxY1).unwrap_or(f64::NAN);
            let x2 = record.get(Field::BboxX2).unwrap_or(f64::NAN);
            let y2 = record.get(Field::BboxY2).unwrap_or(f64::NAN);
            let width = x2 - x1;
            let bbox_height = y2 - y1;
            let area = width * bbox_height;
            v.set_by_name("bbox_width", width as f32);
            v.set_by_name("bbox_height", bbox_height as f32);
            v.set_by_name("bbox_area", area as f32);
            v.set_by_name("area_ratio_a", (area / a) as f32);
            v.set_by_name("area_ratio_b", (area / b) as f32);
        }

        v.set_by_name("height", height as f32);
        v.set_by_name("weight", weight as f32);
        v.set_by_name("size_bucket", bucket.ordinal() as f32);

        Some(v)
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::new()
    }
}
