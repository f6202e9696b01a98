//! Posture Feature Layout
//!
//! Names and order of every engineered feature. Any change to the list
//! bumps `FEATURE_VERSION`; scalers exported with a version and hash are
//! checked against it when a model loads.

use crc32fast::Hasher;
use once_cell::sync::Lazy;

pub const FEATURE_VERSION: u8 = 1;

/// Vector order
pub const FEATURE_LAYOUT: &[&str] = &[
    // === Raw range sensors (0-1) ===
    "sensor_a",              // 0: Lower sensor distance (mm)
    "sensor_b",              // 1: Upper sensor distance (mm)

    // === Bounding box (2-5) ===
    "bbox_x1",               // 2
    "bbox_y1",               // 3
    "bbox_x2",               // 4
    "bbox_y2",               // 5

    // === Landmarks (6-15) ===
    "left_eye_x",            // 6
    "left_eye_y",            // 7
    "right_eye_x",           // 8
    "right_eye_y",           // 9
    "nose_x",                // 10
    "nose_y",                // 11
    "mouth_left_x",          // 12
    "mouth_left_y",          // 13
    "mouth_right_x",         // 14
    "mouth_right_y",         // 15

    // === Sensor derived (16-18) ===
    "diff",                  // 16: sensor_b - sensor_a
    "diff_ratio_a",          // 17: diff / sensor_a
    "diff_ratio_b",          // 18: diff / sensor_b

    // === Bounding box derived (19-23) ===
    "bbox_width",            // 19
    "bbox_height",           // 20
    "bbox_area",             // 21
    "area_ratio_a",          // 22: area / sensor_a
    "area_ratio_b",          // 23: area / sensor_b

    // === Profile (24-26) ===
    "height",                // 24: cm
    "weight",                // 25: kg
    "size_bucket",           // 26: ordinal 0 (XS) .. 4 (XL)
];

pub const FEATURE_COUNT: usize = 27;

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 over version + NUL-separated names
fn compute_layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    for name in FEATURE_LAYOUT {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

static LAYOUT_HASH: Lazy<u32> = Lazy::new(compute_layout_hash);

pub fn layout_hash() -> u32 {
    *LAYOUT_HASH
}

// ============================================================================
// LAYOUT CHECK
// ============================================================================

/// A vector or model artifact built for another layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMismatchError {
    pub version: u8,
    pub hash: u32,
}

impl std::fmt::Display for LayoutMismatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Feature layout v{} ({:08x}) does not match current v{} ({:08x})",
            self.version,
            self.hash,
            FEATURE_VERSION,
            layout_hash()
        )
    }
}

impl std::error::Error for LayoutMismatchError {}

pub fn validate_layout(version: u8, hash: u32) -> Result<(), LayoutMismatchError> {
    if version != FEATURE_VERSION || hash != layout_hash() {
        return Err(LayoutMismatchError { version, hash });
    }
    Ok(())
}

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_length() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_hash_is_cached_value() {
        assert_eq!(layout_hash(), compute_layout_hash());
        assert_ne!(layout_hash(), 0);
    }

    #[test]
    fn test_other_layouts_rejected() {
        assert!(validate_layout(FEATURE_VERSION, layout_hash()).is_ok());

        let err = validate_layout(FEATURE_VERSION + 1, layout_hash()).unwrap_err();
        assert_eq!(err.version, FEATURE_VERSION + 1);
        assert!(validate_layout(FEATURE_VERSION, layout_hash() ^ 1).is_err());
    }

    #[test]
    fn test_feature_positions() {
        assert_eq!(feature_index("sensor_a"), Some(0));
        assert_eq!(feature_index("diff"), Some(16));
        assert_eq!(feature_index("size_bucket"), Some(26));
        assert_eq!(feature_index("fhp"), None);
    }
}
