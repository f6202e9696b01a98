//! Fitted Feature Scaler
//!
//! Standardization parameters exported next to each model:
//! `{ "feature_names": [...], "mean": [...], "scale": [...] }`, optionally
//! with the `feature_version` and `layout_hash` the export was built for.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::logic::features::layout::{layout_hash, validate_layout, FEATURE_VERSION};
use super::inference::InferenceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub feature_names: Vec<String>,
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
    #[serde(default)]
    pub feature_version: Option<u8>,
    #[serde(default)]
    pub layout_hash: Option<u32>,
}

impl Scaler {
    pub fn load(path: &Path) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError(format!("Scaler not found: {:?}", path)));
        }
        let data = std::fs::read(path)
            .map_err(|e| InferenceError(format!("Failed to read scaler {:?}: {}", path, e)))?;
        let scaler: Scaler = serde_json::from_slice(&data)
            .map_err(|e| InferenceError(format!("Invalid scaler {:?}: {}", path, e)))?;
        scaler.check()?;
        Ok(scaler)
    }

    fn check(&self) -> Result<(), InferenceError> {
        let n = self.feature_names.len();
        if n == 0 || self.mean.len() != n || self.scale.len() != n {
            return Err(InferenceError(format!(
                "Scaler shape mismatch: {} names, {} means, {} scales",
                n,
                self.mean.len(),
                self.scale.len()
            )));
        }
        Ok(())
    }

    /// Fails unless the scaler was fitted on exactly `expected`, in order
    pub fn ensure_features(&self, expected: &[&str]) -> Result<(), InferenceError> {
        let matches = self.feature_names.len() == expected.len()
            && self.feature_names.iter().zip(expected).all(|(a, b)| a == b);
        if !matches {
            return Err(InferenceError(format!(
                "Scaler features {:?} do not match model features {:?}",
                self.feature_names, expected
            )));
        }
        Ok(())
    }

    /// Fails when the export declares a layout other than the current one
    pub fn ensure_layout(&self) -> Result<(), InferenceError> {
        if self.feature_version.is_none() && self.layout_hash.is_none() {
            return Ok(());
        }
        validate_layout(
            self.feature_version.unwrap_or(FEATURE_VERSION),
            self.layout_hash.unwrap_or_else(layout_hash),
        )
        .map_err(|e| InferenceError(e.to_string()))
    }

    /// `(x - mean) / scale`; a zero scale passes the centred value through
    pub fn transform(&self, values: &[f32]) -> Vec<f32> {
        values
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (mean, scale))| {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect()
    }
}
