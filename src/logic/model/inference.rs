//! Inference Engine - ONNX Runtime Integration
//!
//! Loads an exported posture classifier + its fitted scaler and runs one
//! sample at a time. Missing artifacts, a checksum mismatch, or a scaler
//! fitted on other features or another layout are fatal at load.

use std::path::Path;

use ndarray::Array2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use sha2::{Digest, Sha256};

use crate::logic::config::ModelArtifact;
use crate::logic::features::FeatureVector;
use super::estimator::{BinaryEstimator, Vote};
use super::scaler::Scaler;

// ============================================================================
// FEATURE LISTS
// ============================================================================

/// Model A inputs, in graph order
pub const MODEL_A_FEATURES: &[&str] = &[
    "sensor_a", "sensor_b",
    "bbox_x1", "bbox_y1", "bbox_x2", "bbox_y2",
    "left_eye_x", "left_eye_y", "right_eye_x", "right_eye_y",
    "nose_x", "nose_y",
    "mouth_left_x", "mouth_left_y", "mouth_right_x", "mouth_right_y",
    "diff", "diff_ratio_a", "diff_ratio_b",
    "bbox_width", "bbox_height", "bbox_area", "area_ratio_a", "area_ratio_b",
    "height", "weight",
];

/// Model B inputs, in graph order
pub const MODEL_B_FEATURES: &[&str] = &["weight", "height", "diff", "sensor_a", "sensor_b"];

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub struct InferenceError(pub String);

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InferenceError: {}", self.0)
    }
}

impl std::error::Error for InferenceError {}

// ============================================================================
// OUTPUT INTERPRETATION
// ============================================================================

/// What the graph's first output holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Raw score; sigmoid (or softmax for two values) applied here
    Logits,
    /// Probability of the positive class, or `[p_normal, p_abnormal]`
    Probability,
}

impl OutputKind {
    /// Positive-class probability from the raw output
    pub fn positive_probability(&self, data: &[f32]) -> Result<f32, InferenceError> {
        match (self, data) {
            (OutputKind::Logits, [z]) => Ok(sigmoid(*z)),
            (OutputKind::Logits, [z0, z1]) => Ok(sigmoid(z1 - z0)),
            (OutputKind::Probability, [p]) => Ok(*p),
            (OutputKind::Probability, [_, p1]) => Ok(*p1),
            _ => Err(InferenceError(format!("Unexpected output length {}", data.len()))),
        }
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

// ============================================================================
// CHECKSUM
// ============================================================================

/// Hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> Result<String, InferenceError> {
    let bytes = std::fs::read(path)
        .map_err(|e| InferenceError(format!("Failed to read {:?}: {}", path, e)))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn verify_checksum(path: &Path, expected: &str) -> Result<(), InferenceError> {
    let actual = file_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(InferenceError(format!(
            "Checksum mismatch for {:?}: expected {}, got {}",
            path, expected, actual
        )));
    }
    Ok(())
}

// ============================================================================
// ONNX CLASSIFIER
// ============================================================================

pub struct OnnxClassifier {
    name: String,
    session: Session,
    output_name: String,
    scaler: Scaler,
    features: &'static [&'static str],
    output: OutputKind,
}

impl OnnxClassifier {
    pub fn load(
        name: &str,
        artifact: &ModelArtifact,
        features: &'static [&'static str],
        output: OutputKind,
    ) -> Result<Self, InferenceError> {
        log::info!("Loading ONNX model '{}' from: {:?}", name, artifact.model);

        if !artifact.model.exists() {
            return Err(InferenceError(format!("Model not found: {:?}", artifact.model)));
        }
        if let Some(expected) = artifact.sha256.as_deref() {
            verify_checksum(&artifact.model, expected)?;
        }

        let scaler = Scaler::load(&artifact.scaler)?;
        scaler.ensure_features(features)?;
        scaler.ensure_layout()?;

        let session = Session::builder()
            .map_err(|e| InferenceError(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(&artifact.model)
            .map_err(|e| InferenceError(format!("Failed to load model: {}", e)))?;

        let output_name = session.outputs.first()
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError("No output defined".to_string()))?;

        log::info!("ONNX model '{}' loaded ({} features)", name, features.len());

        Ok(Self {
            name: name.to_string(),
            session,
            output_name,
            scaler,
            features,
            output,
        })
    }

    /// Model A: full face + sensor layout, logits output
    pub fn model_a(artifact: &ModelArtifact) -> Result<Self, InferenceError> {
        Self::load("model_a", artifact, MODEL_A_FEATURES, OutputKind::Logits)
    }

    /// Model B: body size + sensors, probability output
    pub fn model_b(artifact: &ModelArtifact) -> Result<Self, InferenceError> {
        Self::load("model_b", artifact, MODEL_B_FEATURES, OutputKind::Probability)
    }

    fn run(&mut self, scaled: Vec<f32>) -> Result<f32, InferenceError> {
        let n = scaled.len();
        let input_array = Array2::<f32>::from_shape_vec((1, n), scaled)
            .map_err(|e| InferenceError(format!("Array error: {}", e)))?;

        let input_tensor = Value::from_array(input_array)
            .map_err(|e| InferenceError(format!("Tensor error: {}", e)))?;

        let outputs = self.session.run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError(format!("Inference failed: {}", e)))?;

        let output = outputs.get(&self.output_name)
            .ok_or_else(|| InferenceError("No output".to_string()))?;

        let output_tensor = output.try_extract_tensor::<f32>()
            .map_err(|e| InferenceError(format!("Extract error: {}", e)))?;

        self.output.positive_probability(output_tensor.1)
    }
}

impl BinaryEstimator for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, features: &FeatureVector) -> Result<Vote, InferenceError> {
        features.validate().map_err(|e| InferenceError(e.to_string()))?;

        let raw = match features.select(self.features) {
            Ok(raw) => raw,
            Err(missing) => {
                log::debug!("{} abstains: missing feature '{}'", self.name, missing);
                return Ok(Vote::Abstain);
            }
        };

        let scaled = self.scaler.transform(&raw);
        let p = self.run(scaled)?;
        Ok(Vote::from_probability(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::layout::{feature_index, FEATURE_VERSION};
    use tempfile::tempdir;

    #[test]
    fn test_model_feature_lists_exist_in_layout() {
        for name in MODEL_A_FEATURES.iter().chain(MODEL_B_FEATURES) {
            assert!(feature_index(name).is_some(), "{} not in layout", name);
        }
        assert_eq!(MODEL_A_FEATURES.len(), 26);
    }

    #[test]
    fn test_output_interpretation() {
        assert_eq!(OutputKind::Logits.positive_probability(&[0.0]).unwrap(), 0.5);
        assert!(OutputKind::Logits.positive_probability(&[4.0]).unwrap() > 0.98);
        assert_eq!(OutputKind::Probability.positive_probability(&[0.3, 0.7]).unwrap(), 0.7);
        assert!(OutputKind::Probability.positive_probability(&[]).is_err());
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let dir = tempdir().unwrap();
        let artifact = ModelArtifact {
            model: dir.path().join("absent.onnx"),
            scaler: dir.path().join("absent.json"),
            sha256: None,
        };
        let err = OnnxClassifier::model_b(&artifact).err().unwrap();
        assert!(err.0.contains("Model not found"));
    }

    #[test]
    fn test_checksum_mismatch_is_fatal() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("model_b.onnx");
        std::fs::write(&model, b"not really a graph").unwrap();

        let artifact = ModelArtifact {
            model: model.clone(),
            scaler: dir.path().join("scaler_b.json"),
            sha256: Some("00".repeat(32)),
        };
        let err = OnnxClassifier::model_b(&artifact).err().unwrap();
        assert!(err.0.contains("Checksum mismatch"));
        assert_eq!(file_sha256(&model).unwrap().len(), 64);
    }

    #[test]
    fn test_scaler_from_other_layout_is_fatal() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("model_b.onnx");
        let scaler = dir.path().join("scaler_b.json");
        std::fs::write(&model, b"not really a graph").unwrap();

        let n = MODEL_B_FEATURES.len();
        let export = serde_json::json!({
            "feature_names": MODEL_B_FEATURES,
            "mean": vec![0.0; n],
            "scale": vec![1.0; n],
            "feature_version": FEATURE_VERSION + 1,
        });
        std::fs::write(&scaler, export.to_string()).unwrap();

        let artifact = ModelArtifact { model, scaler, sha256: None };
        let err = OnnxClassifier::model_b(&artifact).err().unwrap();
        assert!(err.0.contains("layout"), "{}", err.0);
    }
}
