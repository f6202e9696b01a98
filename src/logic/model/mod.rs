//! Model Module - Posture Decision Engine
//!
//! Threshold rule and ONNX classifiers behind one `BinaryEstimator` trait,
//! combined by the ensemble; the threshold itself adapts from feedback.

pub mod estimator;
pub mod scaler;
pub mod inference;
pub mod threshold;
pub mod ensemble;

pub use estimator::{BinaryEstimator, ThresholdEstimator, Verdict, Vote};
pub use inference::{InferenceError, OnnxClassifier};
pub use threshold::{ThresholdChange, ThresholdManager};
pub use ensemble::{Decision, Ensemble};
