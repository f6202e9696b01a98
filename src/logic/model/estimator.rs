//! Estimators - one capability trait for every posture classifier

use serde::{Deserialize, Serialize};

use crate::logic::features::FeatureVector;
use super::inference::InferenceError;

/// Per-estimator vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    Normal,
    Abnormal,
    /// Required input missing
    Abstain,
}

/// Final per-sample decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Normal,
    Abnormal,
}

impl Verdict {
    pub fn is_abnormal(&self) -> bool {
        matches!(self, Verdict::Abnormal)
    }

    /// Log column value: 1 abnormal, 0 normal
    pub fn as_flag(&self) -> u8 {
        match self {
            Verdict::Normal => 0,
            Verdict::Abnormal => 1,
        }
    }
}

impl Vote {
    /// Positive class (p >= 0.5) is abnormal posture
    pub fn from_probability(p: f32) -> Self {
        if p >= 0.5 {
            Vote::Abnormal
        } else {
            Vote::Normal
        }
    }
}

/// Binary posture classifier
pub trait BinaryEstimator: Send {
    fn name(&self) -> &str;

    fn predict(&mut self, features: &FeatureVector) -> Result<Vote, InferenceError>;
}

// ============================================================================
// THRESHOLD RULE
// ============================================================================

/// `diff >= threshold` → abnormal
#[derive(Debug, Clone, Copy)]
pub struct ThresholdEstimator {
    pub threshold: f64,
}

impl ThresholdEstimator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl BinaryEstimator for ThresholdEstimator {
    fn name(&self) -> &str {
        "threshold"
    }

    fn predict(&mut self, features: &FeatureVector) -> Result<Vote, InferenceError> {
        let Some(diff) = features.get_by_name("diff") else {
            return Ok(Vote::Abstain);
        };
        Ok(if diff as f64 >= self.threshold {
            Vote::Abnormal
        } else {
            Vote::Normal
        })
    }
}

// ============================================================================
// DISABLED MODEL
// ============================================================================

/// Stand-in when learned models are disabled; always abstains
#[derive(Debug, Clone)]
pub struct AbstainingEstimator {
    name: String,
}

impl AbstainingEstimator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl BinaryEstimator for AbstainingEstimator {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, _features: &FeatureVector) -> Result<Vote, InferenceError> {
        Ok(Vote::Abstain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_diff(diff: f32) -> FeatureVector {
        let mut v = FeatureVector::new();
        v.set_by_name("diff", diff);
        v
    }

    #[test]
    fn test_threshold_polarity() {
        let mut rule = ThresholdEstimator::new(80.0);
        assert_eq!(rule.predict(&with_diff(79.9)).unwrap(), Vote::Normal);
        assert_eq!(rule.predict(&with_diff(80.0)).unwrap(), Vote::Abnormal);
        assert_eq!(rule.predict(&with_diff(120.0)).unwrap(), Vote::Abnormal);
    }

    #[test]
    fn test_threshold_abstains_without_diff() {
        let mut rule = ThresholdEstimator::new(80.0);
        assert_eq!(rule.predict(&FeatureVector::new()).unwrap(), Vote::Abstain);
    }

    #[test]
    fn test_probability_cutoff() {
        assert_eq!(Vote::from_probability(0.5), Vote::Abnormal);
        assert_eq!(Vote::from_probability(0.49), Vote::Normal);
        assert_eq!(Verdict::Abnormal.as_flag(), 1);
    }
}
