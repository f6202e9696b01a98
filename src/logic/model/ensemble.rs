//! Ensemble Anomaly Detector
//!
//! Threshold rule + two learned classifiers. The threshold rule alone can
//! clear a sample; an abnormal threshold call stands unless both models
//! vote normal.

use serde::{Deserialize, Serialize};

use crate::logic::config::ModelsConfig;
use crate::logic::features::FeatureVector;
use super::estimator::{AbstainingEstimator, BinaryEstimator, ThresholdEstimator, Verdict, Vote};
use super::inference::{InferenceError, OnnxClassifier};

/// Votes behind one decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub threshold: Vote,
    pub model_a: Vote,
    pub model_b: Vote,
    /// `None` when the threshold rule abstained
    pub verdict: Option<Verdict>,
}

/// Combine the three votes
pub fn combine(threshold: Vote, model_a: Vote, model_b: Vote) -> Option<Verdict> {
    match threshold {
        Vote::Abstain => None,
        Vote::Normal => Some(Verdict::Normal),
        Vote::Abnormal => {
            if model_a == Vote::Normal && model_b == Vote::Normal {
                Some(Verdict::Normal)
            } else {
                Some(Verdict::Abnormal)
            }
        }
    }
}

pub struct Ensemble {
    model_a: Box<dyn BinaryEstimator>,
    model_b: Box<dyn BinaryEstimator>,
}

impl Ensemble {
    pub fn new(model_a: Box<dyn BinaryEstimator>, model_b: Box<dyn BinaryEstimator>) -> Self {
        Self { model_a, model_b }
    }

    /// Load both classifiers; any artifact problem is fatal.
    /// Callers check `config.enabled` and use `threshold_only()` otherwise.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, InferenceError> {
        let model_a = OnnxClassifier::model_a(&config.model_a)?;
        let model_b = OnnxClassifier::model_b(&config.model_b)?;
        Ok(Self::new(Box::new(model_a), Box::new(model_b)))
    }

    pub fn threshold_only() -> Self {
        Self::new(
            Box::new(AbstainingEstimator::new("model_a")),
            Box::new(AbstainingEstimator::new("model_b")),
        )
    }

    /// Decide one sample. A runtime failure of an estimator yields no verdict.
    pub fn decide(&mut self, features: &FeatureVector, threshold: f64) -> Result<Decision, InferenceError> {
        let threshold_vote = ThresholdEstimator::new(threshold).predict(features)?;
        if threshold_vote == Vote::Abstain {
            log::debug!("Threshold rule abstains (no diff)");
            return Ok(Decision {
                threshold: Vote::Abstain,
                model_a: Vote::Abstain,
                model_b: Vote::Abstain,
                verdict: None,
            });
        }

        let model_a = self.model_a.predict(features)?;
        let model_b = self.model_b.predict(features)?;

        Ok(Decision {
            threshold: threshold_vote,
            model_a,
            model_b,
            verdict: combine(threshold_vote, model_a, model_b),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fixed-vote stand-in for a learned model
    struct Fixed(Vote);

    impl BinaryEstimator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn predict(&mut self, _features: &FeatureVector) -> Result<Vote, InferenceError> {
            Ok(self.0)
        }
    }

    struct Failing;

    impl BinaryEstimator for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn predict(&mut self, _features: &FeatureVector) -> Result<Vote, InferenceError> {
            Err(InferenceError("runtime failure".into()))
        }
    }

    fn features(diff: f32) -> FeatureVector {
        let mut v = FeatureVector::new();
        v.set_by_name("diff", diff);
        v
    }

    #[test]
    fn test_voting_table() {
        use Vote::*;
        // Threshold normal clears regardless of models
        assert_eq!(combine(Normal, Abnormal, Abnormal), Some(Verdict::Normal));
        // Both models normal override an abnormal threshold call
        assert_eq!(combine(Abnormal, Normal, Normal), Some(Verdict::Normal));
        // One model abnormal keeps it abnormal
        assert_eq!(combine(Abnormal, Abnormal, Normal), Some(Verdict::Abnormal));
        // Abstaining model cannot clear
        assert_eq!(combine(Abnormal, Normal, Abstain), Some(Verdict::Abnormal));
        assert_eq!(combine(Abstain, Normal, Normal), None);
    }

    #[test]
    fn test_decide_with_stub_models() {
        let mut ensemble = Ensemble::new(Box::new(Fixed(Vote::Normal)), Box::new(Fixed(Vote::Normal)));
        assert_eq!(ensemble.decide(&features(120.0), 80.0).unwrap().verdict, Some(Verdict::Normal));

        let mut ensemble = Ensemble::new(Box::new(Fixed(Vote::Normal)), Box::new(Fixed(Vote::Abnormal)));
        let d = ensemble.decide(&features(120.0), 80.0).unwrap();
        assert_eq!(d.verdict, Some(Verdict::Abnormal));
        assert_eq!(d.model_b, Vote::Abnormal);

        assert_eq!(ensemble.decide(&features(10.0), 80.0).unwrap().verdict, Some(Verdict::Normal));
        assert_eq!(ensemble.decide(&FeatureVector::new(), 80.0).unwrap().verdict, None);
    }

    #[test]
    fn test_threshold_only_escalates() {
        let mut ensemble = Ensemble::threshold_only();
        assert_eq!(ensemble.decide(&features(90.0), 80.0).unwrap().verdict, Some(Verdict::Abnormal));
    }

    #[test]
    fn test_runtime_error_propagates() {
        let mut ensemble = Ensemble::new(Box::new(Failing), Box::new(Fixed(Vote::Normal)));
        assert!(ensemble.decide(&features(120.0), 80.0).is_err());
    }
}
