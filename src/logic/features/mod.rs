//! Features Module - Posture Feature Engineering
//!
//! Pure derivation from a fused record + user profile.
//! Never persisted; recomputed per decision.

pub mod layout;
pub mod vector;


use crate::logic::fusion::FusedRecord;
use crate::logic::profile::UserProfile;

pub use layout::{LayoutMismatchError, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};
pub use vector::FeatureVector;

/// See [`FeatureVector::derive`]
pub fn derive(record: &FusedRecord, profile: Option<&UserProfile>) -> Option<FeatureVector> {
    FeatureVector::derive(record, profile)
}
