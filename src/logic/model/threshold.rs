//! Adaptive Threshold Manager
//!
//! Holds the active profile's decision threshold and moves it from user
//! feedback: every `feedback_limit` consecutive incorrect alerts raise it by
//! `threshold_increment`. A correct response resets the count.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::logic::config::ThresholdConfig;
use crate::logic::profile::{ProfileError, ProfileStore, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdChange {
    pub from: Option<f64>,
    pub to: f64,
}

pub struct ThresholdManager {
    config: ThresholdConfig,
    profile: UserProfile,
    threshold: Option<f64>,
    remaining: u32,
    store: Arc<dyn ProfileStore>,
}

impl ThresholdManager {
    /// Seed from the persisted profile value, else the size-bucket default
    pub fn new(config: ThresholdConfig, profile: UserProfile, store: Arc<dyn ProfileStore>) -> Self {
        let threshold = profile
            .threshold
            .or_else(|| profile.size_bucket().map(|b| config.buckets.for_bucket(b)));

        match threshold {
            Some(t) => log::info!("Profile {} threshold {:.1}", profile.id, t),
            None => log::info!("Profile {} has no threshold; decisions disabled", profile.id),
        }

        let remaining = config.feedback_limit;
        Self {
            config,
            profile,
            threshold,
            remaining,
            store,
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    /// Incorrect responses still allowed before the next increase
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Apply one feedback response to the last alert
    pub fn on_feedback(&mut self, is_correct: bool) -> Option<ThresholdChange> {
        if is_correct {
            self.remaining = self.config.feedback_limit;
            return None;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining > 0 {
            return None;
        }
        self.remaining = self.config.feedback_limit;

        let from = self.threshold?;
        let to = from + self.config.threshold_increment;
        self.threshold = Some(to);
        self.profile.threshold = Some(to);
        log::info!("Threshold raised {:.1} → {:.1} for profile {}", from, to, self.profile.id);

        if let Err(e) = self.persist(to) {
            log::error!("Failed to persist threshold for profile {}: {}", self.profile.id, e);
        }

        Some(ThresholdChange { from: Some(from), to })
    }

    /// Replace the threshold (calibration result) and persist it immediately
    pub fn calibrate(&mut self, profile_id: i64, value: f64) -> Result<ThresholdChange, ProfileError> {
        if profile_id != self.profile.id {
            self.store.save_threshold(profile_id, value)?;
            return Ok(ThresholdChange { from: None, to: value });
        }

        let change = ThresholdChange { from: self.threshold, to: value };
        self.threshold = Some(value);
        self.profile.threshold = Some(value);
        self.remaining = self.config.feedback_limit;
        self.persist(value)?;
        Ok(change)
    }

    fn persist(&self, value: f64) -> Result<(), ProfileError> {
        if self.profile.is_anonymous() {
            return Ok(());
        }
        self.store.save_threshold(self.profile.id, value)
    }
}
