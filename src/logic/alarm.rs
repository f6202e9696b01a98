//! Alarm Debounce State Machine
//!
//! Turns per-sample verdicts into at most one pending alert. Elapsed time is
//! measured on the device clock: abnormal time is the sum of inter-sample
//! deltas between consecutive abnormal samples.

use serde::{Deserialize, Serialize};

use crate::logic::config::AlarmConfig;
use crate::logic::fusion::DeviceTimestamp;
use crate::logic::model::Verdict;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmState {
    Idle,
    Accumulating {
        anchor: DeviceTimestamp,
        abnormal_ms: u64,
    },
    Alerted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub anchor: DeviceTimestamp,
    pub trigger: DeviceTimestamp,
    pub abnormal_ms: u64,
    pub required_interval_ms: u64,
    /// Local time of the triggering sample
    pub local_time: String,
}

impl AlarmEvent {
    /// Anchor-to-trigger window in whole seconds (`notification_interval` column)
    pub fn interval_secs(&self) -> u64 {
        self.trigger.millis_since(self.anchor) / 1000
    }
}

/// Outcome of observing one sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmStep {
    /// Abnormal milliseconds added by this sample
    pub contributed_ms: u64,
    pub event: Option<AlarmEvent>,
}

// ============================================================================
// DEBOUNCER
// ============================================================================

pub struct AlarmDebouncer {
    config: AlarmConfig,
    state: AlarmState,
    pending: bool,
    /// Timestamp of the previous sample when it was abnormal
    previous_abnormal: Option<DeviceTimestamp>,
}

impl AlarmDebouncer {
    pub fn new(config: AlarmConfig) -> Self {
        Self {
            config,
            state: AlarmState::Idle,
            pending: false,
            previous_abnormal: None,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Feed one sample (`None` = no verdict).
    ///
    /// Elapsed time comes from `ts`, the device clock in milliseconds; host
    /// time is never read. `local_time` only labels a raised alert.
    pub fn observe(&mut self, ts: DeviceTimestamp, verdict: Option<Verdict>, local_time: &str) -> AlarmStep {
        let mut step = AlarmStep::default();

        match verdict {
            Some(Verdict::Normal) => {
                self.state = AlarmState::Idle;
                self.previous_abnormal = None;
            }
            Some(Verdict::Abnormal) => {
                if !self.pending {
                    step.contributed_ms = self.accumulate(ts);
                }
                self.previous_abnormal = Some(ts);
            }
            None => {
                self.previous_abnormal = None;
            }
        }

        if let AlarmState::Accumulating { anchor, abnormal_ms } = self.state {
            let required = self.config.required_interval_ms;
            if ts.millis_since(anchor) >= required {
                let ratio = abnormal_ms as f64 / required as f64;
                if ratio >= self.config.alert_ratio {
                    log::info!("Alarm at {}: {} ms abnormal of {} ms", ts, abnormal_ms, required);
                    self.state = AlarmState::Alerted;
                    self.pending = true;
                    step.event = Some(AlarmEvent {
                        anchor,
                        trigger: ts,
                        abnormal_ms,
                        required_interval_ms: required,
                        local_time: local_time.to_string(),
                    });
                } else {
                    log::debug!("Window discarded: ratio {:.2}", ratio);
                    self.state = AlarmState::Idle;
                }
            }
        }

        step
    }

    fn accumulate(&mut self, ts: DeviceTimestamp) -> u64 {
        match self.state {
            AlarmState::Idle | AlarmState::Alerted => {
                self.state = AlarmState::Accumulating { anchor: ts, abnormal_ms: 0 };
                0
            }
            AlarmState::Accumulating { anchor, abnormal_ms } => {
                let delta = self
                    .previous_abnormal
                    .map(|prev| ts.millis_since(prev))
                    .unwrap_or(0);
                self.state = AlarmState::Accumulating {
                    anchor,
                    abnormal_ms: abnormal_ms + delta,
                };
                delta
            }
        }
    }

    /// User responded to the alert: clear the latch and start over
    pub fn acknowledge(&mut self) {
        self.pending = false;
        self.state = AlarmState::Idle;
        self.previous_abnormal = None;
    }
}
