//! Hysteresis Validator
//!
//! Two condition groups (Sensor, Camera), each evaluated in priority order
//! until the first failure. Every condition owns a counter: +1 on failure,
//! reset on pass. A counter reaching its group limit raises one fault notice.

use serde::{Deserialize, Serialize};

use crate::logic::config::ValidationConfig;
use super::record::{DeviceTimestamp, FusedRecord};

// ============================================================================
// CONDITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionGroup {
    Sensor,
    Camera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Both range values within the maximum distance
    SensorRange,
    /// Range values agree within the configured gap
    SensorAgreement,
    /// Both range values above the minimum distance
    SensorProximity,
    /// Recent bounding box or landmarks
    FacialData,
}

impl Condition {
    const SENSOR_ORDER: [Condition; 3] = [
        Condition::SensorRange,
        Condition::SensorAgreement,
        Condition::SensorProximity,
    ];

    fn slot(&self) -> usize {
        match self {
            Condition::SensorRange => 0,
            Condition::SensorAgreement => 1,
            Condition::SensorProximity => 2,
            Condition::FacialData => 3,
        }
    }

    pub fn group(&self) -> ConditionGroup {
        match self {
            Condition::FacialData => ConditionGroup::Camera,
            _ => ConditionGroup::Sensor,
        }
    }

    /// User-facing fault message
    pub fn message(&self) -> &'static str {
        match self {
            Condition::SensorRange => "Sensor cannot detect distance to participant",
            Condition::SensorAgreement => "Sensor values differ unexpectedly",
            Condition::SensorProximity => "Too close to the screen",
            Condition::FacialData => "Facial data not detected",
        }
    }
}

/// Sustained fault raised when a condition counter reaches its limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultNotice {
    pub condition: Condition,
    pub group: ConditionGroup,
    pub message: String,
    pub timestamp: DeviceTimestamp,
}

/// Result of one validation cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    /// Conditions that failed this cycle (at most one per group)
    pub failed: Vec<Condition>,
    /// Fault notices raised this cycle
    pub notices: Vec<FaultNotice>,
}

impl ValidationOutcome {
    /// Decision-making is suppressed while a fault is being reported
    pub fn suppresses_decision(&self) -> bool {
        !self.notices.is_empty()
    }

    /// Notes column text for the logged row
    pub fn notes(&self) -> Option<String> {
        if self.notices.is_empty() {
            return None;
        }
        Some(
            self.notices
                .iter()
                .map(|n| n.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct Validator {
    config: ValidationConfig,
    counters: [u32; 4],
    last_facial: Option<DeviceTimestamp>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            counters: [0; 4],
            last_facial: None,
        }
    }

    pub fn counter(&self, condition: Condition) -> u32 {
        self.counters[condition.slot()]
    }

    fn limit(&self, group: ConditionGroup) -> u32 {
        let limit = match group {
            ConditionGroup::Sensor => self.config.sensor_fault_limit,
            ConditionGroup::Camera => self.config.camera_fault_limit,
        };
        limit.unwrap_or(self.config.default_fault_limit).max(1)
    }

    fn passes(&self, condition: Condition, record: &FusedRecord) -> bool {
        let cfg = &self.config;
        match condition {
            Condition::SensorRange => record
                .sensors()
                .map(|(a, b)| a <= cfg.distance_max_mm && b <= cfg.distance_max_mm)
                .unwrap_or(true),
            Condition::SensorAgreement => record
                .sensors()
                .map(|(a, b)| (a - b).abs() < cfg.max_sensor_gap_mm)
                .unwrap_or(true),
            Condition::SensorProximity => record
                .sensors()
                .map(|(a, b)| a >= cfg.distance_min_mm && b >= cfg.distance_min_mm)
                .unwrap_or(true),
            Condition::FacialData => match self.last_facial {
                Some(seen) => record.timestamp.millis_since(seen) <= cfg.facial_max_age_ms,
                None => false,
            },
        }
    }

    /// Evaluate one record; returns the failed conditions and any notices raised
    pub fn validate(&mut self, record: &FusedRecord) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        if record.has_facial_data() {
            self.last_facial = Some(record.timestamp);
        }

        // Sensor group only runs when both range values are present
        if record.sensors().is_some() {
            for condition in Condition::SENSOR_ORDER {
                if !self.check(condition, record, &mut outcome) {
                    break;
                }
            }
        }

        self.check(Condition::FacialData, record, &mut outcome);

        outcome
    }

    /// Returns true when the condition passed
    fn check(&mut self, condition: Condition, record: &FusedRecord, outcome: &mut ValidationOutcome) -> bool {
        let slot = condition.slot();

        if self.passes(condition, record) {
            self.counters[slot] = 0;
            return true;
        }

        outcome.failed.push(condition);
        self.counters[slot] += 1;

        if self.counters[slot] >= self.limit(condition.group()) {
            self.counters[slot] = 0;
            log::warn!("Fault at {}: {}", record.timestamp, condition.message());
            outcome.notices.push(FaultNotice {
                condition,
                group: condition.group(),
                message: condition.message().to_string(),
                timestamp: record.timestamp,
            });
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::fusion::record::{Field, RawFields};

    fn config() -> ValidationConfig {
        ValidationConfig {
            sensor_fault_limit: Some(3),
            camera_fault_limit: Some(5),
            ..ValidationConfig::default()
        }
    }

    fn record(ts: u64, a: f64, b: f64, face: bool) -> FusedRecord {
        let mut r = FusedRecord::new(DeviceTimestamp(ts), "t");
        let mut raw = RawFields::new().with(Field::SensorA, a).with(Field::SensorB, b);
        if face {
            for f in Field::BBOX {
                raw.insert(f, 10.0);
            }
        }
        r.merge(&raw);
        r
    }

    #[test]
    fn test_notice_exactly_at_limit_then_reset() {
        let mut v = Validator::new(config());

        // Too far away: 900 > 850
        let o1 = v.validate(&record(1, 900.0, 900.0, true));
        let o2 = v.validate(&record(2, 900.0, 900.0, true));
        assert_eq!(o1.failed, vec![Condition::SensorRange]);
        assert!(o1.notices.is_empty() && o2.notices.is_empty());
        assert_eq!(v.counter(Condition::SensorRange), 2);

        let o3 = v.validate(&record(3, 900.0, 900.0, true));
        assert_eq!(o3.notices.len(), 1);
        assert_eq!(o3.notices[0].message, "Sensor cannot detect distance to participant");
        assert!(o3.suppresses_decision());
        assert_eq!(v.counter(Condition::SensorRange), 0);
    }

    #[test]
    fn test_pass_resets_counter() {
        let mut v = Validator::new(config());
        v.validate(&record(1, 900.0, 900.0, true));
        v.validate(&record(2, 900.0, 900.0, true));
        let ok = v.validate(&record(3, 500.0, 560.0, true));
        assert!(ok.failed.is_empty());
        assert_eq!(v.counter(Condition::SensorRange), 0);

        // Two more failures do not reach the limit of 3
        v.validate(&record(4, 900.0, 900.0, true));
        let o = v.validate(&record(5, 900.0, 900.0, true));
        assert!(o.notices.is_empty());
    }

    #[test]
    fn test_evaluation_stops_at_first_failure() {
        let mut v = Validator::new(config());
        // Out of range and disagreeing; only the range counter moves
        let o = v.validate(&record(1, 900.0, 450.0, true));
        assert_eq!(o.failed, vec![Condition::SensorRange]);
        assert_eq!(v.counter(Condition::SensorAgreement), 0);

        let o = v.validate(&record(2, 800.0, 450.0, true));
        assert_eq!(o.failed, vec![Condition::SensorAgreement]);

        let o = v.validate(&record(3, 390.0, 420.0, true));
        assert_eq!(o.failed, vec![Condition::SensorProximity]);
    }

    #[test]
    fn test_sensor_group_skipped_without_both_values() {
        let mut v = Validator::new(config());
        let mut r = FusedRecord::new(DeviceTimestamp(1), "t");
        r.merge(&RawFields::new().with(Field::SensorA, 2000.0));
        let o = v.validate(&r);
        assert_eq!(o.failed, vec![Condition::FacialData]);
    }

    #[test]
    fn test_facial_data_ages_out_on_device_clock() {
        let mut v = Validator::new(config());
        assert!(v.validate(&record(1_000, 500.0, 520.0, true)).failed.is_empty());
        assert!(v.validate(&record(3_000, 500.0, 520.0, false)).failed.is_empty());

        let stale = v.validate(&record(3_001, 500.0, 520.0, false));
        assert_eq!(stale.failed, vec![Condition::FacialData]);
    }

    #[test]
    fn test_camera_limit_falls_back_to_default() {
        let mut v = Validator::new(ValidationConfig {
            camera_fault_limit: None,
            default_fault_limit: 2,
            ..ValidationConfig::default()
        });
        let first = v.validate(&record(1, 500.0, 520.0, false));
        assert!(first.notices.is_empty());
        let second = v.validate(&record(2, 500.0, 520.0, false));
        assert_eq!(second.notices.len(), 1);
        assert_eq!(second.notices[0].group, ConditionGroup::Camera);
        assert_eq!(second.notes().as_deref(), Some("Facial data not detected"));
    }
}
