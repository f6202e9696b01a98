//! Fused Record - one logical sample per device timestamp
//!
//! Partial device updates for the same timestamp are merged field by field.
//! A present value is never replaced by a missing one.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_TIME_FORMAT;

use super::FusionError;

// ============================================================================
// DEVICE TIMESTAMP
// ============================================================================

/// Monotonic sampling instant assigned by the sensor firmware (milliseconds since boot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceTimestamp(pub u64);

impl DeviceTimestamp {
    /// Milliseconds elapsed since `earlier` (zero if `earlier` is newer)
    pub fn millis_since(&self, earlier: DeviceTimestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceTimestamp {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(DeviceTimestamp)
    }
}

// ============================================================================
// FIELDS
// ============================================================================

/// Numeric device fields carried by a fused record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SensorA,
    SensorB,
    BboxX1,
    BboxY1,
    BboxX2,
    BboxY2,
    Mv1,
    Mv2,
    Mv3,
    Mv4,
    LeftEyeX,
    LeftEyeY,
    RightEyeX,
    RightEyeY,
    NoseX,
    NoseY,
    MouthLeftX,
    MouthLeftY,
    MouthRightX,
    MouthRightY,
    Fhp,
}

pub const FIELD_COUNT: usize = 21;

impl Field {
    /// All fields in log-column order
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::SensorA, Field::SensorB,
        Field::BboxX1, Field::BboxY1, Field::BboxX2, Field::BboxY2,
        Field::Mv1, Field::Mv2, Field::Mv3, Field::Mv4,
        Field::LeftEyeX, Field::LeftEyeY, Field::RightEyeX, Field::RightEyeY,
        Field::NoseX, Field::NoseY,
        Field::MouthLeftX, Field::MouthLeftY, Field::MouthRightX, Field::MouthRightY,
        Field::Fhp,
    ];

    pub const BBOX: [Field; 4] = [Field::BboxX1, Field::BboxY1, Field::BboxX2, Field::BboxY2];

    pub const LANDMARKS: [Field; 10] = [
        Field::LeftEyeX, Field::LeftEyeY, Field::RightEyeX, Field::RightEyeY,
        Field::NoseX, Field::NoseY,
        Field::MouthLeftX, Field::MouthLeftY, Field::MouthRightX, Field::MouthRightY,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Column / dictionary name
    pub fn name(&self) -> &'static str {
        match self {
            Field::SensorA => "sensor_a",
            Field::SensorB => "sensor_b",
            Field::BboxX1 => "bbox_x1",
            Field::BboxY1 => "bbox_y1",
            Field::BboxX2 => "bbox_x2",
            Field::BboxY2 => "bbox_y2",
            Field::Mv1 => "mv_1",
            Field::Mv2 => "mv_2",
            Field::Mv3 => "mv_3",
            Field::Mv4 => "mv_4",
            Field::LeftEyeX => "left_eye_x",
            Field::LeftEyeY => "left_eye_y",
            Field::RightEyeX => "right_eye_x",
            Field::RightEyeY => "right_eye_y",
            Field::NoseX => "nose_x",
            Field::NoseY => "nose_y",
            Field::MouthLeftX => "mouth_left_x",
            Field::MouthLeftY => "mouth_left_y",
            Field::MouthRightX => "mouth_right_x",
            Field::MouthRightY => "mouth_right_y",
            Field::Fhp => "fhp",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.name() == name)
    }
}

// ============================================================================
// RAW FIELDS
// ============================================================================

/// One partial device update. Absent or non-finite values mean "missing".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields {
    values: BTreeMap<Field, f64>,
}

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a named dictionary; unknown names are ignored
    pub fn from_named<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut raw = Self::new();
        for (name, value) in pairs {
            match Field::from_name(name) {
                Some(field) => raw.insert(field, value),
                None => log::debug!("Ignoring unknown device field '{}'", name),
            }
        }
        raw
    }

    pub fn insert(&mut self, field: Field, value: f64) {
        self.values.insert(field, value);
    }

    pub fn with(mut self, field: Field, value: f64) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied().filter(|v| v.is_finite())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        self.values.iter().map(|(f, v)| (*f, *v))
    }
}

// ============================================================================
// FUSED RECORD
// ============================================================================

/// All device data observed for one device timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedRecord {
    pub timestamp: DeviceTimestamp,
    /// Wall-clock time at first creation, never updated
    pub local_time: String,
    values: [Option<f64>; FIELD_COUNT],
}

impl FusedRecord {
    /// Create an empty record stamped with the given local time
    pub fn new(timestamp: DeviceTimestamp, local_time: impl Into<String>) -> Self {
        Self {
            timestamp,
            local_time: local_time.into(),
            values: [None; FIELD_COUNT],
        }
    }

    /// Create an empty record stamped with the current local time
    pub fn stamped_now(timestamp: DeviceTimestamp) -> Self {
        Self::new(timestamp, Local::now().format(LOCAL_TIME_FORMAT).to_string())
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values[field.index()]
    }

    pub fn set(&mut self, field: Field, value: Option<f64>) {
        self.values[field.index()] = value.filter(|v| v.is_finite());
    }

    /// Merge a partial update: last valid value wins per field
    pub fn merge(&mut self, update: &RawFields) {
        for (field, value) in update.iter() {
            if value.is_finite() {
                self.values[field.index()] = Some(value);
            }
        }
    }

    pub fn sensors(&self) -> Option<(f64, f64)> {
        Some((self.get(Field::SensorA)?, self.get(Field::SensorB)?))
    }

    pub fn has_bbox(&self) -> bool {
        Field::BBOX.iter().all(|f| self.get(*f).is_some())
    }

    pub fn has_landmarks(&self) -> bool {
        Field::LANDMARKS.iter().all(|f| self.get(*f).is_some())
    }

    /// A bounding box or a landmark set arrived for this timestamp
    pub fn has_facial_data(&self) -> bool {
        self.has_bbox() || self.has_landmarks()
    }
}

// ============================================================================
// FUSER
// ============================================================================

/// Result of one ingest call
#[derive(Debug, Clone)]
pub struct Ingest {
    /// The open record after merging (possibly partial)
    pub record: FusedRecord,
    /// The previous record, completed because a newer timestamp arrived
    pub completed: Option<FusedRecord>,
}

/// Merges partial updates into one record per device timestamp
#[derive(Debug, Default)]
pub struct Fuser {
    open: Option<FusedRecord>,
}

impl Fuser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `fields` into the record for `timestamp`, creating it if new
    pub fn ingest(&mut self, fields: &RawFields, timestamp: DeviceTimestamp) -> Result<Ingest, FusionError> {
        let completed = match self.open.as_ref() {
            Some(open) if open.timestamp == timestamp => None,
            Some(open) if open.timestamp > timestamp => {
                return Err(FusionError::Stale { open: open.timestamp, received: timestamp });
            }
            _ => self.open.replace(FusedRecord::stamped_now(timestamp)),
        };

        let record = match self.open.as_mut() {
            Some(record) => {
                record.merge(fields);
                record.clone()
            }
            None => {
                let mut record = FusedRecord::stamped_now(timestamp);
                record.merge(fields);
                self.open = Some(record.clone());
                record
            }
        };

        Ok(Ingest { record, completed })
    }

    /// Close the open record (session end)
    pub fn finish(&mut self) -> Option<FusedRecord> {
        self.open.take()
    }

    pub fn open_record(&self) -> Option<&FusedRecord> {
        self.open.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(v: u64) -> DeviceTimestamp {
        DeviceTimestamp(v)
    }

    #[test]
    fn test_merge_never_replaces_present_with_missing() {
        let mut record = FusedRecord::new(ts(1), "2024-08-20 15:23:04");
        record.merge(&RawFields::new().with(Field::SensorA, 510.0));

        let update = RawFields::new()
            .with(Field::SensorA, f64::NAN)
            .with(Field::Mv1, 307.0);
        record.merge(&update);

        assert_eq!(record.get(Field::SensorA), Some(510.0));
        assert_eq!(record.get(Field::Mv1), Some(307.0));
    }

    #[test]
    fn test_merge_fills_missing_and_last_valid_wins() {
        let mut record = FusedRecord::new(ts(1), "t");
        assert_eq!(record.get(Field::SensorB), None);

        record.merge(&RawFields::new().with(Field::SensorB, 600.0));
        record.merge(&RawFields::new().with(Field::SensorB, 610.0));

        assert_eq!(record.get(Field::SensorB), Some(610.0));
    }

    #[test]
    fn test_merge_over_all_fields() {
        // Every combination of present/missing on both sides for each field
        for field in Field::ALL {
            for (old, new) in [(None, None), (Some(1.0), None), (None, Some(2.0)), (Some(1.0), Some(2.0))] {
                let mut record = FusedRecord::new(ts(1), "t");
                record.set(field, old);
                let mut update = RawFields::new();
                update.insert(field, new.unwrap_or(f64::NAN));
                record.merge(&update);

                let expected = new.or(old);
                assert_eq!(record.get(field), expected, "field {:?}", field);
            }
        }
    }

    #[test]
    fn test_fuser_creates_once_and_completes_on_new_timestamp() {
        let mut fuser = Fuser::new();

        let first = fuser.ingest(&RawFields::new().with(Field::SensorA, 500.0), ts(100)).unwrap();
        assert!(first.completed.is_none());
        let local_time = first.record.local_time.clone();

        let second = fuser.ingest(&RawFields::new().with(Field::SensorB, 560.0), ts(100)).unwrap();
        assert!(second.completed.is_none());
        assert_eq!(second.record.local_time, local_time);
        assert_eq!(second.record.sensors(), Some((500.0, 560.0)));

        let third = fuser.ingest(&RawFields::new(), ts(150)).unwrap();
        let completed = third.completed.unwrap();
        assert_eq!(completed.timestamp, ts(100));
        assert_eq!(completed.sensors(), Some((500.0, 560.0)));
        assert_eq!(third.record.timestamp, ts(150));
    }

    #[test]
    fn test_fuser_rejects_stale_timestamp() {
        let mut fuser = Fuser::new();
        fuser.ingest(&RawFields::new(), ts(200)).unwrap();

        let result = fuser.ingest(&RawFields::new().with(Field::SensorA, 1.0), ts(150));
        assert!(matches!(result, Err(FusionError::Stale { .. })));
        assert_eq!(fuser.open_record().unwrap().get(Field::SensorA), None);
    }

    #[test]
    fn test_raw_fields_from_named() {
        let raw = RawFields::from_named([("sensor_a", 512.0), ("nose_x", 80.0), ("bogus", 1.0)]);
        assert_eq!(raw.get(Field::SensorA), Some(512.0));
        assert_eq!(raw.get(Field::NoseX), Some(80.0));
        assert_eq!(raw.iter().count(), 2);
    }

    #[test]
    fn test_device_timestamp_parse() {
        assert_eq!("1650004".parse::<DeviceTimestamp>().unwrap(), ts(1_650_004));
        assert!("abc".parse::<DeviceTimestamp>().is_err());
        assert_eq!(ts(500).millis_since(ts(200)), 300);
        assert_eq!(ts(200).millis_since(ts(500)), 0);
    }
}
