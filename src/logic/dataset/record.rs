//! Log Row - fixed CSV schema of the session log
//!
//! Column order is significant. Missing values are written as `NaN`,
//! never as an empty field.

use serde::{Deserialize, Serialize};

use crate::logic::fusion::{DeviceTimestamp, Field, FusedRecord};

/// Header row, in order
pub const LOG_COLUMNS: &[&str] = &[
    "timestamp", "local_time",
    "sensor_a", "sensor_b",
    "bbox_x1", "bbox_y1", "bbox_x2", "bbox_y2",
    "mv_1", "mv_2", "mv_3", "mv_4",
    "left_eye_x", "left_eye_y", "right_eye_x", "right_eye_y",
    "nose_x", "nose_y",
    "mouth_left_x", "mouth_left_y", "mouth_right_x", "mouth_right_y",
    "fhp",
    "prediction", "notes", "user_id",
    "alarm_notification", "notification_interval", "feedback",
    "model_threshold", "model_notes",
];

/// `Option<T>` ⇄ `T` or the `NaN` marker
pub(crate) mod missing {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::constants::MISSING_MARKER;

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_str(MISSING_MARKER),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(MISSING_MARKER) {
            return Ok(None);
        }
        trimmed.parse::<T>().map(Some).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmFlag {
    Yes,
    #[default]
    No,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
    pub timestamp: DeviceTimestamp,
    pub local_time: String,
    #[serde(with = "missing")] pub sensor_a: Option<f64>,
    #[serde(with = "missing")] pub sensor_b: Option<f64>,
    #[serde(with = "missing")] pub bbox_x1: Option<f64>,
    #[serde(with = "missing")] pub bbox_y1: Option<f64>,
    #[serde(with = "missing")] pub bbox_x2: Option<f64>,
    #[serde(with = "missing")] pub bbox_y2: Option<f64>,
    #[serde(with = "missing")] pub mv_1: Option<f64>,
    #[serde(with = "missing")] pub mv_2: Option<f64>,
    #[serde(with = "missing")] pub mv_3: Option<f64>,
    #[serde(with = "missing")] pub mv_4: Option<f64>,
    #[serde(with = "missing")] pub left_eye_x: Option<f64>,
    #[serde(with = "missing")] pub left_eye_y: Option<f64>,
    #[serde(with = "missing")] pub right_eye_x: Option<f64>,
    #[serde(with = "missing")] pub right_eye_y: Option<f64>,
    #[serde(with = "missing")] pub nose_x: Option<f64>,
    #[serde(with = "missing")] pub nose_y: Option<f64>,
    #[serde(with = "missing")] pub mouth_left_x: Option<f64>,
    #[serde(with = "missing")] pub mouth_left_y: Option<f64>,
    #[serde(with = "missing")] pub mouth_right_x: Option<f64>,
    #[serde(with = "missing")] pub mouth_right_y: Option<f64>,
    #[serde(with = "missing")] pub fhp: Option<f64>,
    /// 1 abnormal, 0 normal
    #[serde(with = "missing")] pub prediction: Option<u8>,
    #[serde(with = "missing")] pub notes: Option<String>,
    pub user_id: i64,
    #[serde(default)]
    pub alarm_notification: AlarmFlag,
    /// Alert window in seconds
    #[serde(with = "missing")] pub notification_interval: Option<u64>,
    /// 1 correct, 0 incorrect
    #[serde(with = "missing")] pub feedback: Option<u8>,
    #[serde(with = "missing")] pub model_threshold: Option<f64>,
    #[serde(with = "missing")] pub model_notes: Option<String>,
}

impl LogRow {
    /// Empty row (all device fields missing)
    pub fn new(timestamp: DeviceTimestamp, local_time: impl Into<String>, user_id: i64) -> Self {
        Self {
            timestamp,
            local_time: local_time.into(),
            sensor_a: None,
            sensor_b: None,
            bbox_x1: None,
            bbox_y1: None,
            bbox_x2: None,
            bbox_y2: None,
            mv_1: None,
            mv_2: None,
            mv_3: None,
            mv_4: None,
            left_eye_x: None,
            left_eye_y: None,
            right_eye_x: None,
            right_eye_y: None,
            nose_x: None,
            nose_y: None,
            mouth_left_x: None,
            mouth_left_y: None,
            mouth_right_x: None,
            mouth_right_y: None,
            fhp: None,
            prediction: None,
            notes: None,
            user_id,
            alarm_notification: AlarmFlag::No,
            notification_interval: None,
            feedback: None,
            model_threshold: None,
            model_notes: None,
        }
    }

    /// Copy every device field of a fused record
    pub fn from_record(record: &FusedRecord, user_id: i64) -> Self {
        let mut row = Self::new(record.timestamp, record.local_time.clone(), user_id);
        for field in Field::ALL {
            *row.field_mut(field) = record.get(field);
        }
        row
    }

    pub fn field(&self, field: Field) -> Option<f64> {
        match field {
            Field::SensorA => self.sensor_a,
            Field::SensorB => self.sensor_b,
            Field::BboxX1 => self.bbox_x1,
            Field::BboxY1 => self.bbox_y1,
            Field::BboxX2 => self.bbox_x2,
            Field::BboxY2 => self.bbox_y2,
            Field::Mv1 => self.mv_1,
            Field::Mv2 => self.mv_2,
            Field::Mv3 => self.mv_3,
            Field::Mv4 => self.mv_4,
            Field::LeftEyeX => self.left_eye_x,
            Field::LeftEyeY => self.left_eye_y,
            Field::RightEyeX => self.right_eye_x,
            Field::RightEyeY => self.right_eye_y,
            Field::NoseX => self.nose_x,
            Field::NoseY => self.nose_y,
            Field::MouthLeftX => self.mouth_left_x,
            Field::MouthLeftY => self.mouth_left_y,
            Field::MouthRightX => self.mouth_right_x,
            Field::MouthRightY => self.mouth_right_y,
            Field::Fhp => self.fhp,
        }
    }

    fn field_mut(&mut self, field: Field) -> &mut Option<f64> {
        match field {
            Field::SensorA => &mut self.sensor_a,
            Field::SensorB => &mut self.sensor_b,
            Field::BboxX1 => &mut self.bbox_x1,
            Field::BboxY1 => &mut self.bbox_y1,
            Field::BboxX2 => &mut self.bbox_x2,
            Field::BboxY2 => &mut self.bbox_y2,
            Field::Mv1 => &mut self.mv_1,
            Field::Mv2 => &mut self.mv_2,
            Field::Mv3 => &mut self.mv_3,
            Field::Mv4 => &mut self.mv_4,
            Field::LeftEyeX => &mut self.left_eye_x,
            Field::LeftEyeY => &mut self.left_eye_y,
            Field::RightEyeX => &mut self.right_eye_x,
            Field::RightEyeY => &mut self.right_eye_y,
            Field::NoseX => &mut self.nose_x,
            Field::NoseY => &mut self.nose_y,
            Field::MouthLeftX => &mut self.mouth_left_x,
            Field::MouthLeftY => &mut self.mouth_left_y,
            Field::MouthRightX => &mut self.mouth_right_x,
            Field::MouthRightY => &mut self.mouth_right_y,
            Field::Fhp => &mut self.fhp,
        }
    }

    pub fn set_field(&mut self, field: Field, value: Option<f64>) {
        *self.field_mut(field) = value.filter(|v| v.is_finite());
    }

    pub fn is_alarm(&self) -> bool {
        self.alarm_notification == AlarmFlag::Yes
    }

    /// Rendered CSV fields; exact-duplicate detection compares these
    pub fn to_fields(&self) -> Result<Vec<String>, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.serialize(self)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(bytes.as_slice());
        let mut record = csv::StringRecord::new();
        reader.read_record(&mut record)?;
        Ok(record.iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::fusion::RawFields;

    #[test]
    fn test_header_matches_columns() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(LogRow::new(DeviceTimestamp(1), "2024-08-20 15:23:04", -1)).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, LOG_COLUMNS.join(","));
    }

    #[test]
    fn test_missing_written_as_marker_and_read_back() {
        let mut record = FusedRecord::new(DeviceTimestamp(1650004), "2024-08-20 15:23:04");
        record.merge(&RawFields::new().with(Field::SensorA, 512.0).with(Field::Fhp, 37.5));

        let mut row = LogRow::from_record(&record, 3);
        row.prediction = Some(1);
        row.notes = Some("slouching, leaning".into());

        let fields = row.to_fields().unwrap();
        assert_eq!(fields.len(), LOG_COLUMNS.len());
        assert_eq!(fields[0], "1650004");
        assert_eq!(fields[2], "512");
        assert_eq!(fields[3], "NaN");
        assert_eq!(fields[22], "37.5");
        assert_eq!(fields[23], "1");
        assert_eq!(fields[24], "slouching, leaning");
        assert_eq!(fields[26], "no");
        assert!(fields.iter().all(|f| !f.is_empty()));

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(&row).unwrap();
        let bytes = writer.into_inner().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let parsed: LogRow = reader.deserialize().next().unwrap().unwrap();
        assert_eq!(parsed, row);
    }
}
