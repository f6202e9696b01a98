//! Firmware Line Parser
//!
//! Turns raw serial log lines into (device timestamp, partial fields) pairs.
//! Lines without their own `I (<ms>)` prefix belong to the last seen timestamp.

use regex::Regex;

use super::record::{DeviceTimestamp, Field, RawFields};
use super::FusionError;

const ANSI_PATTERN: &str = r"\x1B\[[0-9;]*[A-Za-z]";
const TIMESTAMP_PATTERN: &str = r"I \((\d+)\)";
const RANGE_PATTERN: &str = r"Range: (\d+)\s+(\d+),";
const BBOX_PATTERN: &str = r"detection_result:\s*\[\s*\d+\]:\s*\(\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+)\)";
const FACE_PATTERN: &str = concat!(
    r"left eye: \(\s*(\d+),\s*(\d+)\), right eye: \(\s*(\d+),\s*(\d+)\), ",
    r"nose: \(\s*(\d+),\s*(\d+)\), mouth left: \(\s*(\d+),\s*(\d+)\), ",
    r"mouth right: \(\s*(\d+),\s*(\d+)\)"
);
const MV_PATTERN: &str = r"MV: (\d+), (\d+), (\d+), (\d+)";
const FHP_PATTERN: &str = r"FHP detected.*?(\d+), mm";

/// One parsed firmware line
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub timestamp: DeviceTimestamp,
    pub fields: RawFields,
}

/// Stateful parser (remembers the last timestamp)
#[derive(Debug)]
pub struct LineParser {
    ansi: Regex,
    timestamp: Regex,
    range: Regex,
    bbox: Regex,
    face: Regex,
    mv: Regex,
    fhp: Regex,
    last_timestamp: Option<DeviceTimestamp>,
}

fn compile(pattern: &str) -> Result<Regex, FusionError> {
    Regex::new(pattern).map_err(|e| FusionError::Pattern(e.to_string()))
}

impl LineParser {
    pub fn new() -> Result<Self, FusionError> {
        Ok(Self {
            ansi: compile(ANSI_PATTERN)?,
            timestamp: compile(TIMESTAMP_PATTERN)?,
            range: compile(RANGE_PATTERN)?,
            bbox: compile(BBOX_PATTERN)?,
            face: compile(FACE_PATTERN)?,
            mv: compile(MV_PATTERN)?,
            fhp: compile(FHP_PATTERN)?,
            last_timestamp: None,
        })
    }

    pub fn last_timestamp(&self) -> Option<DeviceTimestamp> {
        self.last_timestamp
    }

    /// Parse one line. Returns `None` until the first timestamp has been seen.
    pub fn parse(&mut self, line: &str) -> Option<ParsedLine> {
        let clean = self.ansi.replace_all(line, "");

        if let Some(caps) = self.timestamp.captures(&clean) {
            match caps[1].parse::<DeviceTimestamp>() {
                Ok(ts) => self.last_timestamp = Some(ts),
                Err(e) => {
                    log::warn!("Malformed device timestamp '{}': {}", &caps[1], e);
                    return None;
                }
            }
        }

        let timestamp = self.last_timestamp?;
        let mut fields = RawFields::new();

        self.capture_into(&self.range, &clean, &[Field::SensorA, Field::SensorB], &mut fields);
        self.capture_into(&self.bbox, &clean, &Field::BBOX, &mut fields);
        self.capture_into(&self.face, &clean, &Field::LANDMARKS, &mut fields);
        self.capture_into(&self.mv, &clean, &[Field::Mv1, Field::Mv2, Field::Mv3, Field::Mv4], &mut fields);
        self.capture_into(&self.fhp, &clean, &[Field::Fhp], &mut fields);

        Some(ParsedLine { timestamp, fields })
    }

    fn capture_into(&self, pattern: &Regex, line: &str, targets: &[Field], fields: &mut RawFields) {
        let Some(caps) = pattern.captures(line) else {
            return;
        };
        for (i, field) in targets.iter().enumerate() {
            if let Some(value) = caps.get(i + 1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                fields.insert(*field, value);
            }
        }
    }
}
