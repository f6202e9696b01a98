//! Monitoring Session
//!
//! Identity (local start stamp), log folder, and the running totals shown in
//! the end-of-session summary.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::constants::FILE_STAMP_FORMAT;

pub struct Session {
    id: String,
    folder: PathBuf,
    profile_id: i64,
    started_at: DateTime<Local>,
    started: Instant,
    alarm_ms: u64,
    alarm_count: u32,
    samples: u64,
}

/// End-of-session totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub profile_id: i64,
    pub started_at: String,
    pub elapsed: String,
    pub cumulative_alarm_time: String,
    pub alarm_count: u32,
    pub samples: u64,
    pub files: Vec<PathBuf>,
}

impl Session {
    /// New session under `logs_dir/session_<stamp>`
    pub fn start(logs_dir: &Path, profile_id: i64) -> Self {
        let started_at = Local::now();
        let id = started_at.format(FILE_STAMP_FORMAT).to_string();
        Self::with_id(logs_dir, id, profile_id)
    }

    pub fn with_id(logs_dir: &Path, id: impl Into<String>, profile_id: i64) -> Self {
        let id = id.into();
        let folder = logs_dir.join(format!("session_{}", id));
        Self {
            id,
            folder,
            profile_id,
            started_at: Local::now(),
            started: Instant::now(),
            alarm_ms: 0,
            alarm_count: 0,
            samples: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn profile_id(&self) -> i64 {
        self.profile_id
    }

    pub fn alarm_ms(&self) -> u64 {
        self.alarm_ms
    }

    pub fn alarm_count(&self) -> u32 {
        self.alarm_count
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub(crate) fn record_sample(&mut self, contributed_ms: u64, alarmed: bool) {
        self.samples += 1;
        self.alarm_ms += contributed_ms;
        if alarmed {
            self.alarm_count += 1;
        }
    }

    pub fn summary(&self, files: Vec<PathBuf>) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            profile_id: self.profile_id,
            started_at: self.started_at.format(crate::constants::LOCAL_TIME_FORMAT).to_string(),
            elapsed: format_duration(self.started.elapsed()),
            cumulative_alarm_time: format_duration(Duration::from_millis(self.alarm_ms)),
            alarm_count: self.alarm_count,
            samples: self.samples,
            files,
        }
    }
}

/// `HH:MM:SS:mmm`
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!("{:02}:{:02}:{:02}:{:03}", hours, minutes, seconds, millis)
}
