//! Session Reconciler
//!
//! Offline pass over all window files of one session: merge user notes,
//! back-fill them, densify alarm windows, forward-fill the threshold column
//! and write one `integrated_data_<session>.csv`. Re-running on its own
//! output changes nothing.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::constants::LOCAL_TIME_FORMAT;
use super::record::{AlarmFlag, LogRow};
use super::writer::{read_window, write_window, LogError};

/// Rows before an annotated row that inherit its note
const NOTE_BACKFILL_ROWS: usize = 2;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum ReconcileError {
    Io(std::io::Error),
    Csv(csv::Error),
    Log(LogError),
    NoWindows(String),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Io(e) => write!(f, "Reconcile IO error: {}", e),
            ReconcileError::Csv(e) => write!(f, "Reconcile CSV error: {}", e),
            ReconcileError::Log(e) => write!(f, "Reconcile log error: {}", e),
            ReconcileError::NoWindows(session) => write!(f, "No log windows for session {}", session),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<std::io::Error> for ReconcileError {
    fn from(e: std::io::Error) -> Self {
        ReconcileError::Io(e)
    }
}

impl From<csv::Error> for ReconcileError {
    fn from(e: csv::Error) -> Self {
        ReconcileError::Csv(e)
    }
}

impl From<LogError> for ReconcileError {
    fn from(e: LogError) -> Self {
        ReconcileError::Log(e)
    }
}

// ============================================================================
// ANNOTATIONS
// ============================================================================

/// One user note (`notes_<session>_all.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(alias = "Time")]
    pub local_time: String,
    #[serde(alias = "Sensor 2")]
    pub sensor_a: Option<f64>,
    #[serde(alias = "Sensor 4")]
    pub sensor_b: Option<f64>,
    #[serde(alias = "Notes")]
    pub notes: String,
}

pub fn read_annotations(path: &Path) -> Result<Vec<Annotation>, ReconcileError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut annotations = Vec::new();
    for annotation in reader.deserialize::<Annotation>() {
        annotations.push(annotation?);
    }
    Ok(annotations)
}

/// Join key; a missing sensor value never matches
fn join_key(local_time: &str, a: Option<f64>, b: Option<f64>) -> Option<(String, u64, u64)> {
    let a = a.filter(|v| v.is_finite())?;
    let b = b.filter(|v| v.is_finite())?;
    Some((local_time.to_string(), a.to_bits(), b.to_bits()))
}

// ============================================================================
// STEPS
// ============================================================================

fn dedupe(rows: Vec<LogRow>) -> Vec<LogRow> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| match row.to_fields() {
            Ok(fields) => seen.insert(fields),
            Err(_) => true,
        })
        .collect()
}

/// Left-merge notes; returns indices of matched rows
fn merge_annotations(rows: &mut [LogRow], annotations: &[Annotation]) -> Vec<usize> {
    let mut notes: HashMap<(String, u64, u64), &str> = HashMap::new();
    for annotation in annotations {
        if let Some(key) = join_key(&annotation.local_time, annotation.sensor_a, annotation.sensor_b) {
            notes.entry(key).or_insert(annotation.notes.as_str());
        }
    }

    let mut matched = Vec::new();
    for (i, row) in rows.iter_mut().enumerate() {
        let Some(key) = join_key(&row.local_time, row.sensor_a, row.sensor_b) else {
            continue;
        };
        if let Some(note) = notes.get(&key) {
            row.notes = Some(note.to_string());
            matched.push(i);
        }
    }
    matched
}

fn backfill_notes(rows: &mut [LogRow], matched: &[usize]) {
    let matched_set: HashSet<usize> = matched.iter().copied().collect();
    for &i in matched {
        let note = rows[i].notes.clone();
        for j in i.saturating_sub(NOTE_BACKFILL_ROWS)..i {
            if !matched_set.contains(&j) {
                rows[j].notes = note.clone();
            }
        }
    }
}

/// Local times `t - interval ..= t`, one per second
fn window_times(local_time: &str, interval_secs: u64) -> Option<HashSet<String>> {
    let end = NaiveDateTime::parse_from_str(local_time, LOCAL_TIME_FORMAT).ok()?;
    Some(
        (0..=interval_secs as i64)
            .map(|s| (end - Duration::seconds(s)).format(LOCAL_TIME_FORMAT).to_string())
            .collect(),
    )
}

fn densify_alarms(rows: &mut [LogRow]) {
    // Source = last row of a run of flagged rows sharing (interval, feedback)
    let mut sources = Vec::new();
    for i in 0..rows.len() {
        let row = &rows[i];
        if !row.is_alarm() || row.notification_interval.is_none() {
            continue;
        }
        let continues = rows.get(i + 1).map_or(false, |next| {
            next.is_alarm()
                && next.notification_interval == row.notification_interval
                && next.feedback == row.feedback
        });
        if !continues {
            sources.push(i);
        }
    }

    for i in sources {
        let (local_time, interval, feedback) = {
            let source = &rows[i];
            (source.local_time.clone(), source.notification_interval, source.feedback)
        };
        let Some(secs) = interval else { continue };
        let Some(times) = window_times(&local_time, secs) else {
            log::warn!("Unparseable local time '{}' on alarm row", local_time);
            continue;
        };
        for row in rows.iter_mut().filter(|r| times.contains(&r.local_time)) {
            row.alarm_notification = AlarmFlag::Yes;
            row.notification_interval = interval;
            row.feedback = feedback;
        }
    }
}

fn fill_thresholds(rows: &mut [LogRow]) {
    let Some(first) = rows.iter().find_map(|r| r.model_threshold) else {
        return;
    };
    let mut current = first;
    for row in rows.iter_mut() {
        match row.model_threshold {
            Some(value) => current = value,
            None => row.model_threshold = Some(current),
        }
    }
}

/// Reconcile in memory
pub fn reconcile_rows(mut rows: Vec<LogRow>, annotations: &[Annotation]) -> Vec<LogRow> {
    rows.sort_by_key(|r| r.timestamp);
    let mut rows = dedupe(rows);

    let matched = merge_annotations(&mut rows, annotations);
    backfill_notes(&mut rows, &matched);
    densify_alarms(&mut rows);
    fill_thresholds(&mut rows);

    dedupe(rows)
}

// ============================================================================
// FILES
// ============================================================================

/// Window files of a session, in name (creation) order
pub fn session_windows(folder: &Path, session_id: &str) -> Result<Vec<PathBuf>, ReconcileError> {
    let suffix = format!("_{}.csv", session_id);
    let mut windows: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("data_") && n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .collect();
    windows.sort();
    Ok(windows)
}

pub fn integrated_path(folder: &Path, session_id: &str) -> PathBuf {
    folder.join(format!("integrated_data_{}.csv", session_id))
}

pub fn annotations_path(folder: &Path, session_id: &str) -> PathBuf {
    folder.join(format!("notes_{}_all.csv", session_id))
}

/// Reconcile every window of a session into `integrated_data_<session>.csv`
pub fn reconcile_session(folder: &Path, session_id: &str) -> Result<PathBuf, ReconcileError> {
    let windows = session_windows(folder, session_id)?;
    if windows.is_empty() {
        return Err(ReconcileError::NoWindows(session_id.to_string()));
    }

    let mut rows = Vec::new();
    for window in &windows {
        rows.extend(read_window(window)?);
    }

    let notes_path = annotations_path(folder, session_id);
    let annotations = if notes_path.exists() {
        read_annotations(&notes_path)?
    } else {
        Vec::new()
    };

    let total = rows.len();
    let reconciled = reconcile_rows(rows, &annotations);

    let output = integrated_path(folder, session_id);
    write_window(&output, &reconciled)?;
    log::info!(
        "Reconciled {} windows ({} rows → {}) into {:?}",
        windows.len(),
        total,
        reconciled.len(),
        output
    );
    Ok(output)
}
