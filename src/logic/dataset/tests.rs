use super::reconcile::{annotations_path, integrated_path, reconcile_rows, reconcile_session, Annotation};
use super::record::{AlarmFlag, LogRow};
use super::writer::{read_window, LogError, SessionLog};
use crate::logic::fusion::DeviceTimestamp;
use std::fs;
use tempfile::tempdir;

fn row(ts: u64, local_time: &str, a: f64, b: f64) -> LogRow {
    let mut row = LogRow::new(DeviceTimestamp(ts), local_time, 1);
    row.sensor_a = Some(a);
    row.sensor_b = Some(b);
    row
}

/// One row per second from 12:00:00
fn seconds(n: u64) -> Vec<LogRow> {
    (0..n)
        .map(|s| row(1_000 + s * 1_000, &format!("2024-08-20 12:00:{:02}", s), 500.0 + s as f64, 560.0))
        .collect()
}

fn annotation(local_time: &str, a: Option<f64>, b: Option<f64>, notes: &str) -> Annotation {
    Annotation {
        local_time: local_time.to_string(),
        sensor_a: a,
        sensor_b: b,
        notes: notes.to_string(),
    }
}

// ============================================================================
// SESSION LOG
// ============================================================================

#[test]
fn test_rotation_at_capacity() {
    let dir = tempdir().unwrap();
    let mut log = SessionLog::open(dir.path().join("session_s1"), "s1", 3).unwrap();

    assert!(log.append(row(1, "t", 500.0, 560.0)).unwrap().is_none());
    assert!(log.append(row(2, "t", 500.0, 560.0)).unwrap().is_none());
    let flushed = log.append(row(3, "t", 500.0, 560.0)).unwrap().unwrap();

    assert_eq!(flushed.rows, 3);
    assert_eq!(log.buffered(), 0);
    assert_eq!(log.files().len(), 1);

    let name = flushed.path.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("data_") && name.ends_with("_s1.csv"));

    let stored: Vec<u64> = read_window(&flushed.path).unwrap().iter().map(|r| r.timestamp.0).collect();
    assert_eq!(stored, vec![1, 2, 3]);
}

#[test]
fn test_rotation_at_capacity_plus_one() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("session_s2");
    let mut log = SessionLog::open(&folder, "s2", 3).unwrap();

    for ts in 1..=4 {
        log.append(row(ts, "t", 500.0, 560.0)).unwrap();
    }
    assert_eq!(log.files().len(), 1);
    assert_eq!(log.buffered(), 1);

    // Row 4 is already durable in the next window file
    let windows: Vec<_> = fs::read_dir(&folder).unwrap().collect();
    assert_eq!(windows.len(), 2);

    let tail = log.close().unwrap().unwrap();
    assert_eq!(tail.rows, 1);
    assert_eq!(read_window(&tail.path).unwrap()[0].timestamp, DeviceTimestamp(4));
}

#[test]
fn test_late_annotation_reaches_disk() {
    let dir = tempdir().unwrap();
    let mut log = SessionLog::open(dir.path(), "s3", 2).unwrap();

    log.append(row(1, "t", 500.0, 560.0)).unwrap();
    assert!(log.annotate(DeviceTimestamp(1), |r| r.feedback = Some(0)));
    let flushed = log.append(row(2, "t", 500.0, 560.0)).unwrap().unwrap();
    assert_eq!(read_window(&flushed.path).unwrap()[0].feedback, Some(0));

    // Feedback for a row in the window just flushed is still applied
    assert!(log.annotate(DeviceTimestamp(2), |r| r.feedback = Some(1)));
    assert_eq!(read_window(&flushed.path).unwrap()[1].feedback, Some(1));
    assert!(!log.annotate(DeviceTimestamp(99), |r| r.feedback = Some(1)));
}

#[test]
fn test_failed_rotation_is_retried() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("session_s4");
    let mut log = SessionLog::open(&folder, "s4", 2).unwrap();

    log.append(row(1, "t", 500.0, 560.0)).unwrap();
    fs::remove_dir_all(&folder).unwrap();
    fs::write(&folder, "").unwrap();

    // The open handle still accepts the row; the rotation rewrite fails
    assert!(log.append(row(2, "t", 500.0, 560.0)).unwrap().is_none());
    assert_eq!(log.pending_retries(), 1);
    assert!(log.files().is_empty());

    fs::remove_file(&folder).unwrap();
    fs::create_dir_all(&folder).unwrap();
    log.append(row(3, "t", 500.0, 560.0)).unwrap();
    log.append(row(4, "t", 500.0, 560.0)).unwrap();

    assert_eq!(log.pending_retries(), 0);
    assert_eq!(log.files().len(), 2);
    let first: Vec<u64> = read_window(&log.files()[0]).unwrap().iter().map(|r| r.timestamp.0).collect();
    assert_eq!(first, vec![1, 2]);
}

#[test]
fn test_flush_reported_when_append_fails() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("session_s5");
    let mut log = SessionLog::open(&folder, "s5", 1).unwrap();
    fs::remove_dir_all(&folder).unwrap();

    // Opening the window file fails, the rotation rewrite recreates the folder
    let flushed = log.append(row(1, "t", 500.0, 560.0)).unwrap().unwrap();
    assert_eq!(flushed.rows, 1);
    assert_eq!(log.files(), &[flushed.path.clone()]);
    assert_eq!(read_window(&flushed.path).unwrap()[0].timestamp, DeviceTimestamp(1));
}

#[test]
fn test_close_can_be_retried() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("session_s6");
    let mut log = SessionLog::open(&folder, "s6", 10).unwrap();

    log.append(row(1, "t", 500.0, 560.0)).unwrap();
    log.append(row(2, "t", 500.0, 560.0)).unwrap();
    fs::remove_dir_all(&folder).unwrap();
    fs::write(&folder, "").unwrap();

    assert!(matches!(log.close(), Err(LogError::Pending(1))));
    assert!(log.files().is_empty());

    fs::remove_file(&folder).unwrap();
    log.close().unwrap();
    assert_eq!(log.pending_retries(), 0);
    let stamps: Vec<u64> = read_window(&log.files()[0]).unwrap().iter().map(|r| r.timestamp.0).collect();
    assert_eq!(stamps, vec![1, 2]);
}

#[test]
fn test_annotate_last_reaches_flushed_window() {
    let dir = tempdir().unwrap();
    let mut log = SessionLog::open(dir.path(), "s7", 1).unwrap();
    assert!(!log.annotate_last(|r| r.model_notes = Some("early".to_string())));

    let flushed = log.append(row(1, "t", 500.0, 560.0)).unwrap().unwrap();
    assert_eq!(log.buffered(), 0);
    assert!(log.annotate_last(|r| r.model_threshold = Some(60.0)));
    assert_eq!(read_window(&flushed.path).unwrap()[0].model_threshold, Some(60.0));
}

#[test]
fn test_recover_torn_line() {
    let dir = tempdir().unwrap();
    let mut log = SessionLog::open(dir.path(), "s5", 10).unwrap();
    log.append(row(1, "2024-08-20 12:00:00", 500.0, 560.0)).unwrap();
    drop(log);

    let path = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
    let mut content = fs::read_to_string(&path).unwrap();
    content.push_str("2,2024-08-20 12:00:01,50");
    fs::write(&path, content).unwrap();

    assert_eq!(SessionLog::recover(dir.path()).unwrap(), 1);
    assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    assert_eq!(read_window(&path).unwrap().len(), 1);
    assert_eq!(SessionLog::recover(dir.path()).unwrap(), 0);
}

// ============================================================================
// RECONCILER
// ============================================================================

#[test]
fn test_alarm_densification_five_seconds() {
    let mut rows = seconds(11);
    rows[7].alarm_notification = AlarmFlag::Yes;
    rows[7].notification_interval = Some(5);
    rows[7].feedback = Some(0);

    let out = reconcile_rows(rows, &[]);

    for (i, r) in out.iter().enumerate() {
        let in_window = (2..=7).contains(&i);
        assert_eq!(r.is_alarm(), in_window, "row {}", i);
        if in_window {
            assert_eq!(r.notification_interval, Some(5));
            assert_eq!(r.feedback, Some(0));
        }
    }
}

#[test]
fn test_notes_merge_and_backfill() {
    let rows = seconds(6);
    let notes = vec![
        annotation("2024-08-20 12:00:03", Some(503.0), Some(560.0), "leaning"),
        annotation("2024-08-20 12:00:03", Some(503.0), Some(560.0), "ignored duplicate"),
        annotation("2024-08-20 12:00:05", None, Some(560.0), "no key"),
    ];

    let out = reconcile_rows(rows, &notes);
    let got: Vec<Option<&str>> = out.iter().map(|r| r.notes.as_deref()).collect();
    assert_eq!(got, vec![None, Some("leaning"), Some("leaning"), Some("leaning"), None, None]);
}

#[test]
fn test_backfill_skips_matched_rows() {
    let rows = seconds(6);
    let notes = vec![
        annotation("2024-08-20 12:00:03", Some(503.0), Some(560.0), "first"),
        annotation("2024-08-20 12:00:04", Some(504.0), Some(560.0), "second"),
    ];

    let out = reconcile_rows(rows, &notes);
    let got: Vec<Option<&str>> = out.iter().map(|r| r.notes.as_deref()).collect();
    assert_eq!(got, vec![None, Some("first"), Some("second"), Some("first"), Some("second"), None]);
}

#[test]
fn test_threshold_forward_fill() {
    let mut rows = seconds(6);
    rows[2].model_threshold = Some(80.0);
    rows[4].model_threshold = Some(90.0);

    let out = reconcile_rows(rows, &[]);
    let got: Vec<Option<f64>> = out.iter().map(|r| r.model_threshold).collect();
    assert_eq!(got, vec![Some(80.0), Some(80.0), Some(80.0), Some(80.0), Some(90.0), Some(90.0)]);
}

#[test]
fn test_sort_and_duplicate_removal() {
    let mut rows = seconds(3);
    rows.push(rows[1].clone());
    rows.reverse();

    let out = reconcile_rows(rows, &[]);
    let ts: Vec<u64> = out.iter().map(|r| r.timestamp.0).collect();
    assert_eq!(ts, vec![1_000, 2_000, 3_000]);
}

#[test]
fn test_reconcile_is_idempotent() {
    let mut rows = seconds(20);
    rows.push(rows[4].clone());
    rows[3].model_threshold = Some(80.0);
    rows[15].model_threshold = Some(90.0);
    rows[12].alarm_notification = AlarmFlag::Yes;
    rows[12].notification_interval = Some(4);
    rows[12].feedback = Some(1);
    let notes = vec![annotation("2024-08-20 12:00:09", Some(509.0), Some(560.0), "stretching")];

    let once = reconcile_rows(rows, &notes);
    let twice = reconcile_rows(once.clone(), &notes);
    assert_eq!(once, twice);
    assert_eq!(once.len(), 20);
}

#[test]
fn test_reconcile_session_files() {
    let dir = tempdir().unwrap();
    let folder = dir.path().join("session_20240820120000");
    let session = "20240820120000";
    let mut log = SessionLog::open(&folder, session, 4).unwrap();
    for r in seconds(10) {
        log.append(r).unwrap();
    }
    log.close().unwrap();
    assert_eq!(log.files().len(), 3);

    fs::write(
        annotations_path(&folder, session),
        "Time,Sensor 2,Sensor 4,Notes\n2024-08-20 12:00:06,506,560,phone call\n",
    )
    .unwrap();

    let output = reconcile_session(&folder, session).unwrap();
    assert_eq!(output, integrated_path(&folder, session));

    let merged = read_window(&output).unwrap();
    assert_eq!(merged.len(), 10);
    assert_eq!(merged[4].notes.as_deref(), Some("phone call"));
    assert_eq!(merged[6].notes.as_deref(), Some("phone call"));
    assert_eq!(merged[7].notes, None);

    // Output is a fixed point
    let again = reconcile_rows(merged.clone(), &[annotation("2024-08-20 12:00:06", Some(506.0), Some(560.0), "phone call")]);
    assert_eq!(again, merged);

    // The integrated file itself is not picked up as a window
    let second = reconcile_session(&folder, session).unwrap();
    assert_eq!(read_window(&second).unwrap(), merged);
}
