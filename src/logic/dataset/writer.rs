//! Session Log Writer
//!
//! Every row is appended and flushed to the active window file as it arrives.
//! When the buffer fills (and at close) the window file is rewritten from the
//! buffer through a temp file + rename so late annotations land on disk.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::constants::FILE_STAMP_FORMAT;
use crate::logic::fusion::DeviceTimestamp;
use super::buffer::LogBuffer;
use super::record::LogRow;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum LogError {
    Io(io::Error),
    Csv(csv::Error),
    /// Windows still waiting for a successful write
    Pending(usize),
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::Io(e) => write!(f, "Session log IO error: {}", e),
            LogError::Csv(e) => write!(f, "Session log CSV error: {}", e),
            LogError::Pending(n) => write!(f, "{} log window(s) could not be written", n),
        }
    }
}

impl std::error::Error for LogError {}

impl From<io::Error> for LogError {
    fn from(e: io::Error) -> Self {
        LogError::Io(e)
    }
}

impl From<csv::Error> for LogError {
    fn from(e: csv::Error) -> Self {
        LogError::Csv(e)
    }
}

/// A window written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flushed {
    pub path: PathBuf,
    pub rows: usize,
}

struct ActiveWindow {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

/// Last rotated window, kept so feedback arriving just after rotation still lands
struct FlushedWindow {
    path: PathBuf,
    rows: Vec<LogRow>,
}

// ============================================================================
// SESSION LOG
// ============================================================================

pub struct SessionLog {
    folder: PathBuf,
    session_id: String,
    buffer: LogBuffer,
    active: Option<ActiveWindow>,
    previous: Option<FlushedWindow>,
    retry: Vec<FlushedWindow>,
    files: Vec<PathBuf>,
}

impl SessionLog {
    /// Create the session folder and an empty buffer
    pub fn open(folder: impl Into<PathBuf>, session_id: impl Into<String>, capacity: usize) -> Result<Self, LogError> {
        let folder = folder.into();
        fs::create_dir_all(&folder)?;
        Ok(Self {
            folder,
            session_id: session_id.into(),
            buffer: LogBuffer::new(capacity),
            active: None,
            previous: None,
            retry: Vec::new(),
            files: Vec::new(),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Window files written so far (in creation order)
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    /// Buffer a row, append it to the active window and rotate when full.
    ///
    /// The row is buffered even when the per-row write fails; it is then
    /// persisted by the rotation rewrite. A window written by that rotation
    /// is reported even if the append itself failed.
    pub fn append(&mut self, row: LogRow) -> Result<Option<Flushed>, LogError> {
        let write_result = self.write_row(&row);
        if let Err(e) = &write_result {
            log::error!("Failed to append row {}: {}", row.timestamp, e);
        }

        let full = self.buffer.push(row);
        let flushed = if full { self.rotate() } else { None };

        match (write_result, flushed) {
            (_, Some(flushed)) => Ok(Some(flushed)),
            (Err(e), None) => Err(e),
            (Ok(()), None) => Ok(None),
        }
    }

    fn write_row(&mut self, row: &LogRow) -> Result<(), LogError> {
        if self.active.is_none() {
            let path = self.next_window_path();
            self.active = Some(ActiveWindow { path, writer: None });
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if active.writer.is_none() {
            let file = OpenOptions::new().create(true).append(true).open(&active.path)?;
            active.writer = Some(csv::Writer::from_writer(file));
            log::debug!("Opened log window {:?}", active.path);
        }
        if let Some(writer) = active.writer.as_mut() {
            writer.serialize(row)?;
            writer.flush()?;
        }
        Ok(())
    }

    fn next_window_path(&self) -> PathBuf {
        let stamp = Local::now().format(FILE_STAMP_FORMAT).to_string();
        let mut path = self.folder.join(format!("data_{}_{}.csv", stamp, self.session_id));
        let mut n = 1;
        while path.exists() || self.files.contains(&path) || self.retry.iter().any(|w| w.path == path) {
            path = self.folder.join(format!("data_{}-{}_{}.csv", stamp, n, self.session_id));
            n += 1;
        }
        path
    }

    /// Rewrite the active window from the buffer and reset
    fn rotate(&mut self) -> Option<Flushed> {
        self.retry_pending();

        let rows = self.buffer.drain();
        let path = match self.active.take() {
            Some(active) => active.path,
            None => self.next_window_path(),
        };
        if rows.is_empty() {
            return None;
        }

        match write_window(&path, &rows) {
            Ok(()) => {
                log::info!("Flushed {} rows to {:?}", rows.len(), path);
                self.files.push(path.clone());
                let flushed = Flushed { path: path.clone(), rows: rows.len() };
                self.previous = Some(FlushedWindow { path, rows });
                Some(flushed)
            }
            Err(e) => {
                log::error!("Failed to write log window {:?}: {} (will retry)", path, e);
                self.retry.push(FlushedWindow { path, rows });
                None
            }
        }
    }

    fn retry_pending(&mut self) {
        let pending = std::mem::take(&mut self.retry);
        for window in pending {
            match write_window(&window.path, &window.rows) {
                Ok(()) => {
                    log::info!("Retried log window {:?} ({} rows)", window.path, window.rows.len());
                    self.files.push(window.path);
                }
                Err(e) => {
                    log::error!("Retry failed for {:?}: {}", window.path, e);
                    self.retry.push(window);
                }
            }
        }
    }

    /// Mutate the row logged for `ts`, if it is still buffered or in the
    /// window flushed last. Returns false when the row is out of reach.
    pub fn annotate<F>(&mut self, ts: DeviceTimestamp, f: F) -> bool
    where
        F: FnOnce(&mut LogRow),
    {
        if let Some(row) = self.buffer.find_mut(ts) {
            f(row);
            return true;
        }

        self.annotate_previous(|rows| rows.iter().rposition(|r| r.timestamp == ts), f)
    }

    /// Mutate the most recently logged row: the newest buffered one, else the
    /// last row of the window flushed last. Returns false when nothing is in reach.
    pub fn annotate_last<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut LogRow),
    {
        if let Some(row) = self.buffer.last_mut() {
            f(row);
            return true;
        }

        self.annotate_previous(|rows| rows.len().checked_sub(1), f)
    }

    /// Mutate one row of the window flushed last and rewrite its file
    fn annotate_previous<P, F>(&mut self, pick: P, f: F) -> bool
    where
        P: FnOnce(&[LogRow]) -> Option<usize>,
        F: FnOnce(&mut LogRow),
    {
        let Some(previous) = self.previous.as_mut() else {
            return false;
        };
        let Some(index) = pick(&previous.rows) else {
            return false;
        };
        f(&mut previous.rows[index]);
        if let Err(e) = write_window(&previous.path, &previous.rows) {
            log::error!("Failed to rewrite {:?} after annotation: {}", previous.path, e);
        }
        true
    }

    /// Flush the partial window and any windows awaiting retry
    pub fn close(&mut self) -> Result<Option<Flushed>, LogError> {
        let flushed = if self.buffer.is_empty() {
            self.active = None;
            self.retry_pending();
            None
        } else {
            self.rotate()
        };

        if !self.retry.is_empty() {
            return Err(LogError::Pending(self.retry.len()));
        }
        Ok(flushed)
    }

    // ========================================================================
    // CRASH RECOVERY
    // ========================================================================

    /// Cut torn trailing lines (no final newline) from the window files in
    /// `folder`. Returns the number of files repaired.
    pub fn recover(folder: &Path) -> Result<usize, LogError> {
        let mut repaired = 0;
        for entry in fs::read_dir(folder)? {
            let path = entry?.path();
            let is_window = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("data_") && n.ends_with(".csv"))
                .unwrap_or(false);
            if !is_window {
                continue;
            }

            let content = fs::read(&path)?;
            if content.is_empty() || content.ends_with(b"\n") {
                continue;
            }
            let keep = content.iter().rposition(|b| *b == b'\n').map(|i| i + 1).unwrap_or(0);
            log::warn!("Repairing torn line in {:?} ({} bytes dropped)", path, content.len() - keep);
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(keep as u64)?;
            repaired += 1;
        }
        Ok(repaired)
    }
}

/// Atomically (re)write a window file: temp file, flush, rename.
/// A missing session folder is created again.
pub fn write_window(path: &Path, rows: &[LogRow]) -> Result<(), LogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| LogError::Io(e.into_error()))?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every row of one window file
pub fn read_window(path: &Path) -> Result<Vec<LogRow>, LogError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<LogRow>() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!("Skipping malformed row in {:?}: {}", path, e),
        }
    }
    Ok(rows)
}
