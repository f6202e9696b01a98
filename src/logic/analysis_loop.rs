//! Ingestion worker
//!
//! Polls a `DeviceSource` and feeds every line into the monitor. Sleeps
//! `poll_interval_ms` when the source has nothing, stops on the stop flag or
//! when the source closes.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::logic::monitor::{Monitor, MonitorError};

/// One poll of a device
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    Line(String),
    /// Nothing available right now
    Idle,
    /// Device gone or capture exhausted
    Closed,
}

pub trait DeviceSource: Send {
    fn poll(&mut self) -> Poll;
}

/// Replays a recorded firmware capture line by line
pub struct ReplaySource<R: BufRead + Send> {
    lines: io::Lines<R>,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead + Send> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines() }
    }
}

impl<R: BufRead + Send> DeviceSource for ReplaySource<R> {
    fn poll(&mut self) -> Poll {
        match self.lines.next() {
            Some(Ok(line)) => Poll::Line(line),
            Some(Err(e)) => {
                log::warn!("Capture read failed: {}", e);
                Poll::Closed
            }
            None => Poll::Closed,
        }
    }
}

/// Lines pushed by a reader thread (live serial port)
pub struct ChannelSource {
    receiver: Receiver<String>,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<String>) -> Self {
        Self { receiver }
    }
}

impl DeviceSource for ChannelSource {
    fn poll(&mut self) -> Poll {
        match self.receiver.try_recv() {
            Ok(line) => Poll::Line(line),
            Err(TryRecvError::Empty) => Poll::Idle,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }
}

/// Start the worker. The handle yields the number of lines consumed.
pub fn spawn<S>(monitor: Arc<Monitor>, mut source: S, stop: Arc<AtomicBool>) -> JoinHandle<u64>
where
    S: DeviceSource + 'static,
{
    let poll_interval = Duration::from_millis(monitor.poll_interval_ms());

    thread::spawn(move || {
        log::info!("Ingestion loop started (session {})", monitor.session_id());
        let mut consumed = 0u64;

        while !stop.load(Ordering::Relaxed) {
            let line = match source.poll() {
                Poll::Line(line) => line,
                Poll::Idle => {
                    thread::sleep(poll_interval);
                    continue;
                }
                Poll::Closed => {
                    log::info!("Device source closed");
                    break;
                }
            };
            consumed += 1;

            match monitor.ingest_line(&line) {
                Ok(_) => {}
                Err(MonitorError::Closed) => break,
                Err(MonitorError::Fusion(e)) => log::warn!("Dropped line {}: {}", consumed, e),
                Err(e) => log::error!("Ingestion error at line {}: {}", consumed, e),
            }
        }

        log::info!("Ingestion loop stopped after {} lines", consumed);
        consumed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::config::MonitorConfig;
    use crate::logic::dataset::writer::read_window;
    use crate::logic::events::LogSink;
    use crate::logic::fusion::DeviceTimestamp;
    use crate::logic::model::Ensemble;
    use crate::logic::profile::{MemoryProfileStore, UserProfile};
    use crate::logic::session::Session;
    use std::io::Cursor;
    use std::sync::mpsc::channel;
    use tempfile::tempdir;

    const CAPTURE: &str = "\
I (1000) tof: Range: 500 600,
I (1000) face: detection_result: [0]: (100, 80, 220, 240)
I (1100) tof: Range: 500 520,
I (1100) face: detection_result: [0]: (101, 80, 221, 240)
garbage without timestamp
I (1200) tof: Range: 505 515,
";

    fn monitor(logs_dir: &Path) -> Arc<Monitor> {
        let mut config = MonitorConfig::default();
        config.logging.logs_dir = logs_dir.to_path_buf();
        config.poll_interval_ms = 1;

        let mut profile = UserProfile::new(1, "replay", 165.0, 60.0);
        profile.threshold = Some(50.0);
        let store = Arc::new(MemoryProfileStore::with_profile(profile.clone()));

        Arc::new(
            Monitor::new(
                &config,
                Session::with_id(logs_dir, "replay", profile.id),
                profile,
                store,
                Ensemble::threshold_only(),
                Arc::new(LogSink),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_replay_until_closed() {
        let dir = tempdir().unwrap();
        let monitor = monitor(dir.path());
        let source = ReplaySource::new(Cursor::new(CAPTURE));

        let handle = spawn(monitor.clone(), source, Arc::new(AtomicBool::new(false)));
        assert_eq!(handle.join().unwrap(), 6);

        let summary = monitor.close().unwrap();
        let rows = read_window(&summary.files[0]).unwrap();
        let stamps: Vec<DeviceTimestamp> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![DeviceTimestamp(1000), DeviceTimestamp(1100), DeviceTimestamp(1200)]);
        assert_eq!(rows[0].prediction, Some(1));
        assert_eq!(rows[1].prediction, Some(0));
    }

    #[test]
    fn test_stop_flag_ends_idle_loop() {
        let dir = tempdir().unwrap();
        let monitor = monitor(dir.path());
        let (tx, rx) = channel();
        let stop = Arc::new(AtomicBool::new(false));

        let handle = spawn(monitor, ChannelSource::new(rx), stop.clone());
        tx.send("I (1000) tof: Range: 500 600,".to_string()).unwrap();
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);

        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_channel_disconnect_closes() {
        let (tx, rx) = channel::<String>();
        let mut source = ChannelSource::new(rx);
        assert_eq!(source.poll(), Poll::Idle);
        drop(tx);
        assert_eq!(source.poll(), Poll::Closed);
    }
}
