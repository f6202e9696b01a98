//! Posture Monitor - pipeline orchestration
//!
//! One lock guards every piece of mutable state. Each completed record runs
//! validate → features → vote → alarm → log under it, so user feedback and
//! calibration are atomic relative to the next decision. Events are emitted
//! after the lock is released.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;

use crate::constants::LOCAL_TIME_FORMAT;
use crate::logic::alarm::{AlarmDebouncer, AlarmEvent};
use crate::logic::config::MonitorConfig;
use crate::logic::dataset::{AlarmFlag, Flushed, LogError, LogRow, SessionLog};
use crate::logic::events::{EventSink, MonitorEvent};
use crate::logic::features;
use crate::logic::fusion::{DeviceTimestamp, FusedRecord, Fuser, FusionError, LineParser, RawFields, Validator};
use crate::logic::model::{Decision, Ensemble, InferenceError, ThresholdChange, ThresholdManager, Verdict};
use crate::logic::profile::{CsvProfileStore, ProfileError, ProfileStore, UserProfile};
use crate::logic::session::{Session, SessionSummary};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug)]
pub enum MonitorError {
    Fusion(FusionError),
    Log(LogError),
    Profile(ProfileError),
    Inference(InferenceError),
    Closed,
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Fusion(e) => write!(f, "{}", e),
            MonitorError::Log(e) => write!(f, "{}", e),
            MonitorError::Profile(e) => write!(f, "{}", e),
            MonitorError::Inference(e) => write!(f, "{}", e),
            MonitorError::Closed => write!(f, "Monitor session is closed"),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<FusionError> for MonitorError {
    fn from(e: FusionError) -> Self {
        MonitorError::Fusion(e)
    }
}

impl From<LogError> for MonitorError {
    fn from(e: LogError) -> Self {
        MonitorError::Log(e)
    }
}

impl From<ProfileError> for MonitorError {
    fn from(e: ProfileError) -> Self {
        MonitorError::Profile(e)
    }
}

impl From<InferenceError> for MonitorError {
    fn from(e: InferenceError) -> Self {
        MonitorError::Inference(e)
    }
}

/// What happened to one completed record
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub timestamp: DeviceTimestamp,
    pub decision: Option<Decision>,
    pub verdict: Option<Verdict>,
    pub alarm: Option<AlarmEvent>,
    pub flushed: Option<Flushed>,
}

// ============================================================================
// STATE
// ============================================================================

struct MonitorState {
    parser: LineParser,
    fuser: Fuser,
    validator: Validator,
    ensemble: Ensemble,
    debouncer: AlarmDebouncer,
    thresholds: ThresholdManager,
    log: SessionLog,
    session: Session,
    /// Alert waiting for the user's response
    last_alert: Option<AlarmEvent>,
    threshold_logged: bool,
    /// Threshold change with no logged row to carry it yet: `(value, note)`
    pending_threshold: Option<(f64, String)>,
    closed: bool,
}

impl MonitorState {
    fn process(&mut self, record: FusedRecord, events: &mut Vec<MonitorEvent>) -> SampleOutcome {
        let validation = self.validator.validate(&record);
        events.extend(validation.notices.iter().cloned().map(MonitorEvent::Fault));

        let threshold = self.thresholds.threshold();
        let decision = match threshold {
            Some(threshold) if !validation.suppresses_decision() => {
                self.decide(&record, threshold)
            }
            _ => None,
        };
        let verdict = decision.and_then(|d| d.verdict);
        if let (Some(decision), Some(threshold)) = (decision, threshold) {
            events.push(MonitorEvent::Prediction {
                timestamp: record.timestamp,
                decision,
                threshold,
            });
        }

        let step = self.debouncer.observe(record.timestamp, verdict, &record.local_time);
        self.session.record_sample(step.contributed_ms, step.event.is_some());

        let mut row = LogRow::from_record(&record, self.thresholds.profile().id);
        row.prediction = verdict.map(|v| v.as_flag());
        row.notes = validation.notes();
        if let Some((value, note)) = self.pending_threshold.take() {
            row.model_threshold = Some(value);
            row.model_notes = Some(note);
            self.threshold_logged = true;
        } else if !self.threshold_logged {
            row.model_threshold = threshold;
            self.threshold_logged = threshold.is_some();
        }
        if let Some(alarm) = &step.event {
            row.alarm_notification = AlarmFlag::Yes;
            row.notification_interval = Some(alarm.interval_secs());
            self.last_alert = Some(alarm.clone());
            events.push(MonitorEvent::Alert(alarm.clone()));
        }
        let prediction = row.prediction;

        let flushed = match self.log.append(row) {
            Ok(flushed) => flushed,
            Err(e) => {
                log::error!("Row {} kept in buffer only: {}", record.timestamp, e);
                None
            }
        };
        events.push(MonitorEvent::RowLogged {
            timestamp: record.timestamp,
            prediction,
        });
        if let Some(flushed) = &flushed {
            events.push(MonitorEvent::Flushed(flushed.clone()));
        }

        SampleOutcome {
            timestamp: record.timestamp,
            decision,
            verdict,
            alarm: step.event,
            flushed,
        }
    }

    fn decide(&mut self, record: &FusedRecord, threshold: f64) -> Option<Decision> {
        let Some(vector) = features::derive(record, Some(self.thresholds.profile())) else {
            log::debug!("No features for {} (missing range or profile data)", record.timestamp);
            return None;
        };
        match self.ensemble.decide(&vector, threshold) {
            Ok(decision) => Some(decision),
            Err(e) => {
                log::warn!("Decision failed at {}: {}", record.timestamp, e);
                None
            }
        }
    }

    /// Stamp a threshold change on the most recently logged row, or on the
    /// next row when none is in reach
    fn note_threshold_change(&mut self, change: &ThresholdChange) -> String {
        let local_time = Local::now().format(LOCAL_TIME_FORMAT).to_string();
        let from = change
            .from
            .map(|v| format!("{:.1}", v))
            .unwrap_or_else(|| "none".to_string());
        let note = format!("Threshold changed from {} to {:.1} at {}.", from, change.to, local_time);
        let to = change.to;

        let mut note = Some(note);
        let stamped = self.log.annotate_last(|row| {
            row.model_threshold = Some(to);
            row.model_notes = note.take();
        });
        if stamped {
            self.threshold_logged = true;
            self.pending_threshold = None;
        } else if let Some(note) = note {
            log::debug!("No logged row for threshold note; next row carries it");
            self.pending_threshold = Some((to, note));
        }
        local_time
    }
}

// ============================================================================
// MONITOR
// ============================================================================

pub struct Monitor {
    state: Mutex<MonitorState>,
    sink: Arc<dyn EventSink>,
    poll_interval_ms: u64,
}

impl Monitor {
    /// Assemble a monitor from its parts
    pub fn new(
        config: &MonitorConfig,
        session: Session,
        profile: UserProfile,
        store: Arc<dyn ProfileStore>,
        ensemble: Ensemble,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, MonitorError> {
        let log = SessionLog::open(session.folder(), session.id(), config.logging.buffer_capacity)?;
        log::info!(
            "Session {} started for profile {} ({:?})",
            session.id(),
            profile.id,
            session.folder()
        );

        let state = MonitorState {
            parser: LineParser::new()?,
            fuser: Fuser::new(),
            validator: Validator::new(config.validation.clone()),
            ensemble,
            debouncer: AlarmDebouncer::new(config.alarm.clone()),
            thresholds: ThresholdManager::new(config.thresholds.clone(), profile, store),
            log,
            session,
            last_alert: None,
            threshold_logged: false,
            pending_threshold: None,
            closed: false,
        };

        Ok(Self {
            state: Mutex::new(state),
            sink,
            poll_interval_ms: config.poll_interval_ms,
        })
    }

    /// Load profile table and models from `config` and start a new session
    pub fn from_config(
        config: &MonitorConfig,
        profile_id: Option<i64>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, MonitorError> {
        let store: Arc<dyn ProfileStore> = Arc::new(CsvProfileStore::new(&config.profiles_path));
        let profile = match profile_id {
            Some(id) => store.get(id)?.ok_or(ProfileError::NotFound(id))?,
            None => UserProfile::anonymous(),
        };

        let ensemble = if config.models.enabled {
            Ensemble::from_config(&config.models)?
        } else {
            log::info!("Models disabled; threshold rule decides alone");
            Ensemble::threshold_only()
        };

        let session = Session::start(&config.logging.logs_dir, profile.id);
        Self::new(config, session, profile, store, ensemble, sink)
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    pub fn session_id(&self) -> String {
        self.state.lock().session.id().to_string()
    }

    pub fn session_folder(&self) -> PathBuf {
        self.state.lock().session.folder().to_path_buf()
    }

    pub fn threshold(&self) -> Option<f64> {
        self.state.lock().thresholds.threshold()
    }

    pub fn alert_pending(&self) -> bool {
        self.state.lock().debouncer.is_pending()
    }

    fn emit_all(&self, events: Vec<MonitorEvent>) {
        for event in events {
            self.sink.emit(event);
        }
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Merge a partial update; returns the outcome of the record it completed
    pub fn ingest(&self, fields: &RawFields, timestamp: DeviceTimestamp) -> Result<Option<SampleOutcome>, MonitorError> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(MonitorError::Closed);
            }
            let ingest = state.fuser.ingest(fields, timestamp)?;
            ingest.completed.map(|record| state.process(record, &mut events))
        };
        self.emit_all(events);
        Ok(result)
    }

    /// Parse one firmware line and ingest what it carries
    pub fn ingest_line(&self, line: &str) -> Result<Option<SampleOutcome>, MonitorError> {
        let parsed = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MonitorError::Closed);
            }
            state.parser.parse(line)
        };
        match parsed {
            Some(parsed) => self.ingest(&parsed.fields, parsed.timestamp),
            None => Ok(None),
        }
    }

    // ========================================================================
    // USER INPUT
    // ========================================================================

    /// User response to the pending alert (`true` = the alert was right)
    pub fn on_feedback(&self, is_correct: bool) -> Result<Option<ThresholdChange>, MonitorError> {
        let mut events = Vec::new();
        let change = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MonitorError::Closed);
            }
            let Some(alert) = state.last_alert.take() else {
                log::debug!("Feedback without a pending alert ignored");
                return Ok(None);
            };
            state.debouncer.acknowledge();

            let flag = u8::from(is_correct);
            if !state.log.annotate(alert.trigger, |row| row.feedback = Some(flag)) {
                log::warn!("Alert row {} no longer in reach for feedback", alert.trigger);
            }

            let change = state.thresholds.on_feedback(is_correct);
            if let Some(change) = &change {
                let local_time = state.note_threshold_change(change);
                events.push(MonitorEvent::ThresholdChanged {
                    profile_id: state.thresholds.profile().id,
                    change: *change,
                    local_time,
                });
            }
            change
        };
        self.emit_all(events);
        Ok(change)
    }

    /// Apply a calibration result
    pub fn calibrate(&self, profile_id: i64, threshold: f64) -> Result<ThresholdChange, MonitorError> {
        let mut events = Vec::new();
        let change = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MonitorError::Closed);
            }
            let change = state.thresholds.calibrate(profile_id, threshold)?;
            if profile_id == state.thresholds.profile().id {
                let local_time = state.note_threshold_change(&change);
                events.push(MonitorEvent::ThresholdChanged { profile_id, change, local_time });
            }
            change
        };
        self.emit_all(events);
        Ok(change)
    }

    // ========================================================================
    // SHUTDOWN
    // ========================================================================

    /// Finalize the open record, flush the partial window and summarize.
    ///
    /// When a window cannot be written the monitor stays open and `close`
    /// can be called again to retry it.
    pub fn close(&self) -> Result<SessionSummary, MonitorError> {
        let mut events = Vec::new();
        let result = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Err(MonitorError::Closed);
            }

            if let Some(record) = state.fuser.finish() {
                state.process(record, &mut events);
            }
            match state.log.close() {
                Ok(flushed) => {
                    state.closed = true;
                    events.extend(flushed.map(MonitorEvent::Flushed));

                    let summary = state.session.summary(state.log.files().to_vec());
                    log::info!(
                        "Session {} closed: {} samples, {} alarms, alarm time {}",
                        summary.session_id,
                        summary.samples,
                        summary.alarm_count,
                        summary.cumulative_alarm_time
                    );
                    Ok(summary)
                }
                Err(e) => {
                    log::error!("Session {} still open: {}", state.session.id(), e);
                    Err(e)
                }
            }
        };
        self.emit_all(events);
        Ok(result?)
    }
}
