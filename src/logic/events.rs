//! Event Emitter - Monitor output stream
//!
//! Predictions, alerts, fault notices, flushed windows and threshold changes
//! are pushed to an injected `EventSink` (UI bridge, channel, log).

use std::sync::mpsc::Sender;

use parking_lot::Mutex;
use serde::Serialize;

use crate::logic::alarm::AlarmEvent;
use crate::logic::dataset::Flushed;
use crate::logic::fusion::{DeviceTimestamp, FaultNotice};
use crate::logic::model::{Decision, ThresholdChange};

/// Event names
pub mod events {
    pub const PREDICTION: &str = "posture:prediction";
    pub const ALERT: &str = "posture:alert";
    pub const FAULT: &str = "device:fault";
    pub const FLUSHED: &str = "log:flushed";
    pub const THRESHOLD_CHANGED: &str = "threshold:changed";
    pub const ROW_LOGGED: &str = "log:row";
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorEvent {
    Prediction {
        timestamp: DeviceTimestamp,
        decision: Decision,
        threshold: f64,
    },
    Alert(AlarmEvent),
    Fault(FaultNotice),
    Flushed(Flushed),
    ThresholdChanged {
        profile_id: i64,
        change: ThresholdChange,
        local_time: String,
    },
    RowLogged {
        timestamp: DeviceTimestamp,
        prediction: Option<u8>,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Prediction { .. } => events::PREDICTION,
            MonitorEvent::Alert(_) => events::ALERT,
            MonitorEvent::Fault(_) => events::FAULT,
            MonitorEvent::Flushed(_) => events::FLUSHED,
            MonitorEvent::ThresholdChanged { .. } => events::THRESHOLD_CHANGED,
            MonitorEvent::RowLogged { .. } => events::ROW_LOGGED,
        }
    }
}

/// Receiver of monitor events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MonitorEvent);
}

/// Forwards events over a channel; a closed receiver drops them
pub struct ChannelSink {
    sender: Mutex<Sender<MonitorEvent>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<MonitorEvent>) -> Self {
        Self { sender: Mutex::new(sender) }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MonitorEvent) {
        if self.sender.lock().send(event).is_err() {
            log::debug!("Event receiver closed, event dropped");
        }
    }
}

/// Writes events to the log as JSON
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: MonitorEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| format!("<unserializable: {}>", e));
        match &event {
            MonitorEvent::RowLogged { .. } | MonitorEvent::Prediction { .. } => {
                log::debug!("[{}] {}", event.name(), payload)
            }
            MonitorEvent::Fault(_) => log::warn!("[{}] {}", event.name(), payload),
            _ => log::info!("[{}] {}", event.name(), payload),
        }
    }
}
