//! Log Buffer - fixed-capacity window of rows awaiting rotation
//!
//! Slots are pre-allocated; the cursor is the next free slot and the
//! counter tracks rows since the last rotation. No implicit resizing.

use crate::logic::fusion::DeviceTimestamp;
use super::record::LogRow;

pub struct LogBuffer {
    slots: Vec<Option<LogRow>>,
    cursor: usize,
    since_rotation: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            cursor: 0,
            since_rotation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.since_rotation
    }

    pub fn is_empty(&self) -> bool {
        self.since_rotation == 0
    }

    pub fn is_full(&self) -> bool {
        self.since_rotation == self.slots.len()
    }

    /// Store a row at the cursor. Returns true when the buffer became full.
    pub fn push(&mut self, row: LogRow) -> bool {
        if self.is_full() {
            // Caller rotates on full; never overwrite an unflushed window
            log::warn!("Log buffer full before rotation; dropping oldest window");
            self.clear();
        }
        self.slots[self.cursor] = Some(row);
        self.cursor = (self.cursor + 1) % self.slots.len();
        self.since_rotation += 1;
        self.is_full()
    }

    /// Buffered rows in insertion order
    pub fn rows(&self) -> impl Iterator<Item = &LogRow> {
        let start = (self.cursor + self.slots.len() - self.since_rotation) % self.slots.len();
        (0..self.since_rotation).filter_map(move |i| self.slots[(start + i) % self.slots.len()].as_ref())
    }

    /// Most recently buffered row with this timestamp
    pub fn find_mut(&mut self, ts: DeviceTimestamp) -> Option<&mut LogRow> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.as_mut())
            .filter(|row| row.timestamp == ts)
            .last()
    }

    pub fn last_mut(&mut self) -> Option<&mut LogRow> {
        if self.is_empty() {
            return None;
        }
        let index = (self.cursor + self.slots.len() - 1) % self.slots.len();
        self.slots[index].as_mut()
    }

    /// Take every buffered row (insertion order) and reset
    pub fn drain(&mut self) -> Vec<LogRow> {
        let rows: Vec<LogRow> = self.rows().cloned().collect();
        self.clear();
        rows
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.cursor = 0;
        self.since_rotation = 0;
    }
}
