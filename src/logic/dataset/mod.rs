//! Dataset Module - Durable Session Logging
//!
//! Every fused record lands in a fixed-schema CSV row. Rows are buffered in a
//! fixed window, appended to disk one by one and rewritten at rotation.
//! The reconciler merges a finished session into one table.

pub mod record;
pub mod buffer;
pub mod writer;
pub mod reconcile;

#[cfg(test)]
mod tests;

pub use record::{AlarmFlag, LogRow, LOG_COLUMNS};
pub use writer::{Flushed, LogError, SessionLog};
pub use reconcile::{reconcile_rows, reconcile_session, Annotation, ReconcileError};
