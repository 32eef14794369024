use chrono::{DateTime, Utc};

use crate::core::types::SerialNum;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushType {
    /// Persists state so the transaction log can be pruned.
    Sync,
    /// Releases resources without changing durable state.
    Gc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushComponent {
    Attribute,
}

/// A unit of flushable work advertised to the flush engine.
pub trait FlushTarget: Send + Sync {
    fn name(&self) -> &str;

    fn flush_type(&self) -> FlushType;

    fn component(&self) -> FlushComponent;

    /// Highest serial durably covered by this target.
    fn flushed_serial_num(&self) -> SerialNum;

    fn last_flush_time(&self) -> Option<DateTime<Utc>>;

    /// Memory released by flushing, used by the flush strategy.
    fn memory_gain(&self) -> u64;

    fn approx_bytes_to_write(&self) -> u64;

    /// Relative cost of replaying one operation from the transaction log
    /// instead of flushing. Targets backed by an index advertise a high
    /// cost so the strategy prefers them after restarts.
    fn replay_operation_cost(&self) -> f64 {
        1.0
    }

    /// Returns the flush task for `current_serial`, or None when there is
    /// nothing to flush (the last-flush time is still refreshed).
    fn init_flush(&self, current_serial: SerialNum) -> Option<Box<dyn FlushTask>>;
}

/// The actual work; runs on a dedicated flush executor task.
pub trait FlushTask: Send {
    fn flush_serial(&self) -> SerialNum;

    fn run(self: Box<Self>);
}
