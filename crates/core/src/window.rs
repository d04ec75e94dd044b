//! Time windows as they appear in window-operator state namespaces.

use serde::{Deserialize, Serialize};

/// Milliseconds since Unix epoch.
pub type Timestamp = u64;

/// Half-open event-time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Tumbling window of `size_ms` containing `ts`.
    pub fn tumbling(ts: Timestamp, size_ms: Timestamp) -> Self {
        let start = (ts / size_ms) * size_ms;
        Self::new(start, start + size_ms)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}
