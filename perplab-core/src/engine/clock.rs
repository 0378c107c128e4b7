//! Simulation clock and trading window.

use crate::domain::Timestamp;
use serde::{Deserialize, Serialize};

/// Current simulation time. Only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimClock {
    now: Option<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Option<Timestamp> {
        self.now
    }

    /// Move the clock to `ts`. Returns false and leaves the clock unchanged if `ts`
    /// is earlier than the current time.
    pub fn advance(&mut self, ts: Timestamp) -> bool {
        match self.now {
            Some(now) if ts < now => false,
            _ => {
                self.now = Some(ts);
                true
            }
        }
    }
}

/// Inclusive window in which strategies may submit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TradingWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts <= self.end
    }
}
