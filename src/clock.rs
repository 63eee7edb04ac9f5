//! Wall-clock timestamps anchored to tokio's monotonic clock
//!
//! Background loops compute fire times and staleness windows in UTC, but wait
//! with tokio timers. Deriving `now()` from `tokio::time::Instant` keeps both
//! views consistent, including under a paused test runtime.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    base_instant: Instant,
    base_time: DateTime<Utc>,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_time: Utc::now(),
        }
    }

    /// A clock whose current time reads as `base_time`
    pub fn starting_at(base_time: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_time,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.base_instant);
        let elapsed =
            chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.base_time + elapsed
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
