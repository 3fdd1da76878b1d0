//! Time sources for the scheduler
//!
//! Cadence is measured on a monotonic clock; payload timestamps come from the
//! wall clock, which may not be synchronised yet on a freshly booted device.

use crate::telemetry::payload::TIMESTAMP_FALLBACK;
use chrono::{Datelike, Local};
use tokio::time::Instant;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub trait Clock: Send {
    /// Monotonic instant used for cadence decisions
    fn now(&self) -> Instant;

    /// Formatted wall-clock time, or `None` if time is not synchronised
    fn timestamp(&self) -> Option<String>;

    fn timestamp_or_fallback(&self) -> String {
        self.timestamp()
            .unwrap_or_else(|| TIMESTAMP_FALLBACK.to_string())
    }
}

/// Tokio monotonic time plus local wall-clock time
///
/// Wall-clock time earlier than `min_valid_year` is treated as "never synced"
/// (an RTC-less board boots at the epoch).
#[derive(Debug, Clone)]
pub struct SystemClock {
    min_valid_year: i32,
}

impl SystemClock {
    pub fn new(min_valid_year: i32) -> Self {
        Self { min_valid_year }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn timestamp(&self) -> Option<String> {
        let now = Local::now();
        if now.year() < self.min_valid_year {
            return None;
        }
        Some(now.format(TIMESTAMP_FORMAT).to_string())
    }
}
