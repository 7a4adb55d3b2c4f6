//! Per-endpoint runtime state.

use crate::probe::{CheckResult, Status};

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

const LAST_NONE: u8 = 0;
const LAST_OK: u8 = 1;
const LAST_UNAVAILABLE: u8 = 2;

/// Live counters for one scheduled endpoint. Written only by the endpoint's
/// own probe loop; readable from anywhere.
#[derive(Debug)]
pub struct EntryStats {
    pub endpoint_id: String,
    pub url: String,
    pub interval: Duration,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    completed: AtomicU64,
    skipped_overlap: AtomicU64,
    last_status: AtomicU8,
}

/// Serializable view of an [`EntryStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub id: String,
    pub url: String,
    pub interval_seconds: f64,
    pub in_flight: bool,
    pub consecutive_failures: u32,
    pub completed: u64,
    pub skipped_overlap: u64,
    pub last_status: Option<Status>,
}

impl EntryStats {
    pub fn new(endpoint_id: String, url: String, interval: Duration) -> Self {
        Self {
            endpoint_id,
            url,
            interval,
            in_flight: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            completed: AtomicU64::new(0),
            skipped_overlap: AtomicU64::new(0),
            last_status: AtomicU8::new(LAST_NONE),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_flight(&self, in_flight: bool) {
        self.in_flight.store(in_flight, Ordering::Release);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn skipped_overlap(&self) -> u64 {
        self.skipped_overlap.load(Ordering::Relaxed)
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped_overlap.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed probe and return the failure streak before it.
    pub(crate) fn record(&self, result: &CheckResult) -> u32 {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if result.is_ok() {
            self.last_status.store(LAST_OK, Ordering::Relaxed);
            self.consecutive_failures.swap(0, Ordering::Relaxed)
        } else {
            self.last_status.store(LAST_UNAVAILABLE, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed)
        }
    }

    pub fn last_status(&self) -> Option<Status> {
        match self.last_status.load(Ordering::Relaxed) {
            LAST_OK => Some(Status::Ok),
            LAST_UNAVAILABLE => Some(Status::Unavailable),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            id: self.endpoint_id.clone(),
            url: self.url.clone(),
            interval_seconds: self.interval.as_secs_f64(),
            in_flight: self.is_in_flight(),
            consecutive_failures: self.consecutive_failures(),
            completed: self.completed(),
            skipped_overlap: self.skipped_overlap(),
            last_status: self.last_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::descriptor;
    use crate::probe::ErrorKind;

    #[test]
    fn test_failure_streak_resets_on_ok() {
        let d = descriptor("svc", Duration::from_secs(5), true);
        let stats = EntryStats::new(d.id.clone(), d.configured_url.clone(), d.interval);
        assert_eq!(stats.last_status(), None);

        assert_eq!(stats.record(&CheckResult::from_failure(&d, ErrorKind::Timeout, Duration::ZERO)), 0);
        assert_eq!(stats.record(&CheckResult::from_response(&d, 500, Duration::ZERO)), 1);
        assert_eq!(stats.consecutive_failures(), 2);
        assert_eq!(stats.last_status(), Some(Status::Unavailable));

        assert_eq!(stats.record(&CheckResult::from_response(&d, 200, Duration::ZERO)), 2);
        assert_eq!(stats.consecutive_failures(), 0);
        assert_eq!(stats.completed(), 3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.id, "svc");
        assert_eq!(snapshot.interval_seconds, 5.0);
        assert_eq!(snapshot.last_status, Some(Status::Ok));
        assert!(!snapshot.in_flight);
    }
}
