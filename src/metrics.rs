//! Process-wide observability counters.
//!
//! A single [`Metrics`] value is created by the supervisor and shared by
//! reference with the scheduler, the sink and the web server. Writers only
//! increment; readers take a [`MetricsSnapshot`].

use crate::probe::CheckResult;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    probes_total: AtomicU64,
    probes_failed_total: AtomicU64,
    probes_skipped_overlap_total: AtomicU64,
    results_dropped_total: AtomicU64,
    sink_queue_depth: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub probes_total: u64,
    pub probes_failed_total: u64,
    pub probes_skipped_overlap_total: u64,
    pub results_dropped_total: u64,
    pub sink_queue_depth: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_probe(&self, result: &CheckResult) {
        self.probes_total.fetch_add(1, Ordering::Relaxed);
        if !result.is_ok() {
            self.probes_failed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped_overlap(&self) {
        self.probes_skipped_overlap_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.results_dropped_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.sink_queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probes_total: self.probes_total.load(Ordering::Relaxed),
            probes_failed_total: self.probes_failed_total.load(Ordering::Relaxed),
            probes_skipped_overlap_total: self.probes_skipped_overlap_total.load(Ordering::Relaxed),
            results_dropped_total: self.results_dropped_total.load(Ordering::Relaxed),
            sink_queue_depth: self.sink_queue_depth.load(Ordering::Relaxed),
        }
    }
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(snapshot: &MetricsSnapshot) -> String {
    let series: [(&str, &str, &str, u64); 5] = [
        ("probes_total", "counter", "Probes completed.", snapshot.probes_total),
        (
            "probes_failed_total",
            "counter",
            "Probes that completed with status UNAVAILABLE.",
            snapshot.probes_failed_total,
        ),
        (
            "probes_skipped_overlap_total",
            "counter",
            "Ticks skipped because the previous probe was still in flight.",
            snapshot.probes_skipped_overlap_total,
        ),
        (
            "results_dropped_total",
            "counter",
            "Results discarded by queue overflow or exhausted delivery retries.",
            snapshot.results_dropped_total,
        ),
        (
            "sink_queue_depth",
            "gauge",
            "Results waiting in the sink queue.",
            snapshot.sink_queue_depth,
        ),
    ];

    let mut out = String::new();
    for (name, kind, help, value) in series {
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} {}\n", name, kind));
        out.push_str(&format!("{} {}\n", name, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::descriptor;
    use crate::probe::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_record_probe_counts_failures() {
        let metrics = Metrics::new();
        let d = descriptor("svc", Duration::from_secs(1), true);

        metrics.record_probe(&CheckResult::from_response(&d, 200, Duration::ZERO));
        metrics.record_probe(&CheckResult::from_response(&d, 500, Duration::ZERO));
        metrics.record_probe(&CheckResult::from_failure(&d, ErrorKind::Timeout, Duration::ZERO));
        metrics.record_skipped_overlap();
        metrics.record_dropped(3);
        metrics.set_queue_depth(7);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                probes_total: 3,
                probes_failed_total: 2,
                probes_skipped_overlap_total: 1,
                results_dropped_total: 3,
                sink_queue_depth: 7,
            }
        );
    }

    #[test]
    fn test_render_prometheus() {
        let snapshot = MetricsSnapshot {
            probes_total: 10,
            results_dropped_total: 2,
            ..Default::default()
        };
        let text = render_prometheus(&snapshot);

        assert!(text.contains("# TYPE probes_total counter\n"));
        assert!(text.contains("probes_total 10\n"));
        assert!(text.contains("results_dropped_total 2\n"));
        assert!(text.contains("# TYPE sink_queue_depth gauge\n"));
        assert!(text.contains("sink_queue_depth 0\n"));
    }
}
