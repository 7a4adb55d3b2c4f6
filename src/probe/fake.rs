//! Deterministic prober for scheduler and supervisor tests.

use super::{CheckResult, ErrorKind, Prober};
use crate::endpoint::{EndpointDefaults, EndpointDescriptor, RawEndpoint};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Code(u16),
    Fail(ErrorKind),
}

/// Answers each probe after `delay` with the next scripted outcome.
pub struct ScriptedProber {
    delay: Duration,
    script: Vec<Outcome>,
    calls: Mutex<HashMap<String, usize>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(delay: Duration, script: Vec<Outcome>) -> Self {
        Self {
            delay,
            script,
            calls: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Always answers 200 after `delay`.
    pub fn healthy(delay: Duration) -> Self {
        Self::new(delay, vec![Outcome::Code(200)])
    }

    /// Probes started for one endpoint.
    pub fn calls_for(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of probes observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, descriptor: &EndpointDescriptor) -> CheckResult {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(descriptor.id.clone()).or_insert(0);
            *n += 1;
            *n - 1
        };

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self.script[n % self.script.len()] {
            Outcome::Code(code) => CheckResult::from_response(descriptor, code, self.delay),
            Outcome::Fail(kind) => CheckResult::from_failure(descriptor, kind, self.delay),
        }
    }
}

/// A descriptor with the given id, interval and enabled flag.
pub fn descriptor(id: &str, interval: Duration, enabled: bool) -> EndpointDescriptor {
    let raw = RawEndpoint {
        id: Some(id.to_string()),
        url: format!("http://{}.test/health", id),
        interval_seconds: Some(interval.as_secs_f64()),
        timeout_seconds: Some(5.0),
        enabled,
        ..Default::default()
    };
    EndpointDescriptor::resolve(raw, &EndpointDefaults::default()).unwrap()
}
