//! Scriptable log backend for sink and supervisor tests.

use super::{LogBackend, SinkError};
use crate::probe::CheckResult;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Records delivered batches; fails the first `failures` sends.
pub struct RecordingBackend {
    failures: Option<usize>,
    hang: bool,
    attempts: AtomicUsize,
    delivered: Mutex<Vec<Vec<String>>>,
}

impl RecordingBackend {
    pub fn healthy() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures: Some(failures),
            hang: false,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            failures: None,
            hang: false,
            attempts: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Every send stalls forever.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::always_failing()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Endpoint ids of every delivered result, in delivery order.
    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn batches(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl LogBackend for RecordingBackend {
    async fn send(&self, batch: &[CheckResult]) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        match self.failures {
            Some(failures) if attempt >= failures => {}
            _ => return Err(SinkError::Status(503)),
        }

        let ids = batch.iter().map(|r| r.endpoint_id.clone()).collect();
        self.delivered.lock().unwrap().push(ids);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
