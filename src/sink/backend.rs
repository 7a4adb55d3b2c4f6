//! Log backends that receive delivered result batches.

use super::SinkError;
use crate::probe::{CheckResult, ResultRecord};

use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

/// Destination for result batches. A returned error is treated as
/// transient and the batch is retried.
#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn send(&self, batch: &[CheckResult]) -> Result<(), SinkError>;

    fn name(&self) -> &str;
}

/// Writes each result as a structured log event on the process log.
#[derive(Debug, Default, Clone)]
pub struct StdoutBackend;

#[async_trait]
impl LogBackend for StdoutBackend {
    async fn send(&self, batch: &[CheckResult]) -> Result<(), SinkError> {
        for result in batch {
            let record = serde_json::to_string(&result.record())?;
            if result.is_ok() {
                tracing::info!(
                    target: "endpoint_monitor::record",
                    record = %record,
                    "Endpoint {}: {}",
                    result.endpoint_id,
                    result.status
                );
            } else {
                tracing::error!(
                    target: "endpoint_monitor::record",
                    record = %record,
                    "Endpoint {}: {}",
                    result.endpoint_id,
                    result.status
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// One entry in an HTTP backend request body.
#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    severity: &'static str,
    #[serde(flatten)]
    record: ResultRecord<'a>,
}

/// Posts batches as a JSON array to a remote collector.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: Url,
}

impl HttpBackend {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl LogBackend for HttpBackend {
    async fn send(&self, batch: &[CheckResult]) -> Result<(), SinkError> {
        let entries: Vec<LogEntry<'_>> = batch
            .iter()
            .map(|result| LogEntry {
                severity: if result.is_ok() { "INFO" } else { "ERROR" },
                record: result.record(),
            })
            .collect();

        let response = self.client.post(self.url.clone()).json(&entries).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::descriptor;
    use crate::probe::ErrorKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn batch() -> Vec<CheckResult> {
        let d = descriptor("svc", Duration::from_secs(60), true);
        vec![
            CheckResult::from_response(&d, 200, Duration::from_millis(12)),
            CheckResult::from_failure(&d, ErrorKind::Timeout, Duration::from_secs(5)),
        ]
    }

    #[tokio::test]
    async fn test_stdout_backend_accepts_everything() {
        assert!(StdoutBackend.send(&batch()).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_backend_posts_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs"))
            .and(body_partial_json(serde_json::json!([
                { "severity": "INFO", "id": "svc", "status": "OK", "response_code": 200 },
                { "severity": "ERROR", "id": "svc", "status": "UNAVAILABLE", "error": "timeout" }
            ])))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/logs", server.uri())).unwrap();
        let backend = HttpBackend::new(url, Duration::from_secs(5)).unwrap();
        tokio_test::assert_ok!(backend.send(&batch()).await);
    }

    #[tokio::test]
    async fn test_http_backend_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let backend = HttpBackend::new(url, Duration::from_secs(5)).unwrap();
        let err = backend.send(&batch()).await.unwrap_err();
        assert!(matches!(err, SinkError::Status(503)));
    }
}
