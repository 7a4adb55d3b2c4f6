//! HTTP probe implementation.

use super::{CheckResult, ErrorKind, Prober};
use crate::endpoint::EndpointDescriptor;

use async_trait::async_trait;
use std::error::Error as _;
use tokio::time::Instant;

/// Probes endpoints over HTTP using a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("endpoint-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, descriptor: &EndpointDescriptor) -> CheckResult {
        let request = self
            .client
            .request(descriptor.method.clone(), descriptor.url.clone())
            .headers(descriptor.headers.clone());

        let start = Instant::now();
        let deadline = start + descriptor.timeout;

        let response = match tokio::time::timeout_at(deadline, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let kind = classify(&e);
                tracing::debug!(endpoint = %descriptor.id, error = %e, "probe failed: {}", kind);
                return CheckResult::from_failure(descriptor, kind, start.elapsed());
            }
            Err(_) => {
                return CheckResult::from_failure(descriptor, ErrorKind::Timeout, start.elapsed());
            }
        };

        let code = response.status().as_u16();

        // Read the body to measure complete transfer time. The code is already
        // known, so a slow or broken body does not change the classification.
        if let Ok(Err(e)) = tokio::time::timeout_at(deadline, response.bytes()).await {
            tracing::debug!(endpoint = %descriptor.id, error = %e, "failed to read response body");
        }

        CheckResult::from_response(descriptor, code, start.elapsed())
    }
}

/// Map a transport error onto a failure reason.
fn classify(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }
    if err.is_connect() {
        if chain_mentions_dns(err) {
            return ErrorKind::DnsError;
        }
        return ErrorKind::ConnectionError;
    }
    ErrorKind::Other
}

fn chain_mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(e) = source {
        let message = e.to_string().to_ascii_lowercase();
        if message.contains("dns error")
            || message.contains("failed to lookup address")
            || message.contains("name or service not known")
            || message.contains("no such host")
        {
            return true;
        }
        source = e.source();
    }
    false
}
