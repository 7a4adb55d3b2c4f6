//! Probe module for endpoint health checks.
//!
//! A probe is one HTTP request against one endpoint. Every failure mode is
//! folded into the returned [`CheckResult`]; probing never returns an error.

mod http;

#[cfg(test)]
pub mod fake;

pub use http::*;

use crate::endpoint::EndpointDescriptor;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Health classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Unavailable,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::Unavailable => f.write_str("UNAVAILABLE"),
        }
    }
}

/// Why a probe produced no HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionError,
    DnsError,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::DnsError => "dns_error",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// The outcome of one probe attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub endpoint_id: String,
    pub url: String,
    pub status: Status,
    /// Absent when no response was received.
    pub response_code: Option<u16>,
    pub response_time: Duration,
    /// When the probe completed.
    pub timestamp: DateTime<Utc>,
    /// Present only for failures without an HTTP response.
    pub error_detail: Option<ErrorKind>,
}

impl CheckResult {
    /// A probe that received a response.
    pub fn from_response(descriptor: &EndpointDescriptor, code: u16, response_time: Duration) -> Self {
        let status = if descriptor.accepts(code) {
            Status::Ok
        } else {
            Status::Unavailable
        };
        Self {
            endpoint_id: descriptor.id.clone(),
            url: descriptor.configured_url.clone(),
            status,
            response_code: Some(code),
            response_time,
            timestamp: Utc::now(),
            error_detail: None,
        }
    }

    /// A probe that failed before a response arrived.
    pub fn from_failure(descriptor: &EndpointDescriptor, kind: ErrorKind, response_time: Duration) -> Self {
        Self {
            endpoint_id: descriptor.id.clone(),
            url: descriptor.configured_url.clone(),
            status: Status::Unavailable,
            response_code: None,
            response_time,
            timestamp: Utc::now(),
            error_detail: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The stable output record for this result.
    pub fn record(&self) -> ResultRecord<'_> {
        ResultRecord {
            id: &self.endpoint_id,
            url: &self.url,
            status: self.status,
            response_code: self.response_code,
            response_time_ms: u64::try_from(self.response_time.as_millis()).unwrap_or(u64::MAX),
            timestamp: self.timestamp,
            error: self.error_detail,
        }
    }
}

/// Serialized shape of a result as handed to log backends.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord<'a> {
    pub id: &'a str,
    pub url: &'a str,
    pub status: Status,
    pub response_code: Option<u16>,
    pub response_time_ms: u64,
    #[serde(serialize_with = "serialize_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

fn serialize_utc<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Executes probes against endpoints.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, descriptor: &EndpointDescriptor) -> CheckResult;
}
