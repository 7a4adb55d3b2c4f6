//! Descriptor model types.

use super::ConfigError;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION};
use reqwest::{Method, Url};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Top-level shape of the descriptor file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointFile {
    pub endpoints: Vec<RawEndpoint>,
    pub default_timeout_seconds: Option<f64>,
    pub default_success_status_codes: Option<Vec<u16>>,
    pub default_interval_seconds: Option<f64>,
}

impl EndpointFile {
    /// File-level defaults layered over the process-level fallback.
    pub fn defaults(&self, fallback: &EndpointDefaults) -> EndpointDefaults {
        EndpointDefaults {
            timeout_seconds: self.default_timeout_seconds.unwrap_or(fallback.timeout_seconds),
            success_status_codes: self
                .default_success_status_codes
                .clone()
                .unwrap_or_else(|| fallback.success_status_codes.clone()),
            interval_seconds: self
                .default_interval_seconds
                .unwrap_or(fallback.interval_seconds),
        }
    }
}

/// One endpoint entry as written in the descriptor file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEndpoint {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub success_status_codes: Option<Vec<u16>>,
    #[serde(default)]
    pub interval_seconds: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Default for RawEndpoint {
    fn default() -> Self {
        Self {
            id: None,
            url: String::new(),
            method: None,
            headers: BTreeMap::new(),
            timeout_seconds: None,
            success_status_codes: None,
            interval_seconds: None,
            enabled: true,
        }
    }
}

/// Values applied to endpoints that leave a field unset.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDefaults {
    pub timeout_seconds: f64,
    pub success_status_codes: Vec<u16>,
    pub interval_seconds: f64,
}

impl Default for EndpointDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
            success_status_codes: vec![200],
            interval_seconds: 300.0,
        }
    }
}

/// An immutable, validated description of one monitored endpoint.
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub id: String,
    pub url: Url,
    /// The url as written in the configuration, used in output records.
    pub configured_url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub accepted_status_codes: BTreeSet<u16>,
    pub interval: Duration,
    pub enabled: bool,
}

impl EndpointDescriptor {
    /// Validate a raw entry and fill in defaults.
    pub fn resolve(raw: RawEndpoint, defaults: &EndpointDefaults) -> Result<Self, ConfigError> {
        // Until the url is parsed, errors are reported against whatever the user wrote.
        let label = raw.id.clone().unwrap_or_else(|| raw.url.clone());
        let url = parse_url(&label, &raw.url)?;
        let configured_url = raw.url.trim().to_string();

        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => url.to_string(),
        };

        let method_name = raw.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            ConfigError::InvalidMethod {
                id: id.clone(),
                method: method_name.clone(),
            }
        })?;

        let headers = parse_headers(&id, &raw.headers)?;

        let timeout = positive_duration(
            &id,
            "timeout_seconds",
            raw.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        )?;
        let interval = positive_duration(
            &id,
            "interval_seconds",
            raw.interval_seconds.unwrap_or(defaults.interval_seconds),
        )?;

        let codes = raw
            .success_status_codes
            .unwrap_or_else(|| defaults.success_status_codes.clone());
        let accepted_status_codes = parse_status_codes(&id, codes)?;

        Ok(Self {
            id,
            url,
            configured_url,
            method,
            headers,
            timeout,
            accepted_status_codes,
            interval,
            enabled: raw.enabled,
        })
    }

    /// Whether a response code counts as healthy for this endpoint.
    pub fn accepts(&self, code: u16) -> bool {
        self.accepted_status_codes.contains(&code)
    }
}

fn parse_url(id: &str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        id: id.to_string(),
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

fn parse_headers(id: &str, raw: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (name, value) in raw {
        let invalid = || ConfigError::InvalidHeader {
            id: id.to_string(),
            name: name.clone(),
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let mut header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        if header_name == AUTHORIZATION || header_name == PROXY_AUTHORIZATION || header_name == COOKIE {
            header_value.set_sensitive(true);
        }
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Longest accepted timeout or interval: one year.
const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

fn positive_duration(id: &str, field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_DURATION_SECS {
        return Err(ConfigError::InvalidDuration {
            id: id.to_string(),
            field,
            value: seconds,
        });
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidDuration {
        id: id.to_string(),
        field,
        value: seconds,
    })
}

fn parse_status_codes(id: &str, codes: Vec<u16>) -> Result<BTreeSet<u16>, ConfigError> {
    if codes.is_empty() {
        return Err(ConfigError::InvalidStatusCodes {
            id: id.to_string(),
            reason: "success_status_codes must not be empty".to_string(),
        });
    }
    if let Some(bad) = codes.iter().find(|c| !(100..=599).contains(*c)) {
        return Err(ConfigError::InvalidStatusCodes {
            id: id.to_string(),
            reason: format!("status code {} is outside 100..=599", bad),
        });
    }
    Ok(codes.into_iter().collect())
}
