//! Configuration module for the endpoint monitor.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::endpoint::EndpointDefaults;
use crate::scheduler::SchedulerConfig;
use crate::sink::SinkConfig;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format for the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Read `MONITOR_LOG_FORMAT`. Needed before the subscriber exists, so
    /// unknown values fall back to text silently.
    pub fn from_env() -> Self {
        match env::var("MONITOR_LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Descriptor file (default: "/app/config/config.json")
    pub config_path: PathBuf,
    /// Fallbacks for endpoints and files that leave fields unset
    pub endpoint_defaults: EndpointDefaults,
    pub scheduler: SchedulerConfig,
    pub sink: SinkConfig,
    /// How long shutdown waits for in-flight probes (default: 30s)
    pub grace_period: Duration,
    /// Deadline for the final sink flush (default: 10s)
    pub drain_deadline: Duration,
    /// HTTP log backend; `None` logs records to stdout
    pub backend_url: Option<String>,
    pub backend_timeout: Duration,
    /// Observability server port; `None` disables it (default: 8080)
    pub http_port: Option<u16>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/app/config/config.json"),
            endpoint_defaults: EndpointDefaults::default(),
            scheduler: SchedulerConfig::default(),
            sink: SinkConfig::default(),
            grace_period: Duration::from_secs(30),
            drain_deadline: Duration::from_secs(10),
            backend_url: None,
            backend_timeout: Duration::from_secs(10),
            http_port: Some(8080),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CONFIG_PATH`: descriptor file path
    /// - `CHECK_INTERVAL`: default check interval in minutes (default: 5)
    /// - `MONITOR_MAX_IN_FLIGHT`: concurrent probe bound (default: 50)
    /// - `MONITOR_START_JITTER`: spread first probes over the interval (default: true)
    /// - `MONITOR_GRACE_PERIOD_SECS`, `MONITOR_DRAIN_DEADLINE_SECS`
    /// - `MONITOR_QUEUE_CAPACITY`, `MONITOR_BATCH_SIZE`, `MONITOR_FLUSH_INTERVAL_MS`,
    ///   `MONITOR_MAX_RETRY_SECS`
    /// - `MONITOR_BACKEND_URL`, `MONITOR_BACKEND_TIMEOUT_SECS`
    /// - `MONITOR_HTTP_PORT`: observability port, 0 disables (default: 8080)
    pub fn load() -> Self {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn load_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = var("CONFIG_PATH") {
            cfg.config_path = PathBuf::from(path);
        }

        if let Some(minutes) = parse_positive::<f64>("CHECK_INTERVAL", var("CHECK_INTERVAL")) {
            cfg.endpoint_defaults.interval_seconds = minutes * 60.0;
        }

        if let Some(n) = parse_positive::<usize>("MONITOR_MAX_IN_FLIGHT", var("MONITOR_MAX_IN_FLIGHT")) {
            cfg.scheduler.max_in_flight = n;
        }
        if let Some(jitter) = parse::<bool>("MONITOR_START_JITTER", var("MONITOR_START_JITTER")) {
            cfg.scheduler.start_jitter = jitter;
        }

        if let Some(d) = seconds("MONITOR_GRACE_PERIOD_SECS", var("MONITOR_GRACE_PERIOD_SECS")) {
            cfg.grace_period = d;
        }
        if let Some(d) = seconds("MONITOR_DRAIN_DEADLINE_SECS", var("MONITOR_DRAIN_DEADLINE_SECS")) {
            cfg.drain_deadline = d;
        }

        if let Some(n) = parse_positive::<usize>("MONITOR_QUEUE_CAPACITY", var("MONITOR_QUEUE_CAPACITY")) {
            cfg.sink.capacity = n;
        }
        if let Some(n) = parse_positive::<usize>("MONITOR_BATCH_SIZE", var("MONITOR_BATCH_SIZE")) {
            cfg.sink.batch_size = n;
        }
        if let Some(ms) = parse_positive::<u64>("MONITOR_FLUSH_INTERVAL_MS", var("MONITOR_FLUSH_INTERVAL_MS")) {
            cfg.sink.flush_interval = Duration::from_millis(ms);
        }
        if let Some(d) = seconds("MONITOR_MAX_RETRY_SECS", var("MONITOR_MAX_RETRY_SECS")) {
            cfg.sink.max_retry = d;
        }

        cfg.backend_url = var("MONITOR_BACKEND_URL");
        if let Some(d) = seconds("MONITOR_BACKEND_TIMEOUT_SECS", var("MONITOR_BACKEND_TIMEOUT_SECS")) {
            cfg.backend_timeout = d;
        }

        if let Some(port) = parse::<u16>("MONITOR_HTTP_PORT", var("MONITOR_HTTP_PORT")) {
            cfg.http_port = if port == 0 { None } else { Some(port) };
        }

        cfg
    }
}

fn parse<T: FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", value, name);
            None
        }
    }
}

fn parse_positive<T>(name: &str, value: Option<String>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let parsed: T = parse(name, value)?;
    if parsed > T::default() {
        Some(parsed)
    } else {
        tracing::warn!("Ignoring non-positive value for {}", name);
        None
    }
}

fn seconds(name: &str, value: Option<String>) -> Option<Duration> {
    let secs = parse_positive::<f64>(name, value)?;
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> MonitorConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::load_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.config_path, PathBuf::from("/app/config/config.json"));
        assert_eq!(cfg.endpoint_defaults.interval_seconds, 300.0);
        assert_eq!(cfg.scheduler.max_in_flight, 50);
        assert_eq!(cfg.grace_period, Duration::from_secs(30));
        assert_eq!(cfg.http_port, Some(8080));
        assert!(cfg.backend_url.is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let cfg = load(&[]);
        assert_eq!(cfg.config_path, MonitorConfig::default().config_path);
        assert_eq!(cfg.sink.batch_size, 100);
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("CONFIG_PATH", "/etc/monitor.json"),
            ("CHECK_INTERVAL", "2"),
            ("MONITOR_MAX_IN_FLIGHT", "8"),
            ("MONITOR_START_JITTER", "false"),
            ("MONITOR_GRACE_PERIOD_SECS", "5"),
            ("MONITOR_QUEUE_CAPACITY", "50"),
            ("MONITOR_FLUSH_INTERVAL_MS", "250"),
            ("MONITOR_BACKEND_URL", "http://collector:9000/logs"),
            ("MONITOR_HTTP_PORT", "0"),
        ]);
        assert_eq!(cfg.config_path, PathBuf::from("/etc/monitor.json"));
        assert_eq!(cfg.endpoint_defaults.interval_seconds, 120.0);
        assert_eq!(cfg.scheduler.max_in_flight, 8);
        assert!(!cfg.scheduler.start_jitter);
        assert_eq!(cfg.grace_period, Duration::from_secs(5));
        assert_eq!(cfg.sink.capacity, 50);
        assert_eq!(cfg.sink.flush_interval, Duration::from_millis(250));
        assert_eq!(cfg.backend_url.as_deref(), Some("http://collector:9000/logs"));
        assert_eq!(cfg.http_port, None);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = load(&[
            ("CHECK_INTERVAL", "soon"),
            ("MONITOR_MAX_IN_FLIGHT", "0"),
            ("MONITOR_GRACE_PERIOD_SECS", "-1"),
            ("MONITOR_HTTP_PORT", "70000"),
            ("MONITOR_BACKEND_URL", "   "),
        ]);
        assert_eq!(cfg.endpoint_defaults.interval_seconds, 300.0);
        assert_eq!(cfg.scheduler.max_in_flight, 50);
        assert_eq!(cfg.grace_period, Duration::from_secs(30));
        assert_eq!(cfg.http_port, Some(8080));
        assert!(cfg.backend_url.is_none());
    }
}
