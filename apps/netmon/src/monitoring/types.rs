use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Liveness of an endpoint as of its most recently recorded probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

impl MonitorStatus {
    pub fn from_success(success: bool) -> Self {
        if success { MonitorStatus::Up } else { MonitorStatus::Down }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Type of liveness check to perform against an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    #[default]
    Ping,
    Http,
    Tcp,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Ping => write!(f, "ping"),
            CheckType::Http => write!(f, "http"),
            CheckType::Tcp => write!(f, "tcp"),
        }
    }
}

/// A named target under monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub check_type: CheckType,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: None,
            check_type: CheckType::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_check_type(mut self, check_type: CheckType) -> Self {
        self.check_type = check_type;
        self
    }

    /// Host part, with IPv6 literals wrapped in brackets
    fn host(&self) -> String {
        if self.address.parse::<std::net::Ipv6Addr>().is_ok() {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }

    /// `host:port` for socket based checks, if a port is configured
    pub fn socket_target(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{}", self.host(), port))
    }

    /// URL for HTTP checks. Bare hosts are probed over plain http.
    pub fn http_target(&self) -> String {
        if self.address.contains("://") {
            match (self.port, url::Url::parse(&self.address)) {
                (Some(port), Ok(mut url)) if url.port().is_none() => {
                    if url.set_port(Some(port)).is_ok() {
                        return url.to_string();
                    }
                    self.address.clone()
                }
                _ => self.address.clone(),
            }
        } else {
            match self.port {
                Some(port) => format!("http://{}:{}", self.host(), port),
                None => format!("http://{}", self.host()),
            }
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    /// Response time in milliseconds, present only on success
    pub response_time_ms: Option<f64>,
}

impl ProbeResult {
    pub fn success(response_time_ms: f64) -> Self {
        Self { success: true, response_time_ms: Some(response_time_ms) }
    }

    pub fn failure() -> Self {
        Self { success: false, response_time_ms: None }
    }
}

/// A probe result in flight from a probe task to the tracker
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub result: ProbeResult,
    pub dispatched_at: DateTime<Utc>,
    pub observed_at: DateTime<Utc>,
}

/// Emitted when an endpoint's recorded status differs from the previous one
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub endpoint: String,
    pub from: MonitorStatus,
    pub to: MonitorStatus,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status of {} changed from {} to {} at {}",
            self.endpoint,
            self.from,
            self.to,
            iso_timestamp(&self.at)
        )
    }
}

/// Contents of one endpoint's aggregation window at flush time
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSnapshot {
    pub endpoint: String,
    pub pass: u64,
    pub fail: u64,
    pub first_ping_time: Option<DateTime<Utc>>,
    pub last_ping_time: Option<DateTime<Utc>>,
    /// Average over successful probes only
    pub average_response_time_ms: Option<f64>,
    /// Percentage rounded to two decimals
    pub success_rate: Option<f64>,
}

impl AggregationSnapshot {
    /// Render the summary line written for this window
    pub fn summary_line(&self, end_of_interval: &DateTime<Utc>) -> String {
        let rate = self
            .success_rate
            .map(|rate| format!("{rate:.2}"))
            .unwrap_or_else(|| "N/A".to_string());
        let first = self
            .first_ping_time
            .as_ref()
            .map(iso_timestamp)
            .unwrap_or_else(|| "N/A".to_string());
        let average = self
            .average_response_time_ms
            .map(|avg| format!("{avg:.2}"))
            .unwrap_or_else(|| "N/A".to_string());

        format!(
            "{}: {}/{} pass/fail ({}%) between {} and {}. Avg response time: {} ms",
            self.endpoint,
            self.pass,
            self.fail,
            rate,
            first,
            iso_timestamp(end_of_interval),
            average
        )
    }
}

/// RFC 3339 UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`
pub fn iso_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
