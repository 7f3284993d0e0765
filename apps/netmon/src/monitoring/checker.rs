use regex::Regex;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use super::types::Endpoint;

/// Latency figure as printed by `ping`, e.g. `time=12.3 ms` or `time<1ms`
static RESPONSE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time[=<]\s?(\d+\.?\d*)\s?ms").expect("response time pattern is valid")
});

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn check process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("check process exited with {0}")]
    ExitStatus(ExitStatus),
    #[error("check process reported an error: {0}")]
    Stderr(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP check failed with status code: {0}")]
    HttpStatus(u16),
    #[error("TCP connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("no port configured for TCP check")]
    MissingPort,
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
}

/// Checker trait for different types of monitoring checks
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Perform the check and return the response time in milliseconds
    async fn check(&self, endpoint: &Endpoint) -> Result<f64, ProbeError>;
}

/// Extract the millisecond latency from raw check output
pub fn parse_response_time(output: &str) -> Option<f64> {
    RESPONSE_TIME
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Single echo request through the system `ping` binary
pub struct PingChecker {
    program: String,
    timeout_duration: Duration,
}

impl PingChecker {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { program: "ping".to_string(), timeout_duration }
    }

    /// Use a different executable in place of `ping`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if cfg!(windows) {
            cmd.args(["-n", "1"]);
        } else {
            cmd.args(["-c", "1"]);
        }
        cmd.arg(address).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<f64, ProbeError> {
        let output = timeout(self.timeout_duration, self.command(&endpoint.address).output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout_duration))?
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus(output.status));
        }
        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Stderr(stderr.trim().to_string()));
        }

        // A reply without a readable figure still counts as up
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_response_time(&stdout).unwrap_or(0.0))
    }
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(timeout_duration: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().timeout(timeout_duration).build()?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<f64, ProbeError> {
        let start = Instant::now();

        let response = self.client.get(endpoint.http_target()).send().await?;

        let latency = elapsed_ms(start);
        let status = response.status();

        // Consider 2xx and 3xx as success
        if status.is_success() || status.is_redirection() {
            Ok(latency)
        } else {
            Err(ProbeError::HttpStatus(status.as_u16()))
        }
    }
}

/// TCP port checker
pub struct TcpChecker {
    timeout_duration: Duration,
}

impl TcpChecker {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, endpoint: &Endpoint) -> Result<f64, ProbeError> {
        let target = endpoint.socket_target().ok_or(ProbeError::MissingPort)?;
        let start = Instant::now();

        timeout(self.timeout_duration, tokio::net::TcpStream::connect(target))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout_duration))?
            .map_err(ProbeError::Connect)?;

        Ok(elapsed_ms(start))
    }
}
