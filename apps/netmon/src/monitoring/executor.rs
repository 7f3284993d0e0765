use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::checker::{Checker, HttpChecker, PingChecker, ProbeError, TcpChecker};
use super::types::{CheckType, Endpoint, ProbeResult};

/// Probe executor - runs a single check against an endpoint and folds any
/// error into a failed [`ProbeResult`]
pub struct ProbeExecutor {
    ping_checker: Arc<dyn Checker>,
    http_checker: Arc<dyn Checker>,
    tcp_checker: Arc<dyn Checker>,
    timeout_duration: Duration,
}

impl ProbeExecutor {
    /// Create a new executor whose checks are bounded by `timeout_duration`
    pub fn new(timeout_duration: Duration) -> Result<Self, ProbeError> {
        Ok(Self {
            ping_checker: Arc::new(PingChecker::new(timeout_duration)),
            http_checker: Arc::new(HttpChecker::new(timeout_duration)?),
            tcp_checker: Arc::new(TcpChecker::new(timeout_duration)),
            timeout_duration,
        })
    }

    /// Replace the checker used for `check_type`
    pub fn with_checker(mut self, check_type: CheckType, checker: Arc<dyn Checker>) -> Self {
        match check_type {
            CheckType::Ping => self.ping_checker = checker,
            CheckType::Http => self.http_checker = checker,
            CheckType::Tcp => self.tcp_checker = checker,
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_duration
    }

    /// Execute one probe. Never fails; errors become `success = false`.
    pub async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
        let checker = match endpoint.check_type {
            CheckType::Ping => &self.ping_checker,
            CheckType::Http => &self.http_checker,
            CheckType::Tcp => &self.tcp_checker,
        };

        let outcome = match timeout(self.timeout_duration, checker.check(endpoint)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(self.timeout_duration)),
        };

        match outcome {
            Ok(latency_ms) => ProbeResult::success(latency_ms),
            Err(e) => {
                debug!(endpoint = %endpoint.name, check = %endpoint.check_type, "Probe failed: {}", e);
                ProbeResult::failure()
            }
        }
    }
}
