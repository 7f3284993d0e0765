/// Monitoring engine module - probes endpoints and aggregates the results
///
/// This module is responsible for:
/// - Executing ping/HTTP/TCP checks with a bounded timeout
/// - Tracking per-endpoint status and aggregation windows
/// - Scheduling the probe and flush cycles
/// - Validating endpoint targets at startup
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod tracker;
pub mod types;
pub mod validation;

pub use executor::ProbeExecutor;
pub use scheduler::{MonitoringScheduler, ScheduleSettings};
pub use tracker::{AggregationWindow, EndpointStateTracker};
pub use types::{AggregationSnapshot, CheckType, Endpoint, MonitorStatus, ProbeResult, StatusChange};
