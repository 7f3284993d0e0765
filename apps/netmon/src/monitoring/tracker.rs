//! Per-endpoint status and aggregation window bookkeeping.
//!
//! The tracker has a single owner (the scheduler loop), so `record` and
//! `flush` never interleave: a flush swaps the window out in one step and any
//! result recorded afterwards lands in the fresh window.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::warn;

use super::types::{AggregationSnapshot, MonitorStatus, ProbeResult, StatusChange};

/// Counters accumulated for one endpoint between two flushes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationWindow {
    pub pass: u64,
    pub fail: u64,
    pub first_ping_time: Option<DateTime<Utc>>,
    pub last_ping_time: Option<DateTime<Utc>>,
    /// Sum of response times over successful probes
    pub total_response_time_ms: f64,
}

impl AggregationWindow {
    pub fn total(&self) -> u64 {
        self.pass + self.fail
    }

    /// Mean response time of the successful probes, `None` until one succeeds
    pub fn average_response_time_ms(&self) -> Option<f64> {
        (self.pass > 0).then(|| self.total_response_time_ms / self.pass as f64)
    }

    /// Pass percentage rounded to two decimals, `None` for an empty window
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| {
            let rate = self.pass as f64 / total as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        })
    }

    fn observe(&mut self, result: &ProbeResult, observed_at: DateTime<Utc>) {
        if result.success {
            self.pass += 1;
            self.total_response_time_ms += result.response_time_ms.unwrap_or(0.0);
        } else {
            self.fail += 1;
        }

        if self.first_ping_time.is_none() {
            self.first_ping_time = Some(observed_at);
        }
        self.last_ping_time = Some(observed_at);
    }

    fn snapshot(&self, endpoint: &str) -> AggregationSnapshot {
        AggregationSnapshot {
            endpoint: endpoint.to_string(),
            pass: self.pass,
            fail: self.fail,
            first_ping_time: self.first_ping_time,
            last_ping_time: self.last_ping_time,
            average_response_time_ms: self.average_response_time_ms(),
            success_rate: self.success_rate(),
        }
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    status: MonitorStatus,
    window: AggregationWindow,
}

/// Owns the current status and open aggregation window of every endpoint
#[derive(Debug, Default)]
pub struct EndpointStateTracker {
    states: BTreeMap<String, EndpointState>,
}

impl EndpointStateTracker {
    /// Create a tracker with every endpoint `Unknown` and an empty window
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states = endpoints
            .into_iter()
            .map(|name| (name.into(), EndpointState::default()))
            .collect();

        Self { states }
    }

    /// Apply one probe result.
    ///
    /// Returns the status change when the derived status differs from the
    /// stored one. Results for endpoints the tracker does not know are dropped.
    pub fn record(
        &mut self,
        endpoint: &str,
        result: &ProbeResult,
        observed_at: DateTime<Utc>,
    ) -> Option<StatusChange> {
        let Some(state) = self.states.get_mut(endpoint) else {
            warn!("Dropping probe result for unknown endpoint {}", endpoint);
            return None;
        };

        state.window.observe(result, observed_at);

        let new_status = MonitorStatus::from_success(result.success);
        if new_status == state.status {
            return None;
        }

        let change = StatusChange {
            endpoint: endpoint.to_string(),
            from: state.status,
            to: new_status,
            at: observed_at,
        };
        state.status = new_status;
        Some(change)
    }

    /// Snapshot an endpoint's window and replace it with an empty one
    pub fn flush(&mut self, endpoint: &str) -> Option<AggregationSnapshot> {
        let state = self.states.get_mut(endpoint)?;
        let window = std::mem::take(&mut state.window);
        Some(window.snapshot(endpoint))
    }

    /// Flush every endpoint, in name order
    pub fn flush_all(&mut self) -> Vec<AggregationSnapshot> {
        self.states
            .iter_mut()
            .map(|(name, state)| std::mem::take(&mut state.window).snapshot(name))
            .collect()
    }

    pub fn status(&self, endpoint: &str) -> Option<MonitorStatus> {
        self.states.get(endpoint).map(|state| state.status)
    }

    pub fn window(&self, endpoint: &str) -> Option<&AggregationWindow> {
        self.states.get(endpoint).map(|state| &state.window)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn test_status_transitions_and_window() {
        let mut tracker = EndpointStateTracker::new(["db"]);
        assert_eq!(tracker.status("db"), Some(MonitorStatus::Unknown));

        let change = tracker.record("db", &ProbeResult::success(50.0), at(1)).unwrap();
        assert_eq!(change.from, MonitorStatus::Unknown);
        assert_eq!(change.to, MonitorStatus::Up);
        assert_eq!(change.at, at(1));

        assert!(tracker.record("db", &ProbeResult::success(30.0), at(2)).is_none());
        let window = tracker.window("db").unwrap();
        assert_eq!(window.pass, 2);
        assert_eq!(window.average_response_time_ms(), Some(40.0));

        let change = tracker.record("db", &ProbeResult::failure(), at(3)).unwrap();
        assert_eq!(change.from, MonitorStatus::Up);
        assert_eq!(change.to, MonitorStatus::Down);
        assert_eq!(tracker.status("db"), Some(MonitorStatus::Down));

        let window = tracker.window("db").unwrap();
        assert_eq!((window.pass, window.fail), (2, 1));
        assert_eq!(window.first_ping_time, Some(at(1)));
        assert_eq!(window.last_ping_time, Some(at(3)));
    }

    #[test]
    fn test_flush_snapshot_and_reset() {
        let mut tracker = EndpointStateTracker::new(["db"]);
        tracker.record("db", &ProbeResult::success(50.0), at(1));
        tracker.record("db", &ProbeResult::success(30.0), at(2));
        tracker.record("db", &ProbeResult::failure(), at(3));

        let snapshot = tracker.flush("db").unwrap();
        assert_eq!((snapshot.pass, snapshot.fail), (2, 1));
        assert_eq!(snapshot.success_rate, Some(66.67));
        assert_eq!(snapshot.average_response_time_ms, Some(40.0));
        assert_eq!(snapshot.first_ping_time, Some(at(1)));
        assert_eq!(snapshot.last_ping_time, Some(at(3)));

        assert_eq!(tracker.window("db"), Some(&AggregationWindow::default()));
        // Status survives the flush
        assert_eq!(tracker.status("db"), Some(MonitorStatus::Down));

        let empty = tracker.flush("db").unwrap();
        assert_eq!((empty.pass, empty.fail), (0, 0));
        assert_eq!(empty.success_rate, None);
        assert_eq!(empty.average_response_time_ms, None);
        assert_eq!(empty.first_ping_time, None);
    }

    #[test]
    fn test_repeated_results_emit_no_events() {
        let mut tracker = EndpointStateTracker::new(["web"]);
        let events: Vec<_> = (0..5)
            .filter_map(|i| tracker.record("web", &ProbeResult::failure(), at(i)))
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].to, MonitorStatus::Down);
    }

    #[test]
    fn test_counts_survive_mid_sequence_flush() {
        let mut tracker = EndpointStateTracker::new(["a"]);
        let pattern = [true, false, true, true, false, false, true, true, true, false];
        let mut snapshots = Vec::new();

        for (i, success) in pattern.iter().enumerate() {
            let result = if *success { ProbeResult::success(10.0) } else { ProbeResult::failure() };
            tracker.record("a", &result, at(i as u32));
            if i == 4 {
                snapshots.push(tracker.flush("a").unwrap());
            }
        }
        snapshots.push(tracker.flush("a").unwrap());

        assert_eq!((snapshots[0].pass, snapshots[0].fail), (3, 2));
        assert_eq!((snapshots[1].pass, snapshots[1].fail), (3, 2));
        let recorded: u64 = snapshots.iter().map(|s| s.pass + s.fail).sum();
        assert_eq!(recorded, pattern.len() as u64);
        assert_eq!(snapshots[1].first_ping_time, Some(at(5)));
    }

    #[test]
    fn test_average_is_over_successes_only() {
        let mut tracker = EndpointStateTracker::new(["a"]);
        tracker.record("a", &ProbeResult::success(10.0), at(0));
        tracker.record("a", &ProbeResult::failure(), at(1));
        tracker.record("a", &ProbeResult::success(20.0), at(2));
        tracker.record("a", &ProbeResult::failure(), at(3));

        let snapshot = tracker.flush("a").unwrap();
        assert_eq!(snapshot.average_response_time_ms, Some(15.0));
        assert_eq!(snapshot.success_rate, Some(50.0));

        tracker.record("a", &ProbeResult::failure(), at(4));
        let snapshot = tracker.flush("a").unwrap();
        assert_eq!(snapshot.average_response_time_ms, None);
        assert_eq!(snapshot.success_rate, Some(0.0));
    }

    #[test]
    fn test_flush_all_covers_every_endpoint() {
        let mut tracker = EndpointStateTracker::new(["b", "a"]);
        tracker.record("a", &ProbeResult::success(1.0), at(0));

        let snapshots = tracker.flush_all();
        let names: Vec<_> = snapshots.iter().map(|s| s.endpoint.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(snapshots[0].pass, 1);
        assert_eq!(snapshots[1].pass, 0);
        assert!(tracker.endpoints().all(|name| tracker.window(name).unwrap().total() == 0));
    }

    #[test]
    fn test_unknown_endpoint_is_ignored() {
        let mut tracker = EndpointStateTracker::new(["a"]);
        assert!(tracker.record("ghost", &ProbeResult::success(1.0), at(0)).is_none());
        assert!(tracker.flush("ghost").is_none());
        assert_eq!(tracker.len(), 1);
    }
}
