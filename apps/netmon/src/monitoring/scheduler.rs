use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::checker::ProbeError;
use super::executor::ProbeExecutor;
use super::tracker::EndpointStateTracker;
use super::types::{Endpoint, ProbeOutcome, iso_timestamp};
use crate::config::Config;
use crate::sink::{FileLogSink, LogSink};

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Probes dispatched but not yet recorded, counted per endpoint
#[derive(Debug, Default)]
struct InFlight(HashMap<String, usize>);

impl InFlight {
    fn start(&mut self, endpoint: &str) {
        *self.0.entry(endpoint.to_string()).or_default() += 1;
    }

    fn finish(&mut self, endpoint: &str) {
        if let Some(count) = self.0.get_mut(endpoint) {
            *count -= 1;
            if *count == 0 {
                self.0.remove(endpoint);
            }
        }
    }

    fn is_running(&self, endpoint: &str) -> bool {
        self.0.contains_key(endpoint)
    }

    fn total(&self) -> usize {
        self.0.values().sum()
    }
}

/// Timing knobs for the probe and flush cycles
#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub request_interval: Duration,
    pub flush_interval: Duration,
    /// Hold back a probe while the previous one for the same endpoint is
    /// still running
    pub skip_while_outstanding: bool,
    pub show_countdown: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(60),
            skip_while_outstanding: false,
            show_countdown: false,
        }
    }
}

impl From<&Config> for ScheduleSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_interval: config.request_interval,
            flush_interval: config.flush_interval,
            skip_while_outstanding: config.skip_while_outstanding,
            show_countdown: config.show_countdown,
        }
    }
}

/// Monitoring scheduler - drives the probe and flush cycles for a fixed set
/// of endpoints.
///
/// Probes run as independent tasks and report back over a channel; the
/// scheduler loop is the only writer of the [`EndpointStateTracker`].
pub struct MonitoringScheduler {
    endpoints: Arc<[Endpoint]>,
    executor: Arc<ProbeExecutor>,
    sink: Arc<dyn LogSink>,
    settings: ScheduleSettings,
}

impl MonitoringScheduler {
    /// Create a new monitoring scheduler
    pub fn new(
        endpoints: Vec<Endpoint>,
        executor: Arc<ProbeExecutor>,
        sink: Arc<dyn LogSink>,
        settings: ScheduleSettings,
    ) -> Self {
        Self { endpoints: endpoints.into(), executor, sink, settings }
    }

    /// Wire up the real checkers and log file described by `config`
    pub fn from_config(config: &Config) -> Result<Self, ProbeError> {
        let executor = Arc::new(ProbeExecutor::new(config.probe_timeout)?);
        let sink = Arc::new(FileLogSink::new(&config.log_file_path));

        Ok(Self::new(config.endpoints.clone(), executor, sink, ScheduleSettings::from(config)))
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Run both cycles until `shutdown` resolves, then drain in-flight probes
    /// and write a final flush.
    pub async fn run_until<F>(self, shutdown: F) -> EndpointStateTracker
    where
        F: Future<Output = ()>,
    {
        let mut tracker = self.new_tracker();
        let (result_tx, mut result_rx) = mpsc::channel::<ProbeOutcome>(self.channel_capacity());
        let mut outstanding = InFlight::default();

        self.log_started().await;

        let start = Instant::now();
        let mut probe_timer =
            interval_at(start + self.settings.request_interval, self.settings.request_interval);
        probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush_timer =
            interval_at(start + self.settings.flush_interval, self.settings.flush_interval);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut countdown_timer = interval_at(start + COUNTDOWN_PERIOD, COUNTDOWN_PERIOD);
        countdown_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_flush = start + self.settings.flush_interval;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping probe cycle");
                    break;
                }

                Some(outcome) = result_rx.recv() => {
                    self.record(&mut tracker, &mut outstanding, outcome).await;
                }

                _ = flush_timer.tick() => {
                    self.flush(&mut tracker).await;
                    next_flush = Instant::now() + self.settings.flush_interval;
                }

                _ = probe_timer.tick() => {
                    self.dispatch_round(&result_tx, &mut outstanding);
                }

                _ = countdown_timer.tick(), if self.settings.show_countdown => {
                    let remaining = next_flush.saturating_duration_since(Instant::now());
                    self.sink.countdown(remaining.as_secs_f64().ceil() as u64).await;
                }
            }
        }

        self.finish(tracker, result_tx, result_rx, outstanding).await
    }

    /// Probe every endpoint once, record the results and flush.
    pub async fn run_once(self) -> EndpointStateTracker {
        let tracker = self.new_tracker();
        let (result_tx, result_rx) = mpsc::channel::<ProbeOutcome>(self.channel_capacity());
        let mut outstanding = InFlight::default();

        self.log_started().await;
        self.dispatch_round(&result_tx, &mut outstanding);

        self.finish(tracker, result_tx, result_rx, outstanding).await
    }

    fn new_tracker(&self) -> EndpointStateTracker {
        EndpointStateTracker::new(self.endpoints.iter().map(|e| e.name.clone()))
    }

    fn channel_capacity(&self) -> usize {
        (self.endpoints.len() * 4).max(16)
    }

    async fn log_started(&self) {
        let line = format!("Network monitor started at: {}", iso_timestamp(&Utc::now()));
        self.sink.log(&line).await;
        info!(
            endpoints = self.endpoints.len(),
            "Monitoring started (request every {:?}, flush every {:?})",
            self.settings.request_interval,
            self.settings.flush_interval
        );
    }

    /// Spawn one probe task per endpoint. Never waits on a probe.
    fn dispatch_round(&self, result_tx: &mpsc::Sender<ProbeOutcome>, outstanding: &mut InFlight) {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if self.settings.skip_while_outstanding && outstanding.is_running(&endpoint.name) {
                debug!(endpoint = %endpoint.name, "Previous probe still running, skipping tick");
                continue;
            }
            outstanding.start(&endpoint.name);

            let endpoints = Arc::clone(&self.endpoints);
            let executor = Arc::clone(&self.executor);
            let result_tx = result_tx.clone();

            tokio::spawn(async move {
                let endpoint = &endpoints[index];
                let dispatched_at = Utc::now();
                let result = executor.probe(endpoint).await;

                let outcome = ProbeOutcome {
                    endpoint: endpoint.name.clone(),
                    result,
                    dispatched_at,
                    observed_at: Utc::now(),
                };

                // Only fails once the scheduler has gone away
                if result_tx.send(outcome).await.is_err() {
                    debug!(endpoint = %endpoint.name, "Scheduler stopped before probe result was recorded");
                }
            });
        }
    }

    async fn record(
        &self,
        tracker: &mut EndpointStateTracker,
        outstanding: &mut InFlight,
        outcome: ProbeOutcome,
    ) {
        outstanding.finish(&outcome.endpoint);

        debug!(
            endpoint = %outcome.endpoint,
            success = outcome.result.success,
            latency_ms = ?outcome.result.response_time_ms,
            dispatched_at = %iso_timestamp(&outcome.dispatched_at),
            "Probe completed"
        );

        if let Some(change) = tracker.record(&outcome.endpoint, &outcome.result, outcome.observed_at) {
            self.sink.log(&change.to_string()).await;
        }
    }

    async fn flush(&self, tracker: &mut EndpointStateTracker) {
        let end_of_interval = Utc::now();
        for snapshot in tracker.flush_all() {
            self.sink.log(&snapshot.summary_line(&end_of_interval)).await;
        }
    }

    /// Stop dispatching, wait for every probe still in flight, then flush
    async fn finish(
        &self,
        mut tracker: EndpointStateTracker,
        result_tx: mpsc::Sender<ProbeOutcome>,
        mut result_rx: mpsc::Receiver<ProbeOutcome>,
        mut outstanding: InFlight,
    ) -> EndpointStateTracker {
        drop(result_tx);

        let in_flight = outstanding.total();
        if in_flight > 0 {
            info!("Waiting for {} in-flight probe(s)", in_flight);
        }
        // Closes once every probe task has dropped its sender
        while let Some(outcome) = result_rx.recv().await {
            self.record(&mut tracker, &mut outstanding, outcome).await;
        }

        self.flush(&mut tracker).await;
        let line = format!("Network monitor stopped at: {}", iso_timestamp(&Utc::now()));
        self.sink.log(&line).await;

        tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::Checker;
    use crate::monitoring::types::{CheckType, MonitorStatus};
    use crate::sink::MemoryLogSink;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Per-endpoint delay and latency; `None` latency means the check fails
    struct ScriptedChecker(HashMap<&'static str, (Duration, Option<f64>)>);

    #[async_trait::async_trait]
    impl Checker for ScriptedChecker {
        async fn check(&self, endpoint: &Endpoint) -> Result<f64, ProbeError> {
            let (delay, latency) = self.0.get(endpoint.name.as_str()).copied().unwrap_or_default();
            tokio::time::sleep(delay).await;
            latency.ok_or(ProbeError::MissingPort)
        }
    }

    #[derive(Default)]
    struct CountdownSink {
        countdowns: Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl LogSink for CountdownSink {
        async fn log(&self, _line: &str) {}

        async fn countdown(&self, remaining_secs: u64) {
            self.countdowns.lock().unwrap().push(remaining_secs);
        }
    }

    fn scheduler(
        script: &[(&'static str, Duration, Option<f64>)],
        timeout: Duration,
        sink: Arc<dyn LogSink>,
        settings: ScheduleSettings,
    ) -> MonitoringScheduler {
        let checker = ScriptedChecker(
            script.iter().map(|(name, delay, latency)| (*name, (*delay, *latency))).collect(),
        );
        let executor = ProbeExecutor::new(timeout)
            .unwrap()
            .with_checker(CheckType::Ping, Arc::new(checker));
        let endpoints = script.iter().map(|(name, _, _)| Endpoint::new(*name, "127.0.0.1")).collect();

        MonitoringScheduler::new(endpoints, Arc::new(executor), sink, settings)
    }

    fn settings(request_ms: u64, flush_ms: u64) -> ScheduleSettings {
        ScheduleSettings {
            request_interval: Duration::from_millis(request_ms),
            flush_interval: Duration::from_millis(flush_ms),
            ..ScheduleSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_and_flush_cycles() {
        let sink = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            &[("a", Duration::ZERO, Some(50.0))],
            Duration::from_secs(1),
            sink.clone(),
            settings(1000, 2500),
        );

        let tracker = scheduler.run_until(tokio::time::sleep(Duration::from_millis(3200))).await;
        let lines = sink.lines();

        assert_eq!(lines.len(), 5, "{lines:?}");
        assert!(lines[0].starts_with("Network monitor started at: "));
        assert!(lines[1].starts_with("Status of a changed from unknown to up at "));
        assert!(lines[2].starts_with("a: 2/0 pass/fail (100.00%) between "));
        assert!(lines[2].ends_with("Avg response time: 50.00 ms"));
        assert!(lines[3].starts_with("a: 1/0 pass/fail (100.00%) between "));
        assert!(lines[4].starts_with("Network monitor stopped at: "));

        assert_eq!(tracker.status("a"), Some(MonitorStatus::Up));
        assert_eq!(tracker.window("a").unwrap().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_hold_back_other_endpoints() {
        let sink = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            &[("fast", Duration::from_millis(10), Some(5.0)), ("slow", Duration::from_secs(10), Some(1.0))],
            Duration::from_millis(500),
            sink.clone(),
            settings(1000, 60_000),
        );

        let tracker = scheduler.run_until(tokio::time::sleep(Duration::from_millis(1200))).await;
        let lines = sink.lines();

        let position = |prefix: &str| lines.iter().position(|l| l.starts_with(prefix)).unwrap();
        let fast_up = position("Status of fast changed from unknown to up");
        let slow_down = position("Status of slow changed from unknown to down");
        assert!(fast_up < slow_down);

        assert!(lines.iter().any(|l| l.starts_with("fast: 1/0 pass/fail (100.00%)") && l.ends_with("5.00 ms")));
        assert!(lines.iter().any(|l| l.starts_with("slow: 0/1 pass/fail (0.00%)") && l.ends_with("N/A ms")));
        assert_eq!(tracker.status("fast"), Some(MonitorStatus::Up));
        assert_eq!(tracker.status("slow"), Some(MonitorStatus::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_probes_are_all_recorded() {
        let sink = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            &[("slow", Duration::from_millis(2500), Some(1.0))],
            Duration::from_secs(10),
            sink.clone(),
            settings(1000, 60_000),
        );

        scheduler.run_until(tokio::time::sleep(Duration::from_millis(4200))).await;

        assert!(sink.lines().iter().any(|l| l.starts_with("slow: 4/0 pass/fail")));
    }

    #[test]
    fn test_in_flight_counts_overlapping_dispatches() {
        let mut in_flight = InFlight::default();
        in_flight.start("a");
        in_flight.start("a");
        in_flight.start("b");
        assert_eq!(in_flight.total(), 3);

        in_flight.finish("a");
        assert!(in_flight.is_running("a"));
        assert_eq!(in_flight.total(), 2);

        in_flight.finish("a");
        in_flight.finish("unknown");
        assert!(!in_flight.is_running("a"));
        assert!(in_flight.is_running("b"));
        assert_eq!(in_flight.total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_while_outstanding() {
        let sink = Arc::new(MemoryLogSink::new());
        let mut settings = settings(1000, 60_000);
        settings.skip_while_outstanding = true;
        let scheduler = scheduler(
            &[("slow", Duration::from_millis(2500), Some(1.0))],
            Duration::from_secs(10),
            sink.clone(),
            settings,
        );

        scheduler.run_until(tokio::time::sleep(Duration::from_millis(4200))).await;

        // Dispatched at 1s and 4s; the ticks at 2s and 3s are skipped
        assert!(sink.lines().iter().any(|l| l.starts_with("slow: 2/0 pass/fail")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_tick_flushes_empty_windows() {
        let sink = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            &[("a", Duration::ZERO, Some(1.0))],
            Duration::from_secs(1),
            sink.clone(),
            settings(1000, 60_000),
        );

        scheduler.run_until(std::future::ready(())).await;
        let lines = sink.lines();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("a: 0/0 pass/fail (N/A%) between N/A and "));
    }

    #[tokio::test]
    async fn test_run_once() {
        let sink = Arc::new(MemoryLogSink::new());
        let scheduler = scheduler(
            &[("up", Duration::ZERO, Some(12.0)), ("down", Duration::ZERO, None)],
            Duration::from_secs(1),
            sink.clone(),
            ScheduleSettings::default(),
        );

        let tracker = scheduler.run_once().await;
        let lines = sink.lines();

        assert_eq!(lines.len(), 6, "{lines:?}");
        assert!(lines.iter().any(|l| l.starts_with("Status of up changed from unknown to up")));
        assert!(lines.iter().any(|l| l.starts_with("Status of down changed from unknown to down")));
        assert!(lines.iter().any(|l| l.starts_with("up: 1/0 pass/fail (100.00%)") && l.ends_with("12.00 ms")));
        assert!(lines.iter().any(|l| l.starts_with("down: 0/1 pass/fail (0.00%)")));
        assert_eq!(tracker.status("down"), Some(MonitorStatus::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_toward_flush() {
        let sink = Arc::new(CountdownSink::default());
        let mut settings = settings(10_000, 3000);
        settings.show_countdown = true;
        let scheduler = scheduler(&[("a", Duration::ZERO, Some(1.0))], Duration::from_secs(1), sink.clone(), settings);

        scheduler.run_until(tokio::time::sleep(Duration::from_millis(2500))).await;

        assert_eq!(*sink.countdowns.lock().unwrap(), vec![2, 1]);
    }
}
