//! Statistics and telemetry - rolling metrics, snapshots and threshold alerts
//!
//! The [`Monitor`] is an owned instance shared by `Arc` between the scheduler,
//! its producers and whoever wants to observe it. State touched from producer
//! threads (fast-path counters, rejected updates) is atomic; everything else is
//! written by the tick only.
//!
//! Alerts are level-triggered: every tick re-evaluates the thresholds and
//! re-raises an alert for as long as its condition holds.

use crate::event::Priority;
use crate::lane::{LaneTotals, QueueStatistics};
use crate::settings::{OptimizationSettings, PerPriority};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Alert thresholds and window sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Lane fill ratio (depth / limit) that counts as overflowing
    pub overflow_fill_ratio: f64,
    /// Coefficient of variation of frame intervals that counts as inconsistent
    pub frame_jitter_ratio: f64,
    /// Contended lock acquisitions, in percent
    pub contention_percent: f64,
    /// Lock acquisitions required before contention is judged
    pub min_lock_samples: u64,
    /// Latency samples kept per lane
    pub latency_window: usize,
    /// Age after which latency samples stop counting (ms)
    pub latency_window_ms: u64,
    /// Frame intervals kept for jitter
    pub frame_window: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            overflow_fill_ratio: 0.9,
            frame_jitter_ratio: 0.25,
            contention_percent: 10.0,
            min_lock_samples: 64,
            latency_window: 512,
            latency_window_ms: 2000,
            frame_window: 120,
        }
    }
}

/// Alert category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// A lane is dropping events or close to its limit
    QueueOverflow,
    /// Frame pacing is irregular or a tick overran its deadline
    FrameTimeInconsistency,
    /// A lane misses its latency target or was deferred
    LatencyBudgetViolation,
    /// Producers are fighting over a lane lock
    LockContention,
}

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    /// Events are being lost
    Error,
    /// Targets are being missed
    Warning,
}

/// A raised alert
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Category
    pub kind: AlertKind,
    /// Severity
    pub severity: AlertSeverity,
    /// Lane concerned, if any
    pub priority: Option<Priority>,
    /// Frame during which the alert was evaluated
    pub frame_number: u64,
    /// Measured value
    pub observed: f64,
    /// Threshold it crossed
    pub threshold: f64,
    /// Human-readable description
    pub message: String,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[frame {}] {:?}: {}", self.frame_number, self.kind, self.message)
    }
}

/// Latency distribution over the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencySummary {
    /// Samples in the window
    pub count: usize,
    /// Mean
    pub mean: Duration,
    /// Median
    pub p50: Duration,
    /// 95th percentile
    pub p95: Duration,
    /// 99th percentile
    pub p99: Duration,
    /// Maximum
    pub max: Duration,
}

/// Per-lane view in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LaneSnapshot {
    /// Interval queue statistics
    pub queue: QueueStatistics,
    /// Lifetime counters
    pub totals: LaneTotals,
    /// Dispatch latency distribution
    pub latency: LatencySummary,
    /// Events dispatched through ticks
    pub dispatched_events: u64,
    /// Updates produced from them
    pub updates: u64,
    /// Ticks in which the lane was skipped with events pending
    pub deferred_ticks: u64,
    /// Ticks in which the lane missed its latency budget
    pub budget_violations: u64,
}

/// Fast-path counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FastPathStats {
    /// Events synchronized and dispatched
    pub dispatched: u64,
    /// Sync failures or timeouts
    pub sync_failures: u64,
    /// Failed events put back into the Critical lane
    pub requeued: u64,
    /// Mean sync latency
    pub mean_latency: Duration,
    /// Worst sync latency
    pub max_latency: Duration,
}

/// Point-in-time statistics
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Last ticked frame
    pub frame_number: u64,
    /// Ticks run
    pub ticks: u64,
    /// Per-lane statistics
    pub lanes: PerPriority<LaneSnapshot>,
    /// Duration of the last tick
    pub last_tick: Duration,
    /// Mean tick duration over the frame window
    pub mean_tick: Duration,
    /// Worst tick duration over the frame window
    pub max_tick: Duration,
    /// Coefficient of variation of frame intervals
    pub frame_jitter: f64,
    /// Ticks that finished after their deadline
    pub deadline_overruns: u64,
    /// Ticks that cut at least one drain short
    pub partial_drains: u64,
    /// Fast-path counters
    pub fast_path: FastPathStats,
    /// Updates refused by the video pipeline
    pub rejected_updates: u64,
    /// Alerts raised by the last tick
    pub active_alerts: Vec<Alert>,
}

/// What one tick did to one lane
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LaneTickMetrics {
    /// Events drained
    pub drained: usize,
    /// Updates produced
    pub updates: usize,
    /// A drain was cut short by the deadline
    pub partial: bool,
    /// The lane was skipped with events pending
    pub deferred: bool,
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickMetrics {
    /// Frame ticked
    pub frame_number: u64,
    /// When the tick started
    pub started_at: Instant,
    /// Wall-clock duration
    pub duration: Duration,
    /// Deadline the tick was given
    pub deadline: Duration,
    /// Per-lane results
    pub lanes: PerPriority<LaneTickMetrics>,
}

/// Handle returned by [`Monitor::on_alert`]
pub type ObserverId = u64;

type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

struct LatencyWindow {
    samples: VecDeque<(Instant, Duration)>,
    capacity: usize,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, at: Instant, latency: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, latency));
    }

    fn expire(&mut self, now: Instant, max_age: Duration) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.saturating_duration_since(at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }

        let mut sorted: Vec<Duration> = self.samples.iter().map(|&(_, l)| l).collect();
        sorted.sort_unstable();
        let count = sorted.len();
        let total: Duration = sorted.iter().sum();

        LatencySummary {
            count,
            mean: total / count as u32,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            max: sorted[count - 1],
        }
    }
}

fn percentile(sorted: &[Duration], q: f64) -> Duration {
    // nearest-rank
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

#[derive(Default)]
struct LaneTelemetry {
    dispatched_events: u64,
    updates: u64,
    deferred_ticks: u64,
    budget_violations: u64,
}

struct MonitorState {
    latency: PerPriority<LatencyWindow>,
    lanes: PerPriority<LaneTelemetry>,
    tick_durations: VecDeque<Duration>,
    frame_intervals: VecDeque<Duration>,
    last_tick_start: Option<Instant>,
    last_tick: Duration,
    frame_number: u64,
    ticks: u64,
    deadline_overruns: u64,
    partial_drains: u64,
    active_alerts: Vec<Alert>,
}

#[derive(Default)]
struct FastPathCounters {
    dispatched: AtomicU64,
    sync_failures: AtomicU64,
    requeued: AtomicU64,
    total_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

/// Aggregates scheduler metrics and raises alerts
pub struct Monitor {
    thresholds: AlertThresholds,
    state: Mutex<MonitorState>,
    observers: RwLock<Vec<(ObserverId, AlertCallback)>>,
    next_observer: AtomicU64,
    subscribers: Mutex<Vec<Sender<Snapshot>>>,
    fast_path: FastPathCounters,
    rejected_updates: AtomicU64,
}

impl Monitor {
    /// Create a monitor
    pub fn new(thresholds: AlertThresholds) -> Self {
        let window = thresholds.latency_window;
        let frame_window = thresholds.frame_window.max(2);
        Self {
            state: Mutex::new(MonitorState {
                latency: PerPriority::from_fn(|_| LatencyWindow::new(window)),
                lanes: PerPriority::default(),
                tick_durations: VecDeque::with_capacity(frame_window),
                frame_intervals: VecDeque::with_capacity(frame_window),
                last_tick_start: None,
                last_tick: Duration::ZERO,
                frame_number: 0,
                ticks: 0,
                deadline_overruns: 0,
                partial_drains: 0,
                active_alerts: Vec::new(),
            }),
            thresholds,
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            fast_path: FastPathCounters::default(),
            rejected_updates: AtomicU64::new(0),
        }
    }

    /// Active thresholds
    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Register an alert callback
    ///
    /// Callbacks run on the ticking thread and must return quickly. They may
    /// register or remove observers; changes apply from the next tick.
    pub fn on_alert<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        let id = self.next_observer.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Unregister an alert callback; returns whether it was registered
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer, _)| *observer != id);
        observers.len() != before
    }

    /// Receive a snapshot at every reporting interval
    ///
    /// Publishing never blocks: a full receiver misses reports.
    pub fn subscribe(&self, capacity: usize) -> Receiver<Snapshot> {
        let (tx, rx) = bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    /// Record dispatch latencies for one lane
    pub fn record_latencies<I>(&self, priority: Priority, latencies: I)
    where
        I: IntoIterator<Item = Duration>,
    {
        let now = Instant::now();
        let mut state = self.state.lock();
        let window = &mut state.latency[priority];
        for latency in latencies {
            window.push(now, latency);
        }
    }

    /// Record a successful fast-path dispatch
    pub fn record_fast_path(&self, latency: Duration) {
        let nanos = latency.as_nanos() as u64;
        self.fast_path.dispatched.fetch_add(1, Ordering::Relaxed);
        self.fast_path
            .total_latency_ns
            .fetch_add(nanos, Ordering::Relaxed);
        self.fast_path
            .max_latency_ns
            .fetch_max(nanos, Ordering::Relaxed);
    }

    /// Record a fast-path sync failure
    pub fn record_sync_failure(&self, requeued: bool) {
        self.fast_path.sync_failures.fetch_add(1, Ordering::Relaxed);
        if requeued {
            self.fast_path.requeued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an update refused by the video pipeline
    pub fn record_rejected_update(&self) {
        self.rejected_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Fast-path counters
    pub fn fast_path_stats(&self) -> FastPathStats {
        let dispatched = self.fast_path.dispatched.load(Ordering::Relaxed);
        let total = self.fast_path.total_latency_ns.load(Ordering::Relaxed);
        FastPathStats {
            dispatched,
            sync_failures: self.fast_path.sync_failures.load(Ordering::Relaxed),
            requeued: self.fast_path.requeued.load(Ordering::Relaxed),
            mean_latency: Duration::from_nanos(total.checked_div(dispatched).unwrap_or(0)),
            max_latency: Duration::from_nanos(
                self.fast_path.max_latency_ns.load(Ordering::Relaxed),
            ),
        }
    }

    /// Latency distribution per lane
    pub fn latency_summaries(&self) -> PerPriority<LatencySummary> {
        let state = self.state.lock();
        state.latency.map(|_, window| window.summary())
    }

    /// Record a finished tick, evaluate thresholds and notify observers
    ///
    /// Returns the alerts raised by this tick.
    pub fn record_tick(
        &self,
        metrics: &TickMetrics,
        queues: &PerPriority<QueueStatistics>,
        settings: &OptimizationSettings,
    ) -> Vec<Alert> {
        let frame_window = self.thresholds.frame_window.max(2);
        let max_age = Duration::from_millis(self.thresholds.latency_window_ms);

        let alerts = {
            let mut state = self.state.lock();

            if let Some(previous) = state.last_tick_start {
                push_bounded(
                    &mut state.frame_intervals,
                    metrics.started_at.saturating_duration_since(previous),
                    frame_window,
                );
            }
            push_bounded(&mut state.tick_durations, metrics.duration, frame_window);
            state.last_tick_start = Some(metrics.started_at);
            state.last_tick = metrics.duration;
            state.frame_number = metrics.frame_number;
            state.ticks += 1;

            let overran = metrics.duration > metrics.deadline;
            if overran {
                state.deadline_overruns += 1;
            }
            if metrics.lanes.iter().any(|(_, lane)| lane.partial) {
                state.partial_drains += 1;
            }

            let now = Instant::now();
            let mut alerts = Vec::new();

            for (priority, lane) in metrics.lanes.iter() {
                state.latency[priority].expire(now, max_age);
                let summary = state.latency[priority].summary();

                let telemetry = &mut state.lanes[priority];
                telemetry.dispatched_events += lane.drained as u64;
                telemetry.updates += lane.updates as u64;
                if lane.deferred {
                    telemetry.deferred_ticks += 1;
                }

                let target = settings.target_latency(priority);
                let over_target = summary.count > 0 && summary.p95 > target;
                if over_target || lane.deferred {
                    telemetry.budget_violations += 1;
                    let message = if lane.deferred {
                        format!("{} lane deferred with events pending", priority)
                    } else {
                        format!(
                            "{} lane p95 latency {:.3} ms exceeds target {:.3} ms",
                            priority,
                            summary.p95.as_secs_f64() * 1000.0,
                            target.as_secs_f64() * 1000.0
                        )
                    };
                    alerts.push(Alert {
                        kind: AlertKind::LatencyBudgetViolation,
                        severity: AlertSeverity::Warning,
                        priority: Some(priority),
                        frame_number: metrics.frame_number,
                        observed: summary.p95.as_secs_f64() * 1000.0,
                        threshold: target.as_secs_f64() * 1000.0,
                        message,
                    });
                }

                let queue = &queues[priority];
                if queue.drop_count > 0
                    || queue.fill_ratio() >= self.thresholds.overflow_fill_ratio
                {
                    alerts.push(Alert {
                        kind: AlertKind::QueueOverflow,
                        severity: if queue.drop_count > 0 {
                            AlertSeverity::Error
                        } else {
                            AlertSeverity::Warning
                        },
                        priority: Some(priority),
                        frame_number: metrics.frame_number,
                        observed: queue.fill_ratio(),
                        threshold: self.thresholds.overflow_fill_ratio,
                        message: format!(
                            "{} lane at {}/{} with {} dropped this interval",
                            priority, queue.depth, queue.limit, queue.drop_count
                        ),
                    });
                }

                let contention = queue.contention_ratio() * 100.0;
                if queue.lock_acquisitions >= self.thresholds.min_lock_samples
                    && contention >= self.thresholds.contention_percent
                {
                    alerts.push(Alert {
                        kind: AlertKind::LockContention,
                        severity: AlertSeverity::Warning,
                        priority: Some(priority),
                        frame_number: metrics.frame_number,
                        observed: contention,
                        threshold: self.thresholds.contention_percent,
                        message: format!(
                            "{} lane lock contended on {:.1}% of {} acquisitions",
                            priority, contention, queue.lock_acquisitions
                        ),
                    });
                }
            }

            let jitter = coefficient_of_variation(&state.frame_intervals);
            let jittery = state.frame_intervals.len() >= 10
                && jitter > self.thresholds.frame_jitter_ratio;
            if overran || jittery {
                let message = if overran {
                    format!(
                        "tick took {:.3} ms, deadline {:.3} ms",
                        metrics.duration.as_secs_f64() * 1000.0,
                        metrics.deadline.as_secs_f64() * 1000.0
                    )
                } else {
                    format!(
                        "frame interval jitter {:.2} over {} frames",
                        jitter,
                        state.frame_intervals.len()
                    )
                };
                alerts.push(Alert {
                    kind: AlertKind::FrameTimeInconsistency,
                    severity: AlertSeverity::Warning,
                    priority: None,
                    frame_number: metrics.frame_number,
                    observed: jitter,
                    threshold: self.thresholds.frame_jitter_ratio,
                    message,
                });
            }

            state.active_alerts = alerts.clone();
            alerts
        };

        if !alerts.is_empty() {
            debug!("Frame {}: {} alert(s) active", metrics.frame_number, alerts.len());
            // callbacks may register or remove observers
            let callbacks: Vec<AlertCallback> = self
                .observers
                .read()
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            for alert in &alerts {
                for callback in &callbacks {
                    callback(alert);
                }
            }
        }

        alerts
    }

    /// Alerts raised by the last tick
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state.lock().active_alerts.clone()
    }

    /// Build a point-in-time snapshot from the given lane statistics
    pub fn snapshot(
        &self,
        queues: &PerPriority<QueueStatistics>,
        totals: &PerPriority<LaneTotals>,
    ) -> Snapshot {
        let state = self.state.lock();

        let lanes = PerPriority::from_fn(|priority| {
            let telemetry = &state.lanes[priority];
            LaneSnapshot {
                queue: queues[priority],
                totals: totals[priority],
                latency: state.latency[priority].summary(),
                dispatched_events: telemetry.dispatched_events,
                updates: telemetry.updates,
                deferred_ticks: telemetry.deferred_ticks,
                budget_violations: telemetry.budget_violations,
            }
        });

        let tick_count = state.tick_durations.len();
        let mean_tick = if tick_count > 0 {
            state.tick_durations.iter().sum::<Duration>() / tick_count as u32
        } else {
            Duration::ZERO
        };

        Snapshot {
            frame_number: state.frame_number,
            ticks: state.ticks,
            lanes,
            last_tick: state.last_tick,
            mean_tick,
            max_tick: state.tick_durations.iter().copied().max().unwrap_or_default(),
            frame_jitter: coefficient_of_variation(&state.frame_intervals),
            deadline_overruns: state.deadline_overruns,
            partial_drains: state.partial_drains,
            fast_path: self.fast_path_stats(),
            rejected_updates: self.rejected_updates.load(Ordering::Relaxed),
            active_alerts: state.active_alerts.clone(),
        }
    }

    /// Send an interval report to subscribers, dropping disconnected ones
    pub fn publish(&self, snapshot: &Snapshot) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Telemetry subscriber is not keeping up; report skipped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(AlertThresholds::default())
    }
}

fn push_bounded(queue: &mut VecDeque<Duration>, value: Duration, capacity: usize) {
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(value);
}

fn coefficient_of_variation(samples: &VecDeque<Duration>) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles_nearest_rank() {
        let mut window = LatencyWindow::new(100);
        let now = Instant::now();
        for ms in 1..=100 {
            window.push(now, Duration::from_millis(ms));
        }
        let summary = window.summary();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.p50, Duration::from_millis(50));
        assert_eq!(summary.p95, Duration::from_millis(95));
        assert_eq!(summary.p99, Duration::from_millis(99));
        assert_eq!(summary.max, Duration::from_millis(100));
    }

    #[test]
    fn test_window_is_bounded() {
        let mut window = LatencyWindow::new(4);
        let now = Instant::now();
        for ms in 1..=10 {
            window.push(now, Duration::from_millis(ms));
        }
        let summary = window.summary();
        assert_eq!(summary.count, 4);
        assert_eq!(summary.p50, Duration::from_millis(8));
    }

    #[test]
    fn test_coefficient_of_variation() {
        let steady: VecDeque<Duration> =
            std::iter::repeat(Duration::from_millis(16)).take(10).collect();
        assert!(coefficient_of_variation(&steady) < 1e-9);

        let uneven: VecDeque<Duration> = [8u64, 24, 8, 24]
            .iter()
            .map(|&ms| Duration::from_millis(ms))
            .collect();
        assert!((coefficient_of_variation(&uneven) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fast_path_counters() {
        let monitor = Monitor::default();
        monitor.record_fast_path(Duration::from_micros(100));
        monitor.record_fast_path(Duration::from_micros(300));
        monitor.record_sync_failure(true);

        let stats = monitor.fast_path_stats();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.sync_failures, 1);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.mean_latency, Duration::from_micros(200));
        assert_eq!(stats.max_latency, Duration::from_micros(300));
    }

    #[test]
    fn test_remove_observer() {
        let monitor = Monitor::default();
        let id = monitor.on_alert(|_| {});
        assert!(monitor.remove_observer(id));
        assert!(!monitor.remove_observer(id));
    }
}
