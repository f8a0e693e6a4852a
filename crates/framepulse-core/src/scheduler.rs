//! Frame-coherent scheduler
//!
//! One consumer owns the [`Scheduler`] and calls [`Scheduler::tick`] once per
//! rendered frame. Any number of [`EventProducer`] handles feed the lanes from
//! other threads. A tick runs `Idle -> Draining -> Dispatching -> Idle`:
//!
//! 1. load the settings snapshot, apply lane limits, sync with the pipeline
//! 2. drain lanes in priority order until the drain deadline
//! 3. reduce the batches to updates and hand them to the pipeline
//! 4. feed the optimizer and telemetry
//!
//! Critical events may bypass the tick through
//! [`EventProducer::process_critical_event_now`], which never touches tick
//! state and so never waits for a tick in progress.

use crate::adapters::{FrameSyncInfo, SyncAdapter, SyncFailure, SyncResult, VideoPipelineAdapter};
use crate::aggregate::Aggregator;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::event::{AudioEvent, Clock, EventKind, Priority};
use crate::lane::{Batch, EnqueueResult, LaneSet, LaneTotals, QueueStatistics};
use crate::optimizer::{AdaptiveBatchOptimizer, BatchingPolicy};
use crate::settings::{OptimizationSettings, PerPriority};
use crate::telemetry::{Alert, LaneTickMetrics, Monitor, ObserverId, Snapshot, TickMetrics};
use arc_swap::ArcSwap;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Where the tick state machine is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Between ticks
    Idle,
    /// Pulling batches out of the lanes
    Draining,
    /// Handing updates to the pipeline
    Dispatching,
}

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Frame ticked
    pub frame_number: u64,
    /// The frame number did not increase, nothing was done
    pub skipped: bool,
    /// Deadline the tick was given
    pub deadline: Duration,
    /// Time spent draining
    pub drain_time: Duration,
    /// Total tick duration
    pub duration: Duration,
    /// Per-lane results
    pub lanes: PerPriority<LaneTickMetrics>,
    /// Lanes not drained on this frame because of their drain interval
    pub interval_skipped: Vec<Priority>,
    /// Updates accepted by the pipeline
    pub updates_dispatched: usize,
    /// Updates refused by the pipeline
    pub updates_rejected: usize,
    /// Pipeline state reported at the start of the tick
    pub frame_sync: Option<FrameSyncInfo>,
    /// Alerts raised by this tick
    pub alerts: Vec<Alert>,
}

impl TickReport {
    fn skipped(frame_number: u64, deadline: Duration) -> Self {
        Self {
            frame_number,
            skipped: true,
            deadline,
            drain_time: Duration::ZERO,
            duration: Duration::ZERO,
            lanes: PerPriority::default(),
            interval_skipped: Vec::new(),
            updates_dispatched: 0,
            updates_rejected: 0,
            frame_sync: None,
            alerts: Vec::new(),
        }
    }

    /// Events drained across all lanes
    pub fn total_drained(&self) -> usize {
        self.lanes.iter().map(|(_, lane)| lane.drained).sum()
    }

    /// Events drained from one lane
    pub fn drained(&self, priority: Priority) -> usize {
        self.lanes[priority].drained
    }

    /// A drain was cut short by the deadline
    pub fn partial_drain(&self) -> bool {
        self.lanes.iter().any(|(_, lane)| lane.partial)
    }

    /// Lanes skipped with events pending because time ran out
    pub fn deferred(&self) -> Vec<Priority> {
        self.lanes
            .iter()
            .filter(|(_, lane)| lane.deferred)
            .map(|(priority, _)| priority)
            .collect()
    }

    /// Whether the tick finished inside its deadline
    pub fn met_deadline(&self) -> bool {
        self.duration <= self.deadline
    }
}

struct SchedulerShared {
    lanes: LaneSet,
    settings: ArcSwap<OptimizationSettings>,
    monitor: Arc<Monitor>,
    sync: Arc<dyn SyncAdapter>,
    video: Arc<dyn VideoPipelineAdapter>,
    aggregator: Aggregator,
    clock: Clock,
    sync_timeout: Duration,
    next_sequence: AtomicU64,
    next_frame: AtomicU64,
    fast_path_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SchedulerShared {
    fn event(&self, priority: Priority, kind: EventKind, intensity: f32) -> AudioEvent {
        AudioEvent::new(
            self.clock.now(),
            priority,
            kind,
            intensity,
            self.next_sequence.fetch_add(1, Ordering::Relaxed),
        )
    }

    fn process_critical_event_now(&self, event: AudioEvent) -> SyncResult {
        let started = Instant::now();

        if event.priority != Priority::Critical {
            if let Err(rejected) = self.lanes.enqueue(event) {
                trace!("Non-critical fast-path event refused: {:?}", rejected.reason);
            }
            return SyncResult::failed(SyncFailure::NotCritical, started.elapsed());
        }

        let _in_flight = InFlight::enter(&self.fast_path_in_flight);
        let result = self.sync.synchronize(&event, self.sync_timeout);
        let latency = started.elapsed();

        if !result.success || latency > self.sync_timeout {
            let failure = if result.success {
                SyncFailure::Timeout
            } else {
                result.failure.unwrap_or(SyncFailure::Unavailable)
            };
            let sequence = event.sequence;
            let requeued = match self.lanes.lane(Priority::Critical).requeue(event) {
                Ok(_) => true,
                Err(rejected) => {
                    warn!(
                        "Critical event {} lost: fast path {} and lane refused it ({:?})",
                        sequence, failure, rejected.reason
                    );
                    false
                }
            };
            if requeued {
                let error = SchedulerError::SyncUnavailable(failure.to_string());
                warn!("{}; critical event {} requeued", error, sequence);
            }
            self.monitor.record_sync_failure(requeued);
            return SyncResult::failed(failure, latency);
        }

        let frame_number = self.next_frame.load(Ordering::Acquire);
        let generated_at = result.sync_timestamp.unwrap_or_else(|| self.clock.now());
        let update = self.aggregator.map_event(&event, frame_number, generated_at);

        if let Err(rejected) = self.video.apply_update(update) {
            warn!("Fast path: {}", SchedulerError::from(rejected));
            self.monitor.record_rejected_update();
        } else {
            self.monitor.record_fast_path(latency);
        }

        SyncResult {
            latency,
            ..result
        }
    }

    fn queue_statistics(&self, interval: Duration) -> PerPriority<QueueStatistics> {
        PerPriority::from_fn(|priority| self.lanes.lane(priority).peek_statistics(interval))
    }

    fn totals(&self) -> PerPriority<LaneTotals> {
        PerPriority::from_fn(|priority| self.lanes.lane(priority).totals())
    }
}

/// Producer handle, cheap to clone and safe to move to other threads
#[derive(Clone)]
pub struct EventProducer {
    shared: Arc<SchedulerShared>,
}

impl EventProducer {
    /// Build an event stamped with the scheduler clock and the next sequence number
    pub fn event(&self, priority: Priority, kind: EventKind, intensity: f32) -> AudioEvent {
        self.shared.event(priority, kind, intensity)
    }

    /// Enqueue into the lane matching the event's priority
    pub fn submit_event(&self, event: AudioEvent) -> EnqueueResult {
        self.shared.lanes.enqueue(event)
    }

    /// Synchronize and dispatch a Critical event immediately
    ///
    /// On failure the event goes back to the front of the Critical lane and
    /// the next tick dispatches it. Non-Critical events are enqueued normally
    /// and reported as [`SyncFailure::NotCritical`].
    pub fn process_critical_event_now(&self, event: AudioEvent) -> SyncResult {
        self.shared.process_critical_event_now(event)
    }

    /// Settings currently in force
    pub fn settings(&self) -> Arc<OptimizationSettings> {
        self.shared.settings.load_full()
    }
}

/// Frame-coherent audio-to-visual scheduler
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    optimizer: AdaptiveBatchOptimizer,
    dispatch_reserve: f64,
    report_interval: Duration,
    state: SchedulerState,
    last_frame: Option<u64>,
    last_report: Instant,
    last_sample: Instant,
    last_totals: PerPriority<LaneTotals>,
}

impl Scheduler {
    /// Create a scheduler with its own clock
    ///
    /// Fails when the configuration does not validate.
    pub fn new(
        config: SchedulerConfig,
        sync: Arc<dyn SyncAdapter>,
        video: Arc<dyn VideoPipelineAdapter>,
    ) -> Result<Self> {
        Self::with_clock(config, Clock::new(), sync, video)
    }

    /// Create a scheduler on a shared clock, e.g. the one a [`crate::adapters::ClockSync`] uses
    pub fn with_clock(
        config: SchedulerConfig,
        clock: Clock,
        sync: Arc<dyn SyncAdapter>,
        video: Arc<dyn VideoPipelineAdapter>,
    ) -> Result<Self> {
        config.validate()?;

        let ceilings = config.ceilings();
        let settings = config.settings.clone();
        let lanes = LaneSet::new(
            &ceilings,
            &settings.target_queue_depth_per_priority,
            config.clock_skew_tolerance(),
            Some(config.low_value_intensity),
        );
        let optimizer =
            AdaptiveBatchOptimizer::new(config.optimizer.clone(), ceilings, settings.clone());

        info!(
            "Scheduler ready: {} policy, ceilings {:?}, sync timeout {:?}",
            optimizer.policy_name(),
            ceilings,
            config.sync_timeout()
        );

        let now = Instant::now();
        Ok(Self {
            shared: Arc::new(SchedulerShared {
                lanes,
                settings: ArcSwap::from_pointee(settings),
                monitor: Arc::new(Monitor::new(config.alerts.clone())),
                sync,
                video,
                aggregator: Aggregator::new(config.aggregation.clone()),
                clock,
                sync_timeout: config.sync_timeout(),
                next_sequence: AtomicU64::new(0),
                next_frame: AtomicU64::new(0),
                fast_path_in_flight: AtomicUsize::new(0),
            }),
            optimizer,
            dispatch_reserve: config.dispatch_reserve,
            report_interval: config.report_interval(),
            state: SchedulerState::Idle,
            last_frame: None,
            last_report: now,
            last_sample: now,
            last_totals: PerPriority::default(),
        })
    }

    /// Replace the batching policy
    pub fn with_policy(mut self, policy: Box<dyn BatchingPolicy>) -> Self {
        self.optimizer = self.optimizer.with_policy(policy);
        self
    }

    /// New producer handle
    pub fn producer(&self) -> EventProducer {
        EventProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Clock events are stamped with
    pub fn clock(&self) -> Clock {
        self.shared.clock
    }

    /// Telemetry monitor
    pub fn monitor(&self) -> Arc<Monitor> {
        Arc::clone(&self.shared.monitor)
    }

    /// Tick state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Fast-path calls currently running
    pub fn fast_path_active(&self) -> usize {
        self.shared.fast_path_in_flight.load(Ordering::Acquire)
    }

    /// Pending events in one lane
    pub fn queue_depth(&self, priority: Priority) -> usize {
        self.shared.lanes.lane(priority).depth()
    }

    /// Current admission limit of one lane
    pub fn queue_limit(&self, priority: Priority) -> usize {
        self.shared.lanes.lane(priority).limit()
    }

    /// Name of the active batching policy
    pub fn policy_name(&self) -> &'static str {
        self.optimizer.policy_name()
    }

    /// Drain interval the optimizer assigned to a lane
    pub fn drain_interval(&self, priority: Priority) -> u32 {
        self.optimizer.drain_interval(priority)
    }

    /// Settings currently in force
    pub fn settings(&self) -> Arc<OptimizationSettings> {
        self.shared.settings.load_full()
    }

    /// Enqueue an event
    pub fn submit_event(&self, event: AudioEvent) -> EnqueueResult {
        self.shared.lanes.enqueue(event)
    }

    /// Synchronize and dispatch a Critical event immediately
    pub fn process_critical_event_now(&self, event: AudioEvent) -> SyncResult {
        self.shared.process_critical_event_now(event)
    }

    /// Validate and swap in new settings
    ///
    /// Invalid settings are rejected and the current ones stay. Settings equal
    /// to the current ones change nothing.
    pub fn configure(&mut self, settings: OptimizationSettings) -> Result<()> {
        if *self.shared.settings.load_full() == settings {
            debug!("Configure with identical settings ignored");
            return Ok(());
        }

        settings.validate_against_ceilings(&self.shared.lanes.ceilings())?;

        self.optimizer.reset(&settings);
        for lane in self.shared.lanes.iter() {
            lane.set_limit(settings.queue_depth(lane.priority()));
        }
        self.shared.settings.store(Arc::new(settings));
        info!("Optimization settings replaced");
        Ok(())
    }

    /// Register an alert callback
    pub fn on_alert<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        self.shared.monitor.on_alert(callback)
    }

    /// Unregister an alert callback
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.monitor.remove_observer(id)
    }

    /// Receive a snapshot at every reporting interval
    pub fn subscribe(&self, capacity: usize) -> Receiver<Snapshot> {
        self.shared.monitor.subscribe(capacity)
    }

    /// Point-in-time statistics
    pub fn get_statistics(&self) -> Snapshot {
        let interval = self.last_report.elapsed();
        self.shared
            .monitor
            .snapshot(&self.shared.queue_statistics(interval), &self.shared.totals())
    }

    /// Run one frame
    ///
    /// `frame_number` must increase from call to call; a repeated or older
    /// number is logged and nothing happens.
    pub fn tick(&mut self, frame_number: u64, deadline: Duration) -> TickReport {
        let started = Instant::now();

        if let Some(last) = self.last_frame {
            if frame_number <= last {
                warn!(
                    "Frame {} does not follow frame {}; tick skipped",
                    frame_number, last
                );
                return TickReport::skipped(frame_number, deadline);
            }
        }
        self.last_frame = Some(frame_number);

        let shared = Arc::clone(&self.shared);
        shared
            .next_frame
            .store(frame_number.saturating_add(1), Ordering::Release);

        let settings = shared.settings.load_full();
        for lane in shared.lanes.iter() {
            lane.set_limit(
                self.optimizer
                    .effective_queue_depth(lane.priority(), &settings),
            );
        }
        let frame_sync = shared.video.notify_frame_sync(frame_number);
        if let Some(lag) = frame_sync.frame_lag() {
            if lag > 1 {
                debug!("Pipeline is {} frames behind frame {}", lag, frame_number);
            }
        }

        // Draining
        self.state = SchedulerState::Draining;
        // None when the deadline is too large to represent: drain without a time limit
        let drain_deadline =
            Duration::try_from_secs_f64(deadline.as_secs_f64() * (1.0 - self.dispatch_reserve))
                .ok()
                .and_then(|drain| started.checked_add(drain));
        let past_drain_deadline =
            || drain_deadline.map_or(false, |at| Instant::now() >= at);
        let mut lanes = PerPriority::<LaneTickMetrics>::default();
        let mut interval_skipped = Vec::new();
        let mut batches: Vec<Batch> = Vec::new();
        let mut out_of_time = false;

        for lane in shared.lanes.iter() {
            let priority = lane.priority();
            let quota = lane.depth();
            if quota == 0 {
                continue;
            }

            let interval = u64::from(self.optimizer.drain_interval(priority));
            if interval > 1 && frame_number % interval != 0 {
                interval_skipped.push(priority);
                continue;
            }

            if out_of_time || past_drain_deadline() {
                out_of_time = true;
                lanes[priority].deferred = true;
                warn!(
                    "Frame {}: {} lane deferred with {} pending",
                    frame_number, priority, quota
                );
                continue;
            }

            let batch_size = settings.batch_size(priority);
            let mut drained = 0;
            while drained < quota {
                let remaining = drain_deadline.map_or(Duration::MAX, |at| {
                    at.saturating_duration_since(Instant::now())
                });
                let batch = lane.drain_batch(batch_size.min(quota - drained), remaining);
                let exhausted = batch.budget_exhausted();
                let empty = batch.is_empty();
                drained += batch.len();
                if !empty {
                    batches.push(batch);
                }
                if exhausted {
                    lanes[priority].partial = true;
                    out_of_time = true;
                    break;
                }
                if empty {
                    break;
                }
            }
            lanes[priority].drained = drained;
        }
        let drain_time = started.elapsed();

        // Dispatching
        self.state = SchedulerState::Dispatching;
        let generated_at = shared.clock.now();
        let mut updates_dispatched = 0;
        let mut updates_rejected = 0;

        for batch in &batches {
            let priority = batch.priority();
            shared.monitor.record_latencies(
                priority,
                batch
                    .events()
                    .iter()
                    .map(|event| generated_at.saturating_duration_since(event.timestamp)),
            );

            let updates = shared.aggregator.reduce(batch, frame_number, generated_at);
            lanes[priority].updates += updates.len();
            for update in updates {
                match shared.video.apply_update(update) {
                    Ok(_) => updates_dispatched += 1,
                    Err(rejected) => {
                        warn!("Frame {}: {}", frame_number, SchedulerError::from(rejected));
                        shared.monitor.record_rejected_update();
                        updates_rejected += 1;
                    }
                }
            }
        }

        // Idle
        self.state = SchedulerState::Idle;
        let now = Instant::now();
        let totals = shared.totals();
        let sample_secs = now.saturating_duration_since(self.last_sample).as_secs_f64();
        if sample_secs > 0.0 {
            for priority in Priority::ALL {
                let accepted = totals[priority]
                    .enqueued
                    .saturating_sub(self.last_totals[priority].enqueued);
                self.optimizer
                    .record_load_sample_at(priority, accepted as f64 / sample_secs, now);
            }
        }
        self.last_totals = totals;
        self.last_sample = now;

        let report_age = now.saturating_duration_since(self.last_report);
        let queues = shared.queue_statistics(report_age);

        if self.optimizer.recompute_due(now) {
            let stats = shared.monitor.snapshot(&queues, &totals);
            let next = self.optimizer.recompute(&settings, &stats);
            if next != *settings {
                shared.settings.store(Arc::new(next));
            }
        }

        let duration = started.elapsed();
        let alerts = shared.monitor.record_tick(
            &TickMetrics {
                frame_number,
                started_at: started,
                duration,
                deadline,
                lanes,
            },
            &queues,
            &settings,
        );

        if report_age >= self.report_interval {
            let queues = PerPriority::from_fn(|priority| {
                shared.lanes.lane(priority).take_statistics(report_age)
            });
            let report = shared.monitor.snapshot(&queues, &totals);
            debug!(
                "Report at frame {}: {} pending, mean tick {:?}, {} alert(s)",
                frame_number,
                shared.lanes.total_depth(),
                report.mean_tick,
                report.active_alerts.len()
            );
            shared.monitor.publish(&report);
            self.last_report = now;
        }

        TickReport {
            frame_number,
            skipped: false,
            deadline,
            drain_time,
            duration,
            lanes,
            interval_skipped,
            updates_dispatched,
            updates_rejected,
            frame_sync: Some(frame_sync),
            alerts,
        }
    }
}
