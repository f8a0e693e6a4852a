//! Adaptive batch optimizer
//!
//! Tunes batch sizes and drain intervals from observed latency, and expands
//! lane admission limits during load bursts. The tuning rules live behind the
//! [`BatchingPolicy`] trait:
//!
//! - [`ReactivePolicy`]: latency-driven shrink/grow (default)
//! - [`PredictivePolicy`]: the reactive rules plus an EWMA rate forecast that
//!   grows batches and expands depth ahead of a rising load
//!
//! Whatever the policy proposes is validated before it is accepted; a bad
//! proposal falls back to the last settings that passed.

use crate::error::{Result, SchedulerError};
use crate::event::Priority;
use crate::settings::{OptimizationSettings, PerPriority, MAX_BATCH_SIZE};
use crate::telemetry::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Optimizer bounds and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerLimits {
    /// Smallest batch size a shrink may reach
    pub min_batch_size: usize,
    /// Largest batch size a grow may reach
    pub max_batch_size: usize,
    /// Consecutive comfortable recomputes before a grow
    pub grow_after: u32,
    /// Multiplier applied on grow
    pub growth_factor: f64,
    /// Fill ratio below which a lane counts as having headroom
    pub headroom_ratio: f64,
    /// Widest drain interval for Normal and Low lanes (frames)
    pub max_drain_interval: u32,
    /// Minimum time between recomputes (ms)
    pub recompute_interval_ms: u64,
    /// Span of the load window (ms)
    pub load_window_ms: u64,
    /// Samples required before bursts are detected
    pub min_burst_samples: usize,
    /// Burst threshold and depth expansion factor
    pub burst_factor: f64,
    /// How long an expansion outlives the last burst sample (ms)
    pub burst_hold_ms: u64,
    /// Smoothing factor of the predictive rate forecast
    pub ewma_alpha: f64,
    /// Relative forecast rise that triggers pre-scaling
    pub forecast_rise: f64,
}

impl Default for OptimizerLimits {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 1024,
            grow_after: 3,
            growth_factor: 2.0,
            headroom_ratio: 0.5,
            max_drain_interval: 2,
            recompute_interval_ms: 250,
            load_window_ms: 2000,
            min_burst_samples: 5,
            burst_factor: 2.0,
            burst_hold_ms: 500,
            ewma_alpha: 0.3,
            forecast_rise: 0.2,
        }
    }
}

impl OptimizerLimits {
    /// Check the limits are usable
    pub fn validate(&self) -> Result<()> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "optimizer batch bounds {}..={} are empty",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.max_batch_size > MAX_BATCH_SIZE {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "optimizer max batch size {} exceeds {}",
                self.max_batch_size, MAX_BATCH_SIZE
            )));
        }
        if !(self.growth_factor > 1.0) || !(self.burst_factor >= 1.0) {
            return Err(SchedulerError::InvalidConfiguration(
                "growth factor must exceed 1.0 and burst factor must be at least 1.0".to_string(),
            ));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "ewma alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        if self.max_drain_interval == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "max drain interval must be at least 1 frame".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum time between recomputes
    pub fn recompute_interval(&self) -> Duration {
        Duration::from_millis(self.recompute_interval_ms)
    }
}

/// Sliding window of enqueue-rate samples for one lane
#[derive(Debug, Clone)]
pub struct LoadWindow {
    samples: VecDeque<(Instant, f64)>,
    span: Duration,
    /// Last burst and how long it holds
    burst: Option<(Instant, Duration)>,
}

impl LoadWindow {
    /// Empty window covering `span`
    pub fn new(span: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            span,
            burst: None,
        }
    }

    /// Add a sample; returns whether it counts as a burst
    ///
    /// A burst is a sample above `factor` times the mean of the samples
    /// already in the window. It keeps the lane expanded until `hold` has
    /// passed without another one.
    pub fn record(
        &mut self,
        now: Instant,
        rate: f64,
        factor: f64,
        hold: Duration,
        min_samples: usize,
    ) -> bool {
        while let Some(&(at, _)) = self.samples.front() {
            if now.saturating_duration_since(at) > self.span {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let mean = self.mean();
        let burst = self.samples.len() >= min_samples && mean > 0.0 && rate > factor * mean;
        if burst {
            self.burst = Some((now, hold));
        }
        self.samples.push_back((now, rate));
        burst
    }

    /// Mean rate over the window
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().map(|&(_, r)| r).sum::<f64>() / self.samples.len() as f64
        }
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<f64> {
        self.samples.back().map(|&(_, r)| r)
    }

    /// Number of samples held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether a burst expansion is active at `now`
    pub fn is_bursting(&self, now: Instant) -> bool {
        self.burst
            .is_some_and(|(at, hold)| now.saturating_duration_since(at) < hold)
    }
}

/// Everything a policy may look at
pub struct PolicyContext<'a> {
    /// Settings currently in force
    pub current: &'a OptimizationSettings,
    /// Latest statistics
    pub stats: &'a Snapshot,
    /// Optimizer bounds
    pub limits: &'a OptimizerLimits,
    /// Load windows per lane
    pub load: &'a PerPriority<LoadWindow>,
    /// Drain intervals currently in force
    pub drain_intervals: PerPriority<u32>,
}

/// A policy's proposal
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// Proposed settings, validated before use
    pub settings: OptimizationSettings,
    /// Drain every N frames, per lane
    pub drain_intervals: PerPriority<u32>,
    /// Expand depth ahead of a forecast load rise
    pub pre_expand: PerPriority<bool>,
}

/// Swappable batching strategy
pub trait BatchingPolicy: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Propose new settings from the latest statistics
    fn propose(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision;

    /// Forget accumulated state, e.g. after an explicit reconfiguration
    fn reset(&mut self) {}
}

/// Latency-driven rules
///
/// Lanes are visited from Critical to Low. A lane whose p95 exceeds its
/// target has its batch halved and goes back to draining every frame. A lane
/// comfortably under target (p95 below half, depth with headroom) for
/// `grow_after` recomputes grows its batch; Normal and Low may also widen to
/// draining every other frame. Nothing looser than a missing lane grows.
#[derive(Debug, Clone, Default)]
pub struct ReactivePolicy {
    streaks: PerPriority<u32>,
}

impl ReactivePolicy {
    /// Create a policy with empty streaks
    pub fn new() -> Self {
        Self::default()
    }

    fn decide(&mut self, ctx: &PolicyContext<'_>, boost: &PerPriority<bool>) -> PolicyDecision {
        let limits = ctx.limits;
        let mut settings = ctx.current.clone();
        let mut intervals = ctx.drain_intervals;
        let mut stricter_missing = false;

        for priority in Priority::ALL {
            let lane = &ctx.stats.lanes[priority];
            let target = ctx.current.target_latency(priority);
            let batch = settings.target_batch_size_per_priority[priority];
            let sampled = lane.latency.count > 0;

            if sampled && lane.latency.p95 > target {
                settings.target_batch_size_per_priority[priority] =
                    (batch / 2).max(limits.min_batch_size);
                intervals[priority] = 1;
                self.streaks[priority] = 0;
                stricter_missing = true;
                continue;
            }

            if stricter_missing {
                self.streaks[priority] = 0;
                continue;
            }

            let comfortable = lane.latency.p95 < target / 2
                && lane.queue.fill_ratio() < limits.headroom_ratio;
            if !comfortable {
                self.streaks[priority] = 0;
                continue;
            }

            self.streaks[priority] += 1;
            if self.streaks[priority] >= limits.grow_after || boost[priority] {
                self.streaks[priority] = 0;
                settings.target_batch_size_per_priority[priority] = grow(batch, limits);
                if priority.is_stricter_than(Priority::Normal) {
                    intervals[priority] = 1;
                } else if sampled {
                    intervals[priority] = (intervals[priority] + 1).min(limits.max_drain_interval);
                }
            }
        }

        PolicyDecision {
            settings,
            drain_intervals: intervals,
            pre_expand: PerPriority::default(),
        }
    }
}

fn grow(batch: usize, limits: &OptimizerLimits) -> usize {
    let grown = (batch as f64 * limits.growth_factor).ceil() as usize;
    grown.min(limits.max_batch_size).max(batch)
}

impl BatchingPolicy for ReactivePolicy {
    fn name(&self) -> &'static str {
        "reactive"
    }

    fn propose(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision {
        self.decide(ctx, &PerPriority::default())
    }

    fn reset(&mut self) {
        self.streaks = PerPriority::default();
    }
}

/// Reactive rules plus an EWMA forecast of each lane's enqueue rate
///
/// When the forecast rises by more than `forecast_rise`, the lane grows its
/// batch without waiting for a streak and its depth is expanded as for a
/// burst. The latency rules still run first and win.
#[derive(Debug, Clone, Default)]
pub struct PredictivePolicy {
    reactive: ReactivePolicy,
    ewma: PerPriority<Option<f64>>,
}

impl PredictivePolicy {
    /// Create a policy with no forecast yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Current forecast for a lane
    pub fn forecast(&self, priority: Priority) -> Option<f64> {
        self.ewma[priority]
    }
}

impl BatchingPolicy for PredictivePolicy {
    fn name(&self) -> &'static str {
        "predictive"
    }

    fn propose(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision {
        let alpha = ctx.limits.ewma_alpha;
        let mut rising = PerPriority::default();

        for priority in Priority::ALL {
            let Some(rate) = ctx.load[priority].latest() else {
                continue;
            };
            let previous = self.ewma[priority];
            let next = match previous {
                Some(prev) => alpha * rate + (1.0 - alpha) * prev,
                None => rate,
            };
            self.ewma[priority] = Some(next);

            if let Some(prev) = previous {
                let trend = next - prev;
                rising[priority] =
                    prev > 0.0 && next + trend > prev * (1.0 + ctx.limits.forecast_rise);
            }
        }

        let mut decision = self.reactive.decide(ctx, &rising);
        decision.pre_expand = rising;
        decision
    }

    fn reset(&mut self) {
        self.reactive.reset();
        self.ewma = PerPriority::default();
    }
}

/// Owns the policy, load windows and the last-known-good settings
pub struct AdaptiveBatchOptimizer {
    policy: Box<dyn BatchingPolicy>,
    custom_policy: bool,
    limits: OptimizerLimits,
    ceilings: PerPriority<usize>,
    load: PerPriority<LoadWindow>,
    drain_intervals: PerPriority<u32>,
    pre_expand: PerPriority<bool>,
    last_known_good: OptimizationSettings,
    last_recompute: Option<Instant>,
}

impl AdaptiveBatchOptimizer {
    /// Create an optimizer for lanes with the given ceilings
    ///
    /// The policy follows `settings.enable_predictive_batching`.
    pub fn new(
        limits: OptimizerLimits,
        ceilings: PerPriority<usize>,
        settings: OptimizationSettings,
    ) -> Self {
        let span = Duration::from_millis(limits.load_window_ms);
        Self {
            policy: policy_for(&settings),
            custom_policy: false,
            load: PerPriority::from_fn(|_| LoadWindow::new(span)),
            limits,
            ceilings,
            drain_intervals: PerPriority::new(1, 1, 1, 1),
            pre_expand: PerPriority::default(),
            last_known_good: settings,
            last_recompute: None,
        }
    }

    /// Replace the policy; it is kept across reconfigurations
    pub fn with_policy(mut self, policy: Box<dyn BatchingPolicy>) -> Self {
        self.policy = policy;
        self.custom_policy = true;
        self
    }

    /// Name of the active policy
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Bounds in use
    pub fn limits(&self) -> &OptimizerLimits {
        &self.limits
    }

    /// Settings of the last accepted proposal
    pub fn last_known_good(&self) -> &OptimizationSettings {
        &self.last_known_good
    }

    /// Adopt explicitly configured settings and restart tuning from them
    pub fn reset(&mut self, settings: &OptimizationSettings) {
        if !self.custom_policy {
            self.policy = policy_for(settings);
        } else {
            self.policy.reset();
        }
        self.drain_intervals = PerPriority::new(1, 1, 1, 1);
        self.pre_expand = PerPriority::default();
        self.last_known_good = settings.clone();
        info!("Optimizer reset with {} policy", self.policy.name());
    }

    /// Whether enough time passed since the last recompute
    pub fn recompute_due(&self, now: Instant) -> bool {
        self.last_recompute.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.limits.recompute_interval()
        })
    }

    /// Feed one enqueue-rate sample (events per second)
    pub fn record_load_sample(&mut self, priority: Priority, enqueue_rate: f64) {
        self.record_load_sample_at(priority, enqueue_rate, Instant::now());
    }

    /// Feed one sample taken at `now`
    pub fn record_load_sample_at(&mut self, priority: Priority, enqueue_rate: f64, now: Instant) {
        let limits = &self.limits;
        let burst = self.load[priority].record(
            now,
            enqueue_rate,
            limits.burst_factor,
            Duration::from_millis(limits.burst_hold_ms),
            limits.min_burst_samples,
        );
        if burst {
            debug!(
                "{} lane burst: {:.0} ev/s against mean {:.0}",
                priority,
                enqueue_rate,
                self.load[priority].mean()
            );
        }
    }

    /// Load window of a lane
    pub fn load_window(&self, priority: Priority) -> &LoadWindow {
        &self.load[priority]
    }

    /// Admission limit for a lane, burst-expanded if needed and never above its ceiling
    pub fn effective_queue_depth(
        &self,
        priority: Priority,
        settings: &OptimizationSettings,
    ) -> usize {
        self.effective_queue_depth_at(priority, settings, Instant::now())
    }

    /// [`effective_queue_depth`](Self::effective_queue_depth) evaluated at `now`
    pub fn effective_queue_depth_at(
        &self,
        priority: Priority,
        settings: &OptimizationSettings,
        now: Instant,
    ) -> usize {
        let base = settings.queue_depth(priority);
        let expanded = if self.load[priority].is_bursting(now) || self.pre_expand[priority] {
            (base as f64 * self.limits.burst_factor).ceil() as usize
        } else {
            base
        };
        expanded.min(self.ceilings[priority])
    }

    /// Drain every N frames for a lane
    pub fn drain_interval(&self, priority: Priority) -> u32 {
        self.drain_intervals[priority].max(1)
    }

    /// Run the policy against the latest statistics
    ///
    /// Returns the settings to use: the proposal when it validates, the
    /// last-known-good settings otherwise. Adaptive sizing disabled leaves
    /// `current` as it is.
    pub fn recompute(
        &mut self,
        current: &OptimizationSettings,
        stats: &Snapshot,
    ) -> OptimizationSettings {
        self.last_recompute = Some(Instant::now());

        if !current.enable_adaptive_sizing {
            self.drain_intervals = PerPriority::new(1, 1, 1, 1);
            self.pre_expand = PerPriority::default();
            return current.clone();
        }

        let ctx = PolicyContext {
            current,
            stats,
            limits: &self.limits,
            load: &self.load,
            drain_intervals: self.drain_intervals,
        };
        let decision = self.policy.propose(&ctx);

        if let Err(e) = decision.settings.validate_against_ceilings(&self.ceilings) {
            error!(
                "{} policy produced invalid settings, keeping last known good: {}",
                self.policy.name(),
                e
            );
            return self.last_known_good.clone();
        }

        if decision.settings != *current {
            debug!(
                "Optimizer batch sizes now {:?}",
                decision.settings.target_batch_size_per_priority
            );
        }

        let widest = self.limits.max_drain_interval.max(1);
        self.drain_intervals = decision.drain_intervals.map(|_, &n| n.clamp(1, widest));
        self.pre_expand = decision.pre_expand;
        self.last_known_good = decision.settings.clone();
        decision.settings
    }
}

fn policy_for(settings: &OptimizationSettings) -> Box<dyn BatchingPolicy> {
    if settings.enable_predictive_batching {
        Box::new(PredictivePolicy::new())
    } else {
        Box::new(ReactivePolicy::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::LatencySummary;

    fn ceilings() -> PerPriority<usize> {
        PerPriority::new(512, 4096, 4096, 4096)
    }

    fn optimizer(settings: &OptimizationSettings) -> AdaptiveBatchOptimizer {
        AdaptiveBatchOptimizer::new(OptimizerLimits::default(), ceilings(), settings.clone())
    }

    fn snapshot_with_p95(p95_ms: PerPriority<f64>) -> Snapshot {
        let mut stats = Snapshot::default();
        for priority in Priority::ALL {
            stats.lanes[priority].latency = LatencySummary {
                count: 100,
                p95: Duration::from_secs_f64(p95_ms[priority] / 1000.0),
                ..LatencySummary::default()
            };
            stats.lanes[priority].queue.limit = 1000;
        }
        stats
    }

    #[test]
    fn test_miss_halves_batch() {
        let settings = OptimizationSettings::default();
        let mut optimizer = optimizer(&settings);

        // Normal misses its 17 ms target
        let stats = snapshot_with_p95(PerPriority::new(0.1, 1.0, 30.0, 1.0));
        let next = optimizer.recompute(&settings, &stats);
        assert_eq!(next.batch_size(Priority::Normal), 32);
    }

    #[test]
    fn test_grow_after_streak_and_blocked_by_stricter_miss() {
        let settings = OptimizationSettings::default();
        let mut optimizer = optimizer(&settings);

        let calm = snapshot_with_p95(PerPriority::new(0.1, 1.0, 1.0, 1.0));
        let mut current = settings.clone();
        for _ in 0..2 {
            current = optimizer.recompute(&current, &calm);
            assert_eq!(current.batch_size(Priority::Low), 128);
        }
        current = optimizer.recompute(&current, &calm);
        assert_eq!(current.batch_size(Priority::Low), 256);
        assert_eq!(optimizer.drain_interval(Priority::Low), 2);
        assert_eq!(optimizer.drain_interval(Priority::High), 1);

        // High misses: Normal and Low may not grow
        let stressed = snapshot_with_p95(PerPriority::new(0.1, 20.0, 1.0, 1.0));
        for _ in 0..5 {
            current = optimizer.recompute(&current, &stressed);
        }
        assert_eq!(current.batch_size(Priority::Low), 256);
        assert_eq!(current.batch_size(Priority::Normal), 128);
        assert_eq!(current.batch_size(Priority::High), 2);
    }

    #[test]
    fn test_growth_capped() {
        let mut settings = OptimizationSettings::default();
        settings.target_batch_size_per_priority.low = 1000;
        let limits = OptimizerLimits {
            grow_after: 1,
            ..OptimizerLimits::default()
        };
        let mut optimizer = AdaptiveBatchOptimizer::new(limits, ceilings(), settings.clone());
        let calm = snapshot_with_p95(PerPriority::new(0.1, 1.0, 1.0, 1.0));
        let next = optimizer.recompute(&settings, &calm);
        assert_eq!(next.batch_size(Priority::Low), 1024);
    }

    #[test]
    fn test_adaptive_sizing_disabled_returns_current() {
        let settings = OptimizationSettings {
            enable_adaptive_sizing: false,
            ..OptimizationSettings::default()
        };
        let mut optimizer = optimizer(&settings);
        let stats = snapshot_with_p95(PerPriority::new(5.0, 50.0, 50.0, 500.0));
        assert_eq!(optimizer.recompute(&settings, &stats), settings);
    }

    #[test]
    fn test_unbounded_burst_hold_never_lapses() {
        let mut window = LoadWindow::new(Duration::from_secs(2));
        let start = Instant::now();
        for i in 0..5 {
            window.record(start + Duration::from_millis(i), 10.0, 2.0, Duration::MAX, 5);
        }
        let at = start + Duration::from_millis(5);
        assert!(window.record(at, 100.0, 2.0, Duration::MAX, 5));
        assert!(window.is_bursting(at + Duration::from_secs(3600)));
    }

    #[test]
    fn test_burst_expands_depth_then_lapses() {
        let settings = OptimizationSettings::default();
        let mut optimizer = optimizer(&settings);
        let start = Instant::now();
        assert!(optimizer.load_window(Priority::Normal).is_empty());

        for i in 0..10 {
            let at = start + Duration::from_millis(i * 16);
            optimizer.record_load_sample_at(Priority::Normal, 1000.0, at);
        }
        assert_eq!(optimizer.load_window(Priority::Normal).len(), 10);
        let burst_at = start + Duration::from_millis(160);
        assert_eq!(optimizer.effective_queue_depth_at(Priority::Normal, &settings, burst_at), 2048);

        optimizer.record_load_sample_at(Priority::Normal, 5000.0, burst_at);
        assert_eq!(optimizer.effective_queue_depth_at(Priority::Normal, &settings, burst_at), 4096);
        assert_eq!(
            optimizer.effective_queue_depth_at(
                Priority::Normal,
                &settings,
                burst_at + Duration::from_millis(600)
            ),
            2048
        );
    }

    #[test]
    fn test_burst_expansion_clamped_to_ceiling() {
        let settings = OptimizationSettings::default();
        let small = PerPriority::new(300, 4096, 4096, 4096);
        let mut optimizer =
            AdaptiveBatchOptimizer::new(OptimizerLimits::default(), small, settings.clone());
        let start = Instant::now();
        for i in 0..6 {
            let at = start + Duration::from_millis(i);
            optimizer.record_load_sample_at(Priority::Critical, 10.0, at);
        }
        let burst_at = start + Duration::from_millis(7);
        optimizer.record_load_sample_at(Priority::Critical, 100.0, burst_at);
        assert_eq!(
            optimizer.effective_queue_depth_at(
                Priority::Critical,
                &settings,
                start + Duration::from_millis(8)
            ),
            300
        );
    }

    struct BrokenPolicy;

    impl BatchingPolicy for BrokenPolicy {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn propose(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision {
            let mut settings = ctx.current.clone();
            settings.target_batch_size_per_priority.normal = 0;
            PolicyDecision {
                settings,
                drain_intervals: ctx.drain_intervals,
                pre_expand: PerPriority::default(),
            }
        }
    }

    #[test]
    fn test_invalid_proposal_falls_back_to_last_known_good() {
        let settings = OptimizationSettings::default();
        let mut optimizer = optimizer(&settings).with_policy(Box::new(BrokenPolicy));
        let next = optimizer.recompute(&settings, &Snapshot::default());
        assert_eq!(next, settings);
        assert_eq!(optimizer.policy_name(), "broken");
    }

    #[test]
    fn test_predictive_pre_grows_on_rising_forecast() {
        let settings = OptimizationSettings {
            enable_predictive_batching: true,
            ..OptimizationSettings::default()
        };
        let mut optimizer = optimizer(&settings);
        assert_eq!(optimizer.policy_name(), "predictive");

        let calm = snapshot_with_p95(PerPriority::new(0.1, 1.0, 1.0, 1.0));
        let start = Instant::now();
        optimizer.record_load_sample_at(Priority::High, 1000.0, start);
        let current = optimizer.recompute(&settings, &calm);
        assert_eq!(current.batch_size(Priority::High), 32);

        optimizer.record_load_sample_at(Priority::High, 4000.0, start + Duration::from_millis(250));
        let current = optimizer.recompute(&current, &calm);
        assert_eq!(current.batch_size(Priority::High), 64);
        assert_eq!(
            optimizer.effective_queue_depth_at(
                Priority::High,
                &current,
                start + Duration::from_millis(250)
            ),
            2048
        );
    }

    #[test]
    fn test_limits_validation() {
        assert!(OptimizerLimits::default().validate().is_ok());
        let bad = OptimizerLimits {
            min_batch_size: 0,
            ..OptimizerLimits::default()
        };
        assert!(bad.validate().is_err());
        let bad = OptimizerLimits {
            growth_factor: 1.0,
            ..OptimizerLimits::default()
        };
        assert!(bad.validate().is_err());
    }
}
