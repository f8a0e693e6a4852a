//! Priority lanes - bounded multi-producer/single-consumer queues, one per priority
//!
//! Producers push with a very short critical section and get a rejection instead
//! of blocking when the lane is full. The scheduler drains batches under a time
//! budget. Every counter lives in atomics owned by the lane, so statistics can be
//! read without touching the buffer lock.
//!
//! The effective admission limit can be raised for bursts, but never above the
//! hard ceiling fixed at construction.

use crate::event::{AudioEvent, Priority};
use crate::settings::PerPriority;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Events popped per lock acquisition while draining
const DRAIN_CHUNK: usize = 64;

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Lane at its admission limit
    Overflow,
    /// Timestamp older than the newest accepted one by more than the skew tolerance
    StaleTimestamp,
    /// Intensity or frequency out of range
    InvalidEvent,
    /// Event priority does not match the lane
    WrongLane,
}

/// Successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Lane depth right after the push
    pub depth: usize,
    /// A low-value Critical member was evicted to make room
    pub evicted: bool,
}

/// Refused enqueue; the event is handed back so the caller can coalesce,
/// drop, or (for Critical) escalate it
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Why the lane refused the event
    pub reason: RejectReason,
    /// The refused event
    pub event: AudioEvent,
}

/// Result of an enqueue
pub type EnqueueResult = std::result::Result<Accepted, Rejected>;

/// Same-priority events collected in one drain
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    priority: Priority,
    events: Vec<AudioEvent>,
    budget_exhausted: bool,
}

impl Batch {
    /// Empty batch for a lane
    pub fn empty(priority: Priority) -> Self {
        Self {
            priority,
            events: Vec::new(),
            budget_exhausted: false,
        }
    }

    /// Priority shared by every member
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The drain stopped on its time budget with events still pending
    pub fn budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }

    /// Events in dispatch order
    pub fn events(&self) -> &[AudioEvent] {
        &self.events
    }

    /// Take the events
    pub fn into_events(self) -> Vec<AudioEvent> {
        self.events
    }
}

/// Per-interval lane statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QueueStatistics {
    /// Current depth
    pub depth: usize,
    /// Highest depth seen during the interval
    pub peak_depth: usize,
    /// Current admission limit
    pub limit: usize,
    /// Hard ceiling
    pub ceiling: usize,
    /// Accepted events per second over the interval
    pub enqueue_rate: f64,
    /// Events dropped on overflow or evicted
    pub drop_count: u64,
    /// Lock acquisitions that had to wait
    pub contention_samples: u64,
    /// All lock acquisitions
    pub lock_acquisitions: u64,
    /// Accepted events
    pub enqueued: u64,
    /// Drained events
    pub dequeued: u64,
    /// Events refused as invalid or stale
    pub invalid_count: u64,
    /// Critical members evicted to make room
    pub evicted_count: u64,
}

impl QueueStatistics {
    /// Share of lock acquisitions that were contended (0.0 - 1.0)
    pub fn contention_ratio(&self) -> f64 {
        if self.lock_acquisitions == 0 {
            0.0
        } else {
            self.contention_samples as f64 / self.lock_acquisitions as f64
        }
    }

    /// Depth relative to the admission limit (0.0 - 1.0)
    pub fn fill_ratio(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            self.depth as f64 / self.limit as f64
        }
    }
}

/// Lifetime lane counters, never reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneTotals {
    /// Accepted events
    pub enqueued: u64,
    /// Drained events
    pub dequeued: u64,
    /// Dropped events (overflow and eviction)
    pub dropped: u64,
    /// Invalid or stale events
    pub invalid: u64,
}

#[derive(Default)]
struct IntervalCounters {
    peak_depth: AtomicUsize,
    drops: AtomicU64,
    contention: AtomicU64,
    lock_acquisitions: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    invalid: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Default)]
struct TotalCounters {
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
}

/// Bounded MPSC queue for one priority class
pub struct PriorityLane {
    priority: Priority,
    ceiling: usize,
    limit: AtomicUsize,
    depth: AtomicUsize,
    newest_timestamp: AtomicU64,
    skew_tolerance_ns: u64,
    eviction_threshold: Option<f32>,
    buffer: Mutex<VecDeque<AudioEvent>>,
    interval: IntervalCounters,
    totals: TotalCounters,
}

impl PriorityLane {
    /// Create a lane
    ///
    /// `limit` is clamped to `ceiling`. Only a Critical lane honours
    /// `eviction_threshold`.
    pub fn new(
        priority: Priority,
        ceiling: usize,
        limit: usize,
        skew_tolerance: Duration,
        eviction_threshold: Option<f32>,
    ) -> Self {
        let ceiling = ceiling.max(1);
        let eviction_threshold = if priority == Priority::Critical {
            eviction_threshold
        } else {
            None
        };

        Self {
            priority,
            ceiling,
            limit: AtomicUsize::new(limit.clamp(1, ceiling)),
            depth: AtomicUsize::new(0),
            newest_timestamp: AtomicU64::new(0),
            skew_tolerance_ns: skew_tolerance.as_nanos() as u64,
            eviction_threshold,
            buffer: Mutex::new(VecDeque::with_capacity(ceiling)),
            interval: IntervalCounters::default(),
            totals: TotalCounters::default(),
        }
    }

    /// Priority served by this lane
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Hard ceiling
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Current admission limit
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Set the admission limit, clamped to `1..=ceiling`; returns the applied value
    ///
    /// Lowering the limit below the current depth evicts nothing: new
    /// enqueues are refused until the lane drains below it.
    pub fn set_limit(&self, limit: usize) -> usize {
        let applied = limit.clamp(1, self.ceiling);
        self.limit.store(applied, Ordering::Release);
        applied
    }

    /// Pending events
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Push an event, never blocking beyond the push itself
    pub fn enqueue(&self, event: AudioEvent) -> EnqueueResult {
        if event.priority != self.priority {
            return self.reject_invalid(RejectReason::WrongLane, event);
        }
        if !event.is_valid() {
            return self.reject_invalid(RejectReason::InvalidEvent, event);
        }

        let newest = self.newest_timestamp.load(Ordering::Acquire);
        if event
            .timestamp
            .as_nanos()
            .saturating_add(self.skew_tolerance_ns)
            < newest
        {
            return self.reject_invalid(RejectReason::StaleTimestamp, event);
        }

        let timestamp = event.timestamp;
        let accepted = self.push(event, false)?;
        self.newest_timestamp
            .fetch_max(timestamp.as_nanos(), Ordering::AcqRel);
        Ok(accepted)
    }

    /// Put an event back at the front of the lane, skipping the timestamp check
    ///
    /// Used for Critical events whose fast-path synchronization failed; their
    /// timestamp is legitimately older than what the lane has seen since.
    pub fn requeue(&self, event: AudioEvent) -> EnqueueResult {
        if event.priority != self.priority {
            return self.reject_invalid(RejectReason::WrongLane, event);
        }
        self.push(event, true)
    }

    fn push(&self, event: AudioEvent, front: bool) -> EnqueueResult {
        let mut buffer = self.lock();
        let limit = self.limit.load(Ordering::Acquire);

        let mut evicted = false;
        if buffer.len() >= limit {
            let victim = self.eviction_threshold.and_then(|threshold| {
                buffer.iter().position(|queued| queued.intensity < threshold)
            });

            match victim {
                Some(index) => {
                    buffer.remove(index);
                    evicted = true;
                    self.interval.evicted.fetch_add(1, Ordering::Relaxed);
                    self.count_drop();
                }
                None => {
                    drop(buffer);
                    self.count_drop();
                    trace!("{} lane overflow at limit {}", self.priority, limit);
                    return Err(Rejected {
                        reason: RejectReason::Overflow,
                        event,
                    });
                }
            }
        }

        if front {
            buffer.push_front(event);
        } else {
            buffer.push_back(event);
        }
        let depth = buffer.len();
        self.depth.store(depth, Ordering::Release);
        drop(buffer);

        self.interval.peak_depth.fetch_max(depth, Ordering::Relaxed);
        self.interval.enqueued.fetch_add(1, Ordering::Relaxed);
        self.totals.enqueued.fetch_add(1, Ordering::Relaxed);

        Ok(Accepted { depth, evicted })
    }

    /// Pop up to `max_count` events in FIFO order, stopping early once
    /// `time_budget` is spent
    ///
    /// Never blocks waiting for events: an idle lane yields an empty batch.
    pub fn drain_batch(&self, max_count: usize, time_budget: Duration) -> Batch {
        let start = Instant::now();
        let mut events = Vec::with_capacity(max_count.min(self.depth()));
        let mut budget_exhausted = false;

        while events.len() < max_count {
            if start.elapsed() >= time_budget {
                budget_exhausted = !self.is_empty();
                break;
            }

            let mut buffer = self.lock();
            let take = (max_count - events.len()).min(DRAIN_CHUNK).min(buffer.len());
            events.extend(buffer.drain(..take));
            let remaining = buffer.len();
            self.depth.store(remaining, Ordering::Release);
            drop(buffer);

            if take == 0 || remaining == 0 {
                break;
            }
        }

        let drained = events.len() as u64;
        if drained > 0 {
            self.interval.dequeued.fetch_add(drained, Ordering::Relaxed);
            self.totals.dequeued.fetch_add(drained, Ordering::Relaxed);
        }

        Batch {
            priority: self.priority,
            events,
            budget_exhausted,
        }
    }

    /// Read interval statistics without resetting them
    pub fn peek_statistics(&self, interval: Duration) -> QueueStatistics {
        let enqueued = self.interval.enqueued.load(Ordering::Relaxed);
        QueueStatistics {
            depth: self.depth(),
            peak_depth: self.interval.peak_depth.load(Ordering::Relaxed),
            limit: self.limit(),
            ceiling: self.ceiling,
            enqueue_rate: rate(enqueued, interval),
            drop_count: self.interval.drops.load(Ordering::Relaxed),
            contention_samples: self.interval.contention.load(Ordering::Relaxed),
            lock_acquisitions: self.interval.lock_acquisitions.load(Ordering::Relaxed),
            enqueued,
            dequeued: self.interval.dequeued.load(Ordering::Relaxed),
            invalid_count: self.interval.invalid.load(Ordering::Relaxed),
            evicted_count: self.interval.evicted.load(Ordering::Relaxed),
        }
    }

    /// Read and reset interval statistics
    pub fn take_statistics(&self, interval: Duration) -> QueueStatistics {
        let depth = self.depth();
        let enqueued = self.interval.enqueued.swap(0, Ordering::Relaxed);
        QueueStatistics {
            depth,
            peak_depth: self.interval.peak_depth.swap(depth, Ordering::Relaxed),
            limit: self.limit(),
            ceiling: self.ceiling,
            enqueue_rate: rate(enqueued, interval),
            drop_count: self.interval.drops.swap(0, Ordering::Relaxed),
            contention_samples: self.interval.contention.swap(0, Ordering::Relaxed),
            lock_acquisitions: self.interval.lock_acquisitions.swap(0, Ordering::Relaxed),
            enqueued,
            dequeued: self.interval.dequeued.swap(0, Ordering::Relaxed),
            invalid_count: self.interval.invalid.swap(0, Ordering::Relaxed),
            evicted_count: self.interval.evicted.swap(0, Ordering::Relaxed),
        }
    }

    /// Lifetime counters
    pub fn totals(&self) -> LaneTotals {
        LaneTotals {
            enqueued: self.totals.enqueued.load(Ordering::Relaxed),
            dequeued: self.totals.dequeued.load(Ordering::Relaxed),
            dropped: self.totals.dropped.load(Ordering::Relaxed),
            invalid: self.totals.invalid.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AudioEvent>> {
        self.interval
            .lock_acquisitions
            .fetch_add(1, Ordering::Relaxed);
        match self.buffer.try_lock() {
            Some(guard) => guard,
            None => {
                self.interval.contention.fetch_add(1, Ordering::Relaxed);
                self.buffer.lock()
            }
        }
    }

    fn count_drop(&self) {
        self.interval.drops.fetch_add(1, Ordering::Relaxed);
        self.totals.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn reject_invalid(&self, reason: RejectReason, event: AudioEvent) -> EnqueueResult {
        self.interval.invalid.fetch_add(1, Ordering::Relaxed);
        self.totals.invalid.fetch_add(1, Ordering::Relaxed);
        Err(Rejected { reason, event })
    }
}

fn rate(count: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// One lane per priority
pub struct LaneSet {
    lanes: PerPriority<PriorityLane>,
}

impl LaneSet {
    /// Build the four lanes
    pub fn new(
        ceilings: &PerPriority<usize>,
        limits: &PerPriority<usize>,
        skew_tolerance: Duration,
        critical_eviction_threshold: Option<f32>,
    ) -> Self {
        Self {
            lanes: PerPriority::from_fn(|priority| {
                PriorityLane::new(
                    priority,
                    ceilings[priority],
                    limits[priority],
                    skew_tolerance,
                    critical_eviction_threshold,
                )
            }),
        }
    }

    /// Lane for a priority
    pub fn lane(&self, priority: Priority) -> &PriorityLane {
        &self.lanes[priority]
    }

    /// Route an event to its lane
    pub fn enqueue(&self, event: AudioEvent) -> EnqueueResult {
        self.lanes[event.priority].enqueue(event)
    }

    /// Lanes in drain order
    pub fn iter(&self) -> impl Iterator<Item = &PriorityLane> {
        Priority::ALL.into_iter().map(move |p| &self.lanes[p])
    }

    /// Hard ceilings of all lanes
    pub fn ceilings(&self) -> PerPriority<usize> {
        self.lanes.map(|_, lane| lane.ceiling())
    }

    /// Total pending events
    pub fn total_depth(&self) -> usize {
        self.iter().map(PriorityLane::depth).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Timestamp};

    fn event(priority: Priority, ts_ms: u64, intensity: f32, sequence: u64) -> AudioEvent {
        AudioEvent::new(
            Timestamp::from_nanos(ts_ms * 1_000_000),
            priority,
            EventKind::Level,
            intensity,
            sequence,
        )
    }

    fn lane(priority: Priority, limit: usize) -> PriorityLane {
        PriorityLane::new(priority, 64, limit, Duration::from_millis(5), Some(0.25))
    }

    #[test]
    fn test_enqueue_and_drain_fifo() {
        let lane = lane(Priority::Normal, 16);
        for i in 0..5 {
            lane.enqueue(event(Priority::Normal, i, 0.5, i)).unwrap();
        }
        assert_eq!(lane.depth(), 5);

        let batch = lane.drain_batch(10, Duration::from_millis(10));
        let sequences: Vec<u64> = batch.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert!(lane.is_empty());
        assert!(!batch.budget_exhausted());
    }

    #[test]
    fn test_drain_respects_max_count() {
        let lane = lane(Priority::High, 32);
        for i in 0..10 {
            lane.enqueue(event(Priority::High, i, 0.5, i)).unwrap();
        }
        let batch = lane.drain_batch(4, Duration::from_millis(10));
        assert_eq!(batch.len(), 4);
        assert_eq!(lane.depth(), 6);
    }

    #[test]
    fn test_drain_empty_lane_returns_empty_batch() {
        let lane = lane(Priority::Low, 8);
        let batch = lane.drain_batch(8, Duration::from_millis(1));
        assert!(batch.is_empty());
        assert_eq!(batch.priority(), Priority::Low);
    }

    #[test]
    fn test_zero_budget_drains_nothing() {
        let lane = lane(Priority::Normal, 8);
        lane.enqueue(event(Priority::Normal, 1, 0.5, 0)).unwrap();
        let batch = lane.drain_batch(8, Duration::ZERO);
        assert!(batch.is_empty());
        assert!(batch.budget_exhausted());
        assert_eq!(lane.depth(), 1);
    }

    #[test]
    fn test_overflow_rejects_and_counts() {
        let lane = lane(Priority::Normal, 2);
        lane.enqueue(event(Priority::Normal, 1, 0.5, 0)).unwrap();
        lane.enqueue(event(Priority::Normal, 2, 0.5, 1)).unwrap();

        let rejected = lane.enqueue(event(Priority::Normal, 3, 0.5, 2)).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Overflow);
        assert_eq!(rejected.event.sequence, 2);

        let stats = lane.peek_statistics(Duration::from_secs(1));
        assert_eq!(stats.drop_count, 1);
        assert_eq!(stats.depth, 2);
        assert_eq!(lane.totals().dropped, 1);
    }

    #[test]
    fn test_stale_timestamp_rejected_within_tolerance_accepted() {
        let lane = lane(Priority::High, 8);
        lane.enqueue(event(Priority::High, 100, 0.5, 0)).unwrap();
        // 3 ms behind is inside the 5 ms tolerance
        assert!(lane.enqueue(event(Priority::High, 97, 0.5, 1)).is_ok());
        let rejected = lane.enqueue(event(Priority::High, 90, 0.5, 2)).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::StaleTimestamp);
        assert_eq!(lane.totals().invalid, 1);
        assert_eq!(lane.totals().dropped, 0);
    }

    #[test]
    fn test_invalid_payload_and_wrong_lane() {
        let lane = lane(Priority::Normal, 8);
        let err = lane.enqueue(event(Priority::Normal, 1, 2.0, 0)).unwrap_err();
        assert_eq!(err.reason, RejectReason::InvalidEvent);
        let err = lane.enqueue(event(Priority::Low, 1, 0.5, 0)).unwrap_err();
        assert_eq!(err.reason, RejectReason::WrongLane);
    }

    #[test]
    fn test_critical_lane_evicts_oldest_low_value_member() {
        let lane = lane(Priority::Critical, 3);
        lane.enqueue(event(Priority::Critical, 1, 0.9, 0)).unwrap();
        lane.enqueue(event(Priority::Critical, 2, 0.1, 1)).unwrap();
        lane.enqueue(event(Priority::Critical, 3, 0.2, 2)).unwrap();

        let accepted = lane.enqueue(event(Priority::Critical, 4, 0.8, 3)).unwrap();
        assert!(accepted.evicted);
        assert_eq!(accepted.depth, 3);

        let batch = lane.drain_batch(8, Duration::from_millis(10));
        let sequences: Vec<u64> = batch.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 2, 3]);

        let stats = lane.peek_statistics(Duration::from_secs(1));
        assert_eq!(stats.evicted_count, 1);
        assert_eq!(stats.drop_count, 1);
    }

    #[test]
    fn test_critical_lane_without_low_value_member_overflows() {
        let lane = lane(Priority::Critical, 1);
        lane.enqueue(event(Priority::Critical, 1, 0.9, 0)).unwrap();
        let err = lane.enqueue(event(Priority::Critical, 2, 0.9, 1)).unwrap_err();
        assert_eq!(err.reason, RejectReason::Overflow);
    }

    #[test]
    fn test_non_critical_lane_never_evicts() {
        let lane = lane(Priority::High, 1);
        lane.enqueue(event(Priority::High, 1, 0.0, 0)).unwrap();
        let err = lane.enqueue(event(Priority::High, 2, 0.9, 1)).unwrap_err();
        assert_eq!(err.reason, RejectReason::Overflow);
    }

    #[test]
    fn test_requeue_goes_to_front_and_skips_skew_check() {
        let lane = lane(Priority::Critical, 8);
        lane.enqueue(event(Priority::Critical, 500, 0.9, 1)).unwrap();
        lane.requeue(event(Priority::Critical, 1, 0.9, 0)).unwrap();

        let batch = lane.drain_batch(8, Duration::from_millis(10));
        assert_eq!(batch.events()[0].sequence, 0);
        assert_eq!(batch.events()[1].sequence, 1);
    }

    #[test]
    fn test_limit_clamped_to_ceiling() {
        let lane = lane(Priority::Normal, 8);
        assert_eq!(lane.set_limit(1_000), 64);
        assert_eq!(lane.set_limit(0), 1);
    }

    #[test]
    fn test_take_statistics_resets_interval_counters() {
        let lane = lane(Priority::Normal, 4);
        for i in 0..6 {
            let _ = lane.enqueue(event(Priority::Normal, i, 0.5, i));
        }
        let stats = lane.take_statistics(Duration::from_secs(2));
        assert_eq!(stats.enqueued, 4);
        assert_eq!(stats.drop_count, 2);
        assert!((stats.enqueue_rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.peak_depth, 4);

        let stats = lane.peek_statistics(Duration::from_secs(1));
        assert_eq!(stats.enqueued, 0);
        assert_eq!(stats.drop_count, 0);
        assert_eq!(stats.peak_depth, 4, "peak restarts from the current depth");
        assert_eq!(lane.totals().enqueued, 4);
    }

    #[test]
    fn test_lane_set_routes_by_priority() {
        let lanes = LaneSet::new(
            &PerPriority::new(8, 8, 8, 8),
            &PerPriority::new(8, 8, 8, 8),
            Duration::from_millis(5),
            None,
        );
        lanes.enqueue(event(Priority::Low, 1, 0.5, 0)).unwrap();
        lanes.enqueue(event(Priority::Critical, 1, 0.5, 0)).unwrap();
        assert_eq!(lanes.lane(Priority::Low).depth(), 1);
        assert_eq!(lanes.lane(Priority::Critical).depth(), 1);
        assert_eq!(lanes.total_depth(), 2);
    }
}
