use framepulse_core::{
    AlertKind, AlertSeverity, AlertThresholds, LaneTickMetrics, Monitor, OptimizationSettings,
    PerPriority, Priority, QueueStatistics, Snapshot, TickMetrics,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FRAME: Duration = Duration::from_millis(16);

fn tick(frame_number: u64, started_at: Instant, duration: Duration) -> TickMetrics {
    TickMetrics {
        frame_number,
        started_at,
        duration,
        deadline: FRAME,
        lanes: PerPriority::default(),
    }
}

fn quiet_queues() -> PerPriority<QueueStatistics> {
    PerPriority::from_fn(|_| QueueStatistics {
        limit: 1000,
        ceiling: 4096,
        ..QueueStatistics::default()
    })
}

fn kinds(alerts: &[framepulse_core::Alert]) -> Vec<AlertKind> {
    alerts.iter().map(|alert| alert.kind).collect()
}

#[test]
fn test_quiet_tick_raises_nothing() {
    let monitor = Monitor::default();
    let alerts = monitor.record_tick(
        &tick(1, Instant::now(), Duration::from_millis(2)),
        &quiet_queues(),
        &OptimizationSettings::default(),
    );
    assert!(alerts.is_empty());
    assert!(monitor.active_alerts().is_empty());
}

#[test]
fn test_deadline_overrun_is_frame_time_inconsistency() {
    let monitor = Monitor::default();
    let alerts = monitor.record_tick(
        &tick(1, Instant::now(), Duration::from_millis(20)),
        &quiet_queues(),
        &OptimizationSettings::default(),
    );
    assert_eq!(kinds(&alerts), vec![AlertKind::FrameTimeInconsistency]);
    assert_eq!(alerts[0].priority, None);

    let snapshot = monitor.snapshot(&quiet_queues(), &PerPriority::default());
    assert_eq!(snapshot.deadline_overruns, 1);
}

#[test]
fn test_irregular_frame_intervals_raise_jitter_alert() {
    let monitor = Monitor::default();
    let settings = OptimizationSettings::default();
    let origin = Instant::now();
    let mut at = origin;
    let mut raised = false;

    for frame in 1..=20u64 {
        // alternate 4 ms and 28 ms frames
        let gap = if frame % 2 == 0 { 4 } else { 28 };
        at += Duration::from_millis(gap);
        let metrics = tick(frame, at, Duration::from_millis(1));
        let alerts = monitor.record_tick(&metrics, &quiet_queues(), &settings);
        raised |= alerts.iter().any(|a| a.kind == AlertKind::FrameTimeInconsistency);
    }

    assert!(raised);
    let snapshot = monitor.snapshot(&quiet_queues(), &PerPriority::default());
    assert!(snapshot.frame_jitter > 0.5);
    assert_eq!(snapshot.ticks, 20);
}

#[test]
fn test_latency_over_target_raises_budget_violation() {
    let monitor = Monitor::default();
    monitor.record_latencies(Priority::High, vec![Duration::from_millis(20); 50]);

    let alerts = monitor.record_tick(
        &tick(1, Instant::now(), Duration::from_millis(2)),
        &quiet_queues(),
        &OptimizationSettings::default(),
    );
    let violation = alerts
        .iter()
        .find(|a| a.kind == AlertKind::LatencyBudgetViolation)
        .expect("violation raised");
    assert_eq!(violation.priority, Some(Priority::High));
    assert!((violation.threshold - 8.0).abs() < 1e-9);

    let summary = monitor.latency_summaries()[Priority::High];
    assert_eq!(summary.count, 50);
    assert_eq!(summary.p99, Duration::from_millis(20));
}

#[test]
fn test_deferred_lane_is_budget_violation() {
    let monitor = Monitor::default();
    let mut metrics = tick(1, Instant::now(), Duration::from_millis(2));
    metrics.lanes.low = LaneTickMetrics {
        deferred: true,
        ..LaneTickMetrics::default()
    };

    let alerts = monitor.record_tick(&metrics, &quiet_queues(), &OptimizationSettings::default());
    assert!(alerts
        .iter()
        .any(|a| a.kind == AlertKind::LatencyBudgetViolation && a.priority == Some(Priority::Low)));
    let snapshot = monitor.snapshot(&quiet_queues(), &PerPriority::default());
    assert_eq!(snapshot.lanes.low.deferred_ticks, 1);
    assert_eq!(snapshot.lanes.low.budget_violations, 1);
}

#[test]
fn test_drops_and_contention_alerts() {
    let monitor = Monitor::new(AlertThresholds {
        min_lock_samples: 10,
        ..AlertThresholds::default()
    });
    let mut queues = quiet_queues();
    queues.normal.drop_count = 3;
    queues.normal.depth = 1000;
    queues.high.lock_acquisitions = 100;
    queues.high.contention_samples = 40;

    let alerts = monitor.record_tick(
        &tick(1, Instant::now(), Duration::from_millis(2)),
        &queues,
        &OptimizationSettings::default(),
    );

    let overflow = alerts
        .iter()
        .find(|a| a.kind == AlertKind::QueueOverflow)
        .expect("overflow raised");
    assert_eq!(overflow.priority, Some(Priority::Normal));
    assert_eq!(overflow.severity, AlertSeverity::Error);

    let contention = alerts
        .iter()
        .find(|a| a.kind == AlertKind::LockContention)
        .expect("contention raised");
    assert_eq!(contention.priority, Some(Priority::High));
    assert!((contention.observed - 40.0).abs() < 1e-9);
}

#[test]
fn test_observers_called_per_alert() {
    let monitor = Monitor::default();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    monitor.on_alert(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    for frame in 1..=3 {
        monitor.record_tick(
            &tick(frame, Instant::now(), Duration::from_millis(40)),
            &quiet_queues(),
            &OptimizationSettings::default(),
        );
    }
    assert_eq!(seen.load(Ordering::Relaxed), 3);
}

#[test]
fn test_one_shot_observer_removes_itself() {
    let monitor = Arc::new(Monitor::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let own_id = Arc::new(AtomicU64::new(u64::MAX));

    let weak = Arc::downgrade(&monitor);
    let counter = seen.clone();
    let id_slot = own_id.clone();
    let id = monitor.on_alert(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(monitor) = weak.upgrade() {
            monitor.remove_observer(id_slot.load(Ordering::Relaxed));
        }
    });
    own_id.store(id, Ordering::Relaxed);

    for frame in 1..=3 {
        monitor.record_tick(
            &tick(frame, Instant::now(), Duration::from_millis(40)),
            &quiet_queues(),
            &OptimizationSettings::default(),
        );
    }

    assert_eq!(seen.load(Ordering::Relaxed), 1);
    assert!(!monitor.remove_observer(id));
}

#[test]
fn test_observer_may_register_another_observer() {
    let monitor = Arc::new(Monitor::default());
    let seen = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&monitor);
    let counter = seen.clone();
    let registered = Arc::new(AtomicUsize::new(0));
    let registered_in = registered.clone();
    monitor.on_alert(move |_| {
        if registered_in.fetch_add(1, Ordering::Relaxed) == 0 {
            if let Some(monitor) = weak.upgrade() {
                let counter = counter.clone();
                monitor.on_alert(move |_| {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
    });

    for frame in 1..=2 {
        monitor.record_tick(
            &tick(frame, Instant::now(), Duration::from_millis(40)),
            &quiet_queues(),
            &OptimizationSettings::default(),
        );
    }

    // the late observer only sees the second tick
    assert_eq!(seen.load(Ordering::Relaxed), 1);
}

#[test]
fn test_publish_never_blocks_on_full_subscriber() {
    let monitor = Monitor::default();
    let rx = monitor.subscribe(1);

    monitor.publish(&Snapshot::default());
    monitor.publish(&Snapshot {
        ticks: 99,
        ..Snapshot::default()
    });

    assert_eq!(rx.try_recv().unwrap().ticks, 0);
    assert!(rx.try_recv().is_err());

    drop(rx);
    // disconnected subscribers are pruned silently
    monitor.publish(&Snapshot::default());
}
