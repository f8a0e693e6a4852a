use framepulse_core::{
    Clock, ClockSync, EventKind, Priority, RecordingPipeline, Scheduler, SchedulerConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const FRAME: Duration = Duration::from_micros(16_667);

#[test]
fn test_ticks_respect_deadline_at_fifty_thousand_events_per_second() {
    let clock = Clock::new();
    let video = Arc::new(RecordingPipeline::new(FRAME).counting_only());
    let mut scheduler = Scheduler::with_clock(
        SchedulerConfig::default(),
        clock,
        Arc::new(ClockSync::new(clock, Duration::ZERO)),
        video.clone(),
    )
    .unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let producers = 4;
    // 4 x 13 events per millisecond is a bit over 50k events/s
    let per_ms = 13;

    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let producer = scheduler.producer();
            let running = running.clone();
            thread::spawn(move || {
                let kinds = [
                    EventKind::Level,
                    EventKind::Onset,
                    EventKind::Level,
                    EventKind::Pitch,
                ];
                let mut submitted = 0u64;
                while running.load(Ordering::Relaxed) {
                    for i in 0..per_ms {
                        let priority = Priority::ALL[(i + p) % 4];
                        let kind = kinds[i % 4];
                        let mut event = producer.event(priority, kind, (i as f32) / per_ms as f32);
                        if kind == EventKind::Pitch {
                            event = event.with_frequency(220.0 + i as f32);
                        }
                        let _ = producer.submit_event(event);
                        submitted += 1;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                submitted
            })
        })
        .collect();

    let frames = 90u64;
    let mut late = 0;
    let mut worst_overrun = Duration::ZERO;
    let mut next = Instant::now();
    for frame in 1..=frames {
        let report = scheduler.tick(frame, FRAME);
        if !report.met_deadline() {
            late += 1;
        }
        worst_overrun = worst_overrun.max(report.duration.saturating_sub(FRAME));
        next += FRAME;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    running.store(false, Ordering::Relaxed);
    let submitted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // drain what is left
    let mut frame = frames;
    while Priority::ALL.iter().any(|&p| scheduler.queue_depth(p) > 0) {
        frame += 1;
        scheduler.tick(frame, FRAME);
    }

    assert!(late * 20 <= frames, "{} of {} ticks overran", late, frames);
    assert!(
        worst_overrun < Duration::from_millis(2),
        "worst tick overran its deadline by {:?}",
        worst_overrun
    );

    let stats = scheduler.get_statistics();
    let mut enqueued = 0;
    let mut dropped = 0;
    let mut invalid = 0;
    let mut dispatched = 0;
    for (_, lane) in stats.lanes.iter() {
        enqueued += lane.totals.enqueued;
        dropped += lane.totals.dropped;
        invalid += lane.totals.invalid;
        dispatched += lane.dispatched_events;
        assert_eq!(lane.totals.dequeued, lane.dispatched_events);
    }

    // every accepted event was dispatched or evicted, never duplicated
    assert!(dispatched <= enqueued);
    assert!(enqueued - dispatched <= dropped);
    assert!(enqueued <= submitted);
    assert!(submitted <= enqueued + dropped + invalid);
    assert!(video.applied_count() > 0);
    assert!(video.applied_count() <= dispatched);
}
