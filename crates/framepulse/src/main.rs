//! FramePulse soak runner
//!
//! Drives the scheduler at the configured frame rate against synthetic
//! producer threads and prints the final statistics.

mod logging_setup;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use framepulse_core::{
    AlertKind, Clock, ClockSync, EventKind, EventProducer, Priority, RecordingPipeline, Scheduler,
    SchedulerConfig, Snapshot,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// FramePulse - frame-coherent audio-to-visual scheduler soak run
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to run
    #[arg(long, default_value = "600")]
    frames: u64,

    /// Producer threads
    #[arg(long, default_value = "4")]
    producers: usize,

    /// Aggregate event rate (events per second)
    #[arg(long, default_value = "50000")]
    rate: u64,

    /// Share of Critical events sent through the fast path (0.0 - 1.0)
    #[arg(long, default_value = "0.5")]
    fast_path_share: f64,

    /// Log level, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    write_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SchedulerConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    if let Some(path) = &cli.write_config {
        config
            .save(path)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        println!("Configuration written to {:?}", path);
        return Ok(());
    }

    let _log_guard = logging_setup::init(&config.logging)?;
    run(&cli, config)
}

fn run(cli: &Cli, config: SchedulerConfig) -> Result<()> {
    let frame_period = config.frame_period();
    let parameters: Vec<_> = EventKind::ALL
        .iter()
        .map(|&kind| config.aggregation.parameter_for(kind).clone())
        .collect();

    let clock = Clock::new();
    let sync = Arc::new(ClockSync::new(clock, Duration::from_millis(5)));
    let video = Arc::new(
        RecordingPipeline::new(frame_period)
            .with_parameters(parameters)
            .counting_only(),
    );
    let mut scheduler = Scheduler::with_clock(config, clock, sync, video.clone())
        .context("Failed to start scheduler")?;

    // alerts re-fire every tick while active; log each at most once a second
    let last_logged: Mutex<HashMap<(AlertKind, Option<Priority>), Instant>> =
        Mutex::new(HashMap::new());
    scheduler.on_alert(move |alert| {
        let now = Instant::now();
        let mut last_logged = last_logged.lock();
        let key = (alert.kind, alert.priority);
        let due = last_logged
            .get(&key)
            .map_or(true, |at| now.duration_since(*at) >= Duration::from_secs(1));
        if due {
            last_logged.insert(key, now);
            warn!("{}", alert);
        }
    });

    let reports = scheduler.subscribe(8);
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let reporter = thread::Builder::new()
        .name("framepulse-reporter".to_string())
        .spawn(move || loop {
            select! {
                recv(reports) -> report => match report {
                    Ok(report) => log_report(&report),
                    Err(_) => break,
                },
                recv(stop_rx) -> _ => break,
            }
        })
        .context("Failed to spawn reporter thread")?;

    let running = Arc::new(AtomicBool::new(true));
    let producers = cli.producers.max(1);
    let per_producer = cli.rate as f64 / producers as f64;
    let mut handles = Vec::with_capacity(producers);
    for index in 0..producers {
        let producer = scheduler.producer();
        let running = running.clone();
        let share = cli.fast_path_share.clamp(0.0, 1.0);
        let handle = thread::Builder::new()
            .name(format!("framepulse-producer-{}", index))
            .spawn(move || produce(producer, index, per_producer, share, &running))
            .context("Failed to spawn producer thread")?;
        handles.push(handle);
    }

    info!(
        "Running {} frames at {:.1} Hz with {} producers at {} events/s",
        cli.frames,
        1.0 / frame_period.as_secs_f64(),
        producers,
        cli.rate
    );

    let mut late = 0u64;
    let mut next = Instant::now();
    for frame in 1..=cli.frames {
        let report = scheduler.tick(frame, frame_period);
        if !report.met_deadline() {
            late += 1;
        }
        next += frame_period;
        match next.checked_duration_since(Instant::now()) {
            Some(wait) => thread::sleep(wait),
            None => next = Instant::now(),
        }
    }

    running.store(false, Ordering::Relaxed);
    let mut submitted = 0u64;
    for handle in handles {
        submitted += handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }

    let snapshot = scheduler.get_statistics();
    drop(stop_tx);
    drop(scheduler);
    reporter
        .join()
        .map_err(|_| anyhow::anyhow!("reporter thread panicked"))?;

    print_summary(&snapshot, submitted, late, cli.frames, video.applied_count());
    Ok(())
}

/// Emit a deterministic event mix at `rate` events per second until stopped
///
/// Per 100 events: 2 Critical beats, 18 High onsets and pitches, 40 Normal
/// levels, 40 Low levels and pitches.
fn produce(
    producer: EventProducer,
    index: usize,
    rate: f64,
    fast_path_share: f64,
    running: &AtomicBool,
) -> u64 {
    let step = Duration::from_millis(1);
    let per_step = rate / 1000.0;
    let phase = index as f64 * 0.7;
    let mut owed = 0.0;
    let mut fast_path_owed = 0.0;
    let mut n: u64 = 0;

    while running.load(Ordering::Relaxed) {
        owed += per_step;
        while owed >= 1.0 {
            owed -= 1.0;
            n += 1;

            let wave = (0.5 + 0.5 * (n as f64 * 0.013 + phase).sin()) as f32;
            let slot = n % 100;
            let (priority, kind) = match slot {
                0 | 50 => (Priority::Critical, EventKind::Beat),
                1..=18 => (
                    Priority::High,
                    if slot % 2 == 0 { EventKind::Onset } else { EventKind::Pitch },
                ),
                19..=58 => (Priority::Normal, EventKind::Level),
                _ => (
                    Priority::Low,
                    if slot % 4 == 0 { EventKind::Pitch } else { EventKind::Level },
                ),
            };

            let mut event = producer.event(priority, kind, wave);
            if kind == EventKind::Pitch {
                event = event.with_frequency(110.0 + 880.0 * wave);
            }

            if priority == Priority::Critical {
                fast_path_owed += fast_path_share;
                if fast_path_owed >= 1.0 {
                    fast_path_owed -= 1.0;
                    producer.process_critical_event_now(event);
                    continue;
                }
            }
            let _ = producer.submit_event(event);
        }
        thread::sleep(step);
    }

    n
}

fn log_report(report: &Snapshot) {
    let pending: usize = report.lanes.iter().map(|(_, lane)| lane.queue.depth).sum();
    let rate: f64 = report.lanes.iter().map(|(_, lane)| lane.queue.enqueue_rate).sum();
    info!(
        "frame {}: {:.0} ev/s in, {} pending, tick {:.2} ms mean / {:.2} ms max, jitter {:.3}",
        report.frame_number,
        rate,
        pending,
        report.mean_tick.as_secs_f64() * 1000.0,
        report.max_tick.as_secs_f64() * 1000.0,
        report.frame_jitter
    );
}

fn print_summary(snapshot: &Snapshot, submitted: u64, late: u64, frames: u64, applied: u64) {
    println!("=== FramePulse summary ===");
    println!(
        "frames: {} ({} over deadline), events submitted: {}, updates applied: {}",
        frames, late, submitted, applied
    );
    println!(
        "tick: mean {:.3} ms, max {:.3} ms, frame jitter {:.3}",
        snapshot.mean_tick.as_secs_f64() * 1000.0,
        snapshot.max_tick.as_secs_f64() * 1000.0,
        snapshot.frame_jitter
    );
    for (priority, lane) in snapshot.lanes.iter() {
        println!(
            "{:>8}: enq {:>8} drop {:>6} invalid {:>4} dispatched {:>8} p50 {:>7.3} ms p99 {:>7.3} ms deferred {}",
            priority.name(),
            lane.totals.enqueued,
            lane.totals.dropped,
            lane.totals.invalid,
            lane.dispatched_events,
            lane.latency.p50.as_secs_f64() * 1000.0,
            lane.latency.p99.as_secs_f64() * 1000.0,
            lane.deferred_ticks
        );
    }
    let fast = &snapshot.fast_path;
    println!(
        "fast path: {} dispatched, {} failed ({} requeued), mean {:.1} µs, max {:.1} µs",
        fast.dispatched,
        fast.sync_failures,
        fast.requeued,
        fast.mean_latency.as_secs_f64() * 1e6,
        fast.max_latency.as_secs_f64() * 1e6
    );
    println!(
        "rejected updates: {}, active alerts: {}",
        snapshot.rejected_updates,
        snapshot.active_alerts.len()
    );
}
