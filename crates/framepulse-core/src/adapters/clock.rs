//! Sync adapter backed by the scheduler's monotonic clock

use super::{SyncAdapter, SyncFailure, SyncResult};
use crate::event::{AudioEvent, Clock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Software stand-in for a hardware audio clock
///
/// The synchronized timestamp is "now" plus the configured output latency,
/// i.e. the moment the sound that produced the event reaches the speakers.
pub struct ClockSync {
    clock: Clock,
    output_latency: Duration,
    available: AtomicBool,
}

impl ClockSync {
    /// Create an adapter on `clock`
    pub fn new(clock: Clock, output_latency: Duration) -> Self {
        Self {
            clock,
            output_latency,
            available: AtomicBool::new(true),
        }
    }

    /// Mark the clock as reachable or not
    pub fn set_available(&self, available: bool) {
        let previous = self.available.swap(available, Ordering::Relaxed);
        if previous != available {
            info!("Audio clock availability changed: {}", available);
        }
    }

    /// Whether the clock is reachable
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Configured output latency
    pub fn output_latency(&self) -> Duration {
        self.output_latency
    }
}

impl SyncAdapter for ClockSync {
    fn synchronize(&self, _event: &AudioEvent, timeout: Duration) -> SyncResult {
        let start = Instant::now();
        if !self.is_available() {
            return SyncResult::failed(SyncFailure::Unavailable, start.elapsed());
        }

        let sync_timestamp = self.clock.now().saturating_add(self.output_latency);
        let latency = start.elapsed();
        if latency > timeout {
            return SyncResult::failed(SyncFailure::Timeout, latency);
        }
        SyncResult::synced(sync_timestamp, latency)
    }
}
