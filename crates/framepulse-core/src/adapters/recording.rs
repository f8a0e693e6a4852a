//! Pipeline adapter that records applied updates
//!
//! Useful as a null renderer for soak runs and as a probe in tests.

use super::{Applied, FrameSyncInfo, UpdateRejected, VideoPipelineAdapter};
use crate::event::{ParameterId, VisualParameterUpdate};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Records every accepted update, rejecting parameters it does not know
pub struct RecordingPipeline {
    known: Option<HashSet<ParameterId>>,
    refresh_interval: Duration,
    applied: Mutex<Vec<VisualParameterUpdate>>,
    applied_count: AtomicU64,
    rejected_count: AtomicU64,
    last_frame: AtomicU64,
    keep_updates: bool,
}

impl RecordingPipeline {
    /// Accept any parameter and keep every update
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            known: None,
            refresh_interval,
            applied: Mutex::new(Vec::new()),
            applied_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            last_frame: AtomicU64::new(0),
            keep_updates: true,
        }
    }

    /// Only accept the listed parameters
    pub fn with_parameters<I, P>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ParameterId>,
    {
        self.known = Some(parameters.into_iter().map(Into::into).collect());
        self
    }

    /// Count updates without keeping them (long soak runs)
    pub fn counting_only(mut self) -> Self {
        self.keep_updates = false;
        self
    }

    /// Drain the recorded updates
    pub fn take_applied(&self) -> Vec<VisualParameterUpdate> {
        std::mem::take(&mut *self.applied.lock())
    }

    /// Number of accepted updates
    pub fn applied_count(&self) -> u64 {
        self.applied_count.load(Ordering::Relaxed)
    }

    /// Number of refused updates
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }
}

impl VideoPipelineAdapter for RecordingPipeline {
    fn apply_update(&self, update: VisualParameterUpdate) -> Result<Applied, UpdateRejected> {
        if let Some(known) = &self.known {
            if !known.contains(&update.target_parameter_id) {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                return Err(UpdateRejected::unknown_parameter(update.target_parameter_id));
            }
        }

        let applied = Applied {
            parameter: update.target_parameter_id.clone(),
            frame_number: update.frame_number,
        };
        self.applied_count.fetch_add(1, Ordering::Relaxed);
        if self.keep_updates {
            self.applied.lock().push(update);
        }
        Ok(applied)
    }

    fn notify_frame_sync(&self, frame_number: u64) -> FrameSyncInfo {
        let previous = self.last_frame.swap(frame_number, Ordering::Relaxed);
        FrameSyncInfo {
            frame_number,
            presented_frame: (previous > 0).then_some(previous),
            refresh_interval: self.refresh_interval,
        }
    }
}
