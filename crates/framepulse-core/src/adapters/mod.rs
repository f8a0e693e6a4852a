//! Collaborator contracts - the audio clock and the video pipeline
//!
//! The scheduler consumes both through traits so the hardware clock and the
//! renderer stay outside this crate. Implementations must return quickly:
//! a stall inside an adapter call is a dropped or delayed frame.
//!
//! Stock implementations:
//! - [`ClockSync`]: sync adapter backed by the scheduler's monotonic clock
//! - [`RecordingPipeline`]: pipeline adapter that records what it is given

use crate::error::SchedulerError;
use crate::event::{AudioEvent, ParameterId, Timestamp, VisualParameterUpdate};
use std::fmt;
use std::time::Duration;

pub mod clock;
pub mod recording;

pub use clock::ClockSync;
pub use recording::RecordingPipeline;

/// Why a synchronization attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailure {
    /// The adapter did not answer within the hard timeout
    Timeout,
    /// The adapter reported it cannot sync right now
    Unavailable,
    /// The fast path was asked to handle a non-Critical event
    NotCritical,
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::Timeout => f.write_str("timed out"),
            SyncFailure::Unavailable => f.write_str("unavailable"),
            SyncFailure::NotCritical => f.write_str("not a critical event"),
        }
    }
}

/// Outcome of synchronizing one event against the audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncResult {
    /// Whether a synchronized timestamp was obtained
    pub success: bool,
    /// Clock-aligned timestamp for the event
    pub sync_timestamp: Option<Timestamp>,
    /// Time spent synchronizing
    pub latency: Duration,
    /// Failure cause when `success` is false
    pub failure: Option<SyncFailure>,
}

impl SyncResult {
    /// Successful sync
    pub fn synced(sync_timestamp: Timestamp, latency: Duration) -> Self {
        Self {
            success: true,
            sync_timestamp: Some(sync_timestamp),
            latency,
            failure: None,
        }
    }

    /// Failed sync
    pub fn failed(failure: SyncFailure, latency: Duration) -> Self {
        Self {
            success: false,
            sync_timestamp: None,
            latency,
            failure: Some(failure),
        }
    }

    /// Latency in milliseconds
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Hardware audio clock contract
pub trait SyncAdapter: Send + Sync {
    /// Align an event with the audio clock
    ///
    /// Must return within `timeout` (well under a millisecond) or report
    /// failure; the scheduler also treats a late success as a timeout.
    fn synchronize(&self, event: &AudioEvent, timeout: Duration) -> SyncResult;
}

/// Acknowledgement from the video pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Parameter written
    pub parameter: ParameterId,
    /// Frame the write is attributed to
    pub frame_number: u64,
}

/// Refusal from the video pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRejected {
    /// Parameter of the refused update
    pub parameter: ParameterId,
    /// Reason given by the pipeline
    pub reason: String,
}

impl UpdateRejected {
    /// Refusal for a parameter the pipeline does not know
    pub fn unknown_parameter(parameter: ParameterId) -> Self {
        Self {
            reason: format!("unknown parameter '{}'", parameter),
            parameter,
        }
    }
}

impl fmt::Display for UpdateRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update for '{}' rejected: {}", self.parameter, self.reason)
    }
}

impl From<UpdateRejected> for SchedulerError {
    fn from(rejected: UpdateRejected) -> Self {
        SchedulerError::UpdateRejected {
            parameter: rejected.parameter.to_string(),
            reason: rejected.reason,
        }
    }
}

/// Presentation state reported at the start of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSyncInfo {
    /// Frame about to be built
    pub frame_number: u64,
    /// Last frame actually presented, if known
    pub presented_frame: Option<u64>,
    /// Display refresh interval
    pub refresh_interval: Duration,
}

impl FrameSyncInfo {
    /// Frames between the one being built and the last presented one
    pub fn frame_lag(&self) -> Option<u64> {
        self.presented_frame
            .map(|presented| self.frame_number.saturating_sub(presented))
    }
}

/// Video pipeline contract
pub trait VideoPipelineAdapter: Send + Sync {
    /// Hand over one parameter change; consumed exactly once
    fn apply_update(&self, update: VisualParameterUpdate) -> Result<Applied, UpdateRejected>;

    /// Called once per tick before dispatch to align with presented frames
    fn notify_frame_sync(&self, frame_number: u64) -> FrameSyncInfo;
}
