//! Event envelope - audio-derived occurrences and the visual updates made from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Priority class of an event
///
/// Ordering is total and fixed: `Critical` is the strictest class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Sub-millisecond class, eligible for the fast path
    Critical,
    /// Drained right after Critical
    High,
    /// Default class for continuous analysis output
    Normal,
    /// Best-effort
    Low,
}

impl Priority {
    /// All priorities in drain order (strictest first)
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Position in drain order
    pub fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Lowercase display name
    pub fn name(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    /// Whether `self` is strictly more urgent than `other`
    pub fn is_stricter_than(self, other: Priority) -> bool {
        self.index() < other.index()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of audio occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Detected beat
    Beat,
    /// Transient onset
    Onset,
    /// Continuous level reading (RMS, band energy)
    Level,
    /// Pitch estimate, carries a frequency
    Pitch,
}

impl EventKind {
    /// All kinds
    pub const ALL: [EventKind; 4] = [
        EventKind::Beat,
        EventKind::Onset,
        EventKind::Level,
        EventKind::Pitch,
    ];
}

/// Monotonic timestamp in nanoseconds since the owning [`Clock`]'s epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Build from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the clock epoch
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Offset forward by `delta`
    pub fn saturating_add(self, delta: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(delta.as_nanos() as u64))
    }
}

/// Monotonic nanosecond clock shared by producers and the scheduler
///
/// Event latency is measured against this clock, so events should be stamped
/// with the scheduler's clock (see [`crate::scheduler::EventProducer::event`]).
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Start a clock at the current instant
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Current time
    pub fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed().as_nanos() as u64)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// One audio-derived occurrence
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEvent {
    /// Detection time
    pub timestamp: Timestamp,
    /// Priority class, decides the lane
    pub priority: Priority,
    /// Kind tag
    pub kind: EventKind,
    /// Intensity (0.0 - 1.0)
    pub intensity: f32,
    /// Frequency in Hz, if the detector produced one
    pub frequency: Option<f32>,
    /// Producer-local counter, tie-break for near-simultaneous timestamps
    pub sequence: u64,
}

impl AudioEvent {
    /// Create an event without a frequency
    pub fn new(
        timestamp: Timestamp,
        priority: Priority,
        kind: EventKind,
        intensity: f32,
        sequence: u64,
    ) -> Self {
        Self {
            timestamp,
            priority,
            kind,
            intensity,
            frequency: None,
            sequence,
        }
    }

    /// Attach a frequency
    pub fn with_frequency(mut self, hz: f32) -> Self {
        self.frequency = Some(hz);
        self
    }

    /// Payload sanity check used at admission
    pub fn is_valid(&self) -> bool {
        let intensity_ok = self.intensity.is_finite() && (0.0..=1.0).contains(&self.intensity);
        let frequency_ok = self.frequency.map_or(true, |hz| hz.is_finite() && hz > 0.0);
        intensity_ok && frequency_ok
    }
}

/// Identifier of a visual parameter on the video pipeline side
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterId(Arc<str>);

impl ParameterId {
    /// Create a parameter id
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Borrow the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParameterId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Visual parameter change bound for a specific render frame
#[derive(Debug, Clone, PartialEq)]
pub struct VisualParameterUpdate {
    /// Parameter to write
    pub target_parameter_id: ParameterId,
    /// New value
    pub value: f32,
    /// Priority of the event(s) it was derived from
    pub source_priority: Priority,
    /// Frame the update is intended for
    pub frame_number: u64,
    /// When the update was produced
    pub generated_at: Timestamp,
}
