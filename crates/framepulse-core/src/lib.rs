//! FramePulse Core - frame-coherent audio event scheduling
//!
//! This crate turns a high-rate stream of audio analysis events into visual
//! parameter updates delivered once per rendered frame:
//! - Bounded priority lanes fed by many producer threads
//! - A tick that drains them in priority order under a frame deadline
//! - A synchronous fast path for Critical events
//! - Adaptive batch sizing and burst handling
//! - Rolling telemetry with threshold alerts

#![warn(missing_docs)]

pub mod adapters;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod event;
pub mod lane;
pub mod logging;
pub mod optimizer;
pub mod scheduler;
pub mod settings;
pub mod telemetry;

// --- Re-exports grouped by category ---

// Events & Settings
pub use event::{
    AudioEvent, Clock, EventKind, ParameterId, Priority, Timestamp, VisualParameterUpdate,
};
pub use settings::{OptimizationSettings, PerPriority, MAX_BATCH_SIZE};

// Lanes
pub use lane::{
    Accepted, Batch, EnqueueResult, LaneSet, LaneTotals, PriorityLane, QueueStatistics,
    RejectReason, Rejected,
};

// Scheduling
pub use aggregate::{AggregationRules, Aggregator};
pub use optimizer::{
    AdaptiveBatchOptimizer, BatchingPolicy, LoadWindow, OptimizerLimits, PolicyContext,
    PolicyDecision, PredictivePolicy, ReactivePolicy,
};
pub use scheduler::{EventProducer, Scheduler, SchedulerState, TickReport};

// Adapters
pub use adapters::{
    Applied, ClockSync, FrameSyncInfo, RecordingPipeline, SyncAdapter, SyncFailure, SyncResult,
    UpdateRejected, VideoPipelineAdapter,
};

// Telemetry
pub use telemetry::{
    Alert, AlertKind, AlertSeverity, AlertThresholds, FastPathStats, LaneSnapshot,
    LaneTickMetrics, LatencySummary, Monitor, ObserverId, Snapshot, TickMetrics,
};

// Configuration & Logging
pub use config::{LaneConfig, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use logging::LogConfig;
