//! Optimization settings - the configuration snapshot read by every tick
//!
//! Settings are never mutated in place. The scheduler keeps them behind an
//! `ArcSwap` and both the optimizer and explicit reconfiguration replace the
//! whole snapshot.

use crate::error::{Result, SchedulerError};
use crate::event::Priority;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};
use std::time::Duration;

/// Largest batch size accepted by validation
pub const MAX_BATCH_SIZE: usize = 4096;

/// One value per priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PerPriority<T> {
    /// Critical lane value
    pub critical: T,
    /// High lane value
    pub high: T,
    /// Normal lane value
    pub normal: T,
    /// Low lane value
    pub low: T,
}

impl<T> PerPriority<T> {
    /// Build from explicit values
    pub const fn new(critical: T, high: T, normal: T, low: T) -> Self {
        Self {
            critical,
            high,
            normal,
            low,
        }
    }

    /// Build by calling `f` for each priority
    pub fn from_fn(mut f: impl FnMut(Priority) -> T) -> Self {
        Self {
            critical: f(Priority::Critical),
            high: f(Priority::High),
            normal: f(Priority::Normal),
            low: f(Priority::Low),
        }
    }

    /// Iterate in drain order
    pub fn iter(&self) -> impl Iterator<Item = (Priority, &T)> {
        Priority::ALL.into_iter().map(move |p| (p, &self[p]))
    }

    /// Map every value
    pub fn map<U>(&self, mut f: impl FnMut(Priority, &T) -> U) -> PerPriority<U> {
        PerPriority::from_fn(|p| f(p, &self[p]))
    }
}

impl<T> Index<Priority> for PerPriority<T> {
    type Output = T;

    fn index(&self, priority: Priority) -> &T {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }
}

impl<T> IndexMut<Priority> for PerPriority<T> {
    fn index_mut(&mut self, priority: Priority) -> &mut T {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

/// Batching and latency targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationSettings {
    /// Maximum events per drained batch
    pub target_batch_size_per_priority: PerPriority<usize>,
    /// Admission limit per lane, before burst expansion
    pub target_queue_depth_per_priority: PerPriority<usize>,
    /// Latency target per lane in milliseconds
    pub target_latency_ms_per_priority: PerPriority<f64>,
    /// Let the optimizer resize batches
    pub enable_adaptive_sizing: bool,
    /// Use the rate-forecasting policy instead of the purely reactive one
    pub enable_predictive_batching: bool,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            target_batch_size_per_priority: PerPriority::new(16, 32, 64, 128),
            target_queue_depth_per_priority: PerPriority::new(256, 1024, 2048, 2048),
            target_latency_ms_per_priority: PerPriority::new(1.0, 8.0, 17.0, 50.0),
            enable_adaptive_sizing: true,
            enable_predictive_batching: false,
        }
    }
}

impl OptimizationSettings {
    /// Batch size for a lane
    pub fn batch_size(&self, priority: Priority) -> usize {
        self.target_batch_size_per_priority[priority]
    }

    /// Queue depth for a lane
    pub fn queue_depth(&self, priority: Priority) -> usize {
        self.target_queue_depth_per_priority[priority]
    }

    /// Latency target for a lane
    pub fn target_latency(&self, priority: Priority) -> Duration {
        Duration::from_secs_f64(self.target_latency_ms_per_priority[priority] / 1000.0)
    }

    /// Check internal consistency
    ///
    /// Latency targets must be positive and must not loosen towards stricter
    /// priorities.
    pub fn validate(&self) -> Result<()> {
        for (priority, &size) in self.target_batch_size_per_priority.iter() {
            if size == 0 || size > MAX_BATCH_SIZE {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "batch size for {} must be in 1..={}, got {}",
                    priority, MAX_BATCH_SIZE, size
                )));
            }
        }

        for (priority, &depth) in self.target_queue_depth_per_priority.iter() {
            if depth == 0 {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "queue depth for {} must be positive",
                    priority
                )));
            }
        }

        let mut previous: Option<(Priority, f64)> = None;
        for (priority, &latency) in self.target_latency_ms_per_priority.iter() {
            if !latency.is_finite() || latency <= 0.0 {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "latency target for {} must be positive, got {}",
                    priority, latency
                )));
            }
            if let Some((stricter, stricter_latency)) = previous {
                if latency < stricter_latency {
                    return Err(SchedulerError::InvalidConfiguration(format!(
                        "latency target for {} ({} ms) is stricter than {} ({} ms)",
                        priority, latency, stricter, stricter_latency
                    )));
                }
            }
            previous = Some((priority, latency));
        }

        Ok(())
    }

    /// Check queue depths against the lanes' hard ceilings
    pub fn validate_against_ceilings(&self, ceilings: &PerPriority<usize>) -> Result<()> {
        self.validate()?;
        for (priority, &depth) in self.target_queue_depth_per_priority.iter() {
            if depth > ceilings[priority] {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "queue depth for {} ({}) exceeds lane ceiling {}",
                    priority, depth, ceilings[priority]
                )));
            }
        }
        Ok(())
    }
}
