//! Scheduler configuration, loaded from and saved to TOML
//!
//! Every section is optional in the file; anything missing takes its default.

use crate::aggregate::AggregationRules;
use crate::error::{Result, SchedulerError};
use crate::logging::LogConfig;
use crate::optimizer::OptimizerLimits;
use crate::settings::{OptimizationSettings, PerPriority};
use crate::telemetry::AlertThresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Hard limits of one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Maximum events the lane may ever hold
    pub ceiling: usize,
}

impl LaneConfig {
    /// Lane with the given ceiling
    pub const fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self { ceiling: 4096 }
    }
}

/// Complete scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Render cadence the frame loop ticks at
    pub frame_rate_hz: f64,
    /// Share of each frame deadline kept for dispatch (0.0 - 1.0)
    pub dispatch_reserve: f64,
    /// Interval between telemetry reports (ms)
    pub report_interval_ms: u64,
    /// How far a timestamp may lag the newest one in its lane (µs)
    pub clock_skew_tolerance_us: u64,
    /// Hard timeout of a fast-path sync call (µs)
    pub sync_timeout_us: u64,
    /// Critical members below this intensity may be evicted
    pub low_value_intensity: f32,
    /// Lane ceilings
    pub lanes: PerPriority<LaneConfig>,
    /// Optimizer bounds
    pub optimizer: OptimizerLimits,
    /// Alert thresholds
    pub alerts: AlertThresholds,
    /// Event to parameter mapping
    pub aggregation: AggregationRules,
    /// Initial optimization settings
    pub settings: OptimizationSettings,
    /// Logging
    pub logging: LogConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_rate_hz: 60.0,
            dispatch_reserve: 0.25,
            report_interval_ms: 1000,
            clock_skew_tolerance_us: 5_000,
            sync_timeout_us: 500,
            low_value_intensity: 0.25,
            lanes: PerPriority::new(
                LaneConfig::new(512),
                LaneConfig::new(4096),
                LaneConfig::new(4096),
                LaneConfig::new(4096),
            ),
            optimizer: OptimizerLimits::default(),
            alerts: AlertThresholds::default(),
            aggregation: AggregationRules::default(),
            settings: OptimizationSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save as TOML, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Lane ceilings
    pub fn ceilings(&self) -> PerPriority<usize> {
        self.lanes.map(|_, lane| lane.ceiling)
    }

    /// Nominal frame period
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz)
    }

    /// Interval between telemetry reports
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Skew tolerance
    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::from_micros(self.clock_skew_tolerance_us)
    }

    /// Fast-path sync timeout
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_micros(self.sync_timeout_us)
    }

    /// Check the whole configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0) {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "frame rate must be positive, got {}",
                self.frame_rate_hz
            )));
        }
        if !(0.0..1.0).contains(&self.dispatch_reserve) {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "dispatch reserve must be in [0, 1), got {}",
                self.dispatch_reserve
            )));
        }
        if self.report_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "report interval must be positive".to_string(),
            ));
        }
        if self.sync_timeout_us == 0 {
            return Err(SchedulerError::InvalidConfiguration(
                "sync timeout must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.low_value_intensity) {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "low-value intensity must be in [0, 1], got {}",
                self.low_value_intensity
            )));
        }
        for (priority, lane) in self.lanes.iter() {
            if lane.ceiling == 0 {
                return Err(SchedulerError::InvalidConfiguration(format!(
                    "ceiling for {} must be positive",
                    priority
                )));
            }
        }

        self.optimizer.validate()?;
        self.settings.validate_against_ceilings(&self.ceilings())
    }
}
