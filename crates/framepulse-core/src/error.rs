//! Error types for the scheduler
use thiserror::Error;

/// Scheduler errors
///
/// Per-event failures never surface through this type: lane overflow is a
/// [`crate::lane::Rejected`] value and partial drains are recorded in the
/// [`crate::scheduler::TickReport`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Settings or configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The real-time sync adapter timed out or reported failure
    #[error("Sync adapter unavailable: {0}")]
    SyncUnavailable(String),

    /// The video pipeline refused one update
    #[error("Update for '{parameter}' rejected: {reason}")]
    UpdateRejected {
        /// Target parameter of the refused update
        parameter: String,
        /// Reason given by the pipeline
        reason: String,
    },

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML deserialization error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;
