//! Custom error types for the plan library.
//!
//! This module defines the primary error type, `PlanError`, shared by every
//! component of the crate. Using the `thiserror` crate, it provides a single,
//! consistent taxonomy for the failures that can abort a plan or a run.
//!
//! ## Error Hierarchy
//!
//! - **`Consistency`**: Cached bundles in an averaging window disagree (different
//!   descriptors, mismatched array lengths, missing fields). The window is discarded
//!   and the run should be aborted.
//! - **`MisconfiguredScan`**: The DAQ step-scan preprocessor detected a detector
//!   ordering/duplication violation. Fatal for the plan.
//! - **`Bounds`**: An extremum search was handed an unusable interval, or no limits
//!   could be resolved for the motor being optimized.
//! - **`Device`**: A capability call (move, trigger, read) failed. Wrapped from
//!   `anyhow::Error` with `#[from]`; nothing in this crate retries it.
//! - **`Config`** / **`ConfigValidation`**: Configuration could not be loaded or is
//!   semantically invalid.
//!
//! Non-numeric fields excluded from averaging are *not* errors; they are reported
//! through `tracing::warn!`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Error type for plans, streams and searches.
#[derive(Error, Debug)]
pub enum PlanError {
    /// Bundles that should share one configuration do not.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// DAQ detector ordering or duplication violation.
    #[error("Scan misconfigured: {0}")]
    MisconfiguredScan(String),

    /// Unusable search interval or unresolved motor limits.
    #[error("Bounds error: {0}")]
    Bounds(String),

    /// An event referenced a descriptor the stream never received.
    #[error("Unknown descriptor: {0}")]
    UnknownDescriptor(String),

    /// An event arrived before `start` was called.
    #[error("No run is open; start() must be called before events are sent")]
    NoRunOpen,

    /// A plan failed one of the validation checks.
    #[error("Invalid plan: {0}")]
    Validation(String),

    /// The requested optimization method does not exist.
    #[error("Unknown optimization method {0:?}")]
    UnknownMethod(String),

    /// A device capability call failed.
    #[error("Device error: {0}")]
    Device(#[from] anyhow::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration loaded but holds invalid values.
    #[error("Configuration validation error: {0}")]
    ConfigValidation(String),

    /// The global tracing subscriber could not be installed.
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),
}
