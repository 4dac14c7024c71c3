//! Configuration System using Figment
//!
//! Strongly-typed configuration for the plan library. Configuration is loaded from:
//! 1. `config/daq_plans.toml` (base configuration, optional)
//! 2. Environment variables (prefixed with `DAQPLANS_`)
//!
//! Every section carries serde defaults, so a missing file yields a valid
//! configuration.
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! DAQPLANS_LOGGING__LEVEL=debug
//! DAQPLANS_AVERAGING__DEFAULT_BATCH_SIZE=10
//! DAQPLANS_DAQ__RECORD=false
//! ```
//!
//! # Example
//!
//! ```no_run
//! use daq_plans::config::PlansConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PlansConfig::load()?;
//!     println!("Log level: {}", config.logging.level);
//!     println!("Default batch size: {}", config.averaging.default_batch_size);
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PlanError, PlanResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/daq_plans.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlansConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Stream averaging defaults
    #[serde(default)]
    pub averaging: AveragingConfig,
    /// Default DAQ step-scan configuration
    #[serde(default)]
    pub daq: DaqDefaults,
    /// Extremum search defaults
    #[serde(default)]
    pub search: SearchConfig,
    /// Event router settings
    #[serde(default)]
    pub event_builder: EventBuilderConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON-formatted log lines
    #[serde(default)]
    pub json: bool,
}

/// Averaging stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragingConfig {
    /// Number of events averaged together when a run does not override it
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

/// DAQ configuration applied by the step-scan preprocessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqDefaults {
    /// Events per step
    #[serde(default)]
    pub events: Option<u64>,
    /// Seconds per step
    #[serde(default)]
    pub duration: Option<f64>,
    /// Record the run in the DAQ
    #[serde(default = "default_record")]
    pub record: bool,
    /// Use the level-3 trigger filter for the event count
    #[serde(default)]
    pub use_l3t: bool,
}

/// Extremum search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Width of the final bracketing interval
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Optimization method name
    #[serde(default = "default_method")]
    pub method: String,
    /// Shots averaged at every probe
    #[serde(default = "default_average")]
    pub average: usize,
}

/// Event router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBuilderConfig {
    /// Timestamp bin rate in Hz; `None` bins at nanosecond resolution
    #[serde(default)]
    pub bin_rate_hz: Option<f64>,
    /// Discard emitted and stale buckets automatically
    #[serde(default = "default_auto_clear")]
    pub auto_clear: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_record() -> bool {
    true
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_method() -> String {
    "golden".to_string()
}

fn default_average() -> usize {
    1
}

fn default_auto_clear() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
        }
    }
}

impl Default for DaqDefaults {
    fn default() -> Self {
        Self {
            events: None,
            duration: None,
            record: default_record(),
            use_l3t: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            method: default_method(),
            average: default_average(),
        }
    }
}

impl Default for EventBuilderConfig {
    fn default() -> Self {
        Self {
            bin_rate_hz: None,
            auto_clear: default_auto_clear(),
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl PlansConfig {
    /// Load configuration from `config/daq_plans.toml` and environment variables
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`DAQPLANS_` prefix)
    /// 2. `config/daq_plans.toml`
    /// 3. Built-in defaults
    pub fn load() -> PlanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Config` if the file cannot be parsed and
    /// `PlanError::ConfigValidation` if a value is out of range.
    pub fn load_from<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQPLANS_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Render this configuration as TOML, e.g. to seed a config file.
    pub fn to_toml_string(&self) -> PlanResult<String> {
        toml::to_string_pretty(self).map_err(|e| PlanError::ConfigValidation(e.to_string()))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Batch size and probe average are at least 1
    /// - DAQ duration, search tolerance and bin rate are positive
    /// - Optimization method is known
    pub fn validate(&self) -> PlanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(PlanError::ConfigValidation(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        if self.averaging.default_batch_size == 0 {
            return Err(PlanError::ConfigValidation(
                "Invalid averaging.default_batch_size 0. Must be at least 1".to_string(),
            ));
        }

        if let Some(duration) = self.daq.duration {
            if !(duration > 0.0) {
                return Err(PlanError::ConfigValidation(format!(
                    "Invalid daq.duration {}. Must be positive",
                    duration
                )));
            }
        }

        if !(self.search.tolerance > 0.0) || !self.search.tolerance.is_finite() {
            return Err(PlanError::ConfigValidation(format!(
                "Invalid search.tolerance {}. Must be a positive number",
                self.search.tolerance
            )));
        }

        if self.search.method != "golden" {
            return Err(PlanError::ConfigValidation(format!(
                "Invalid search.method '{}'. Must be one of: golden",
                self.search.method
            )));
        }

        if self.search.average == 0 {
            return Err(PlanError::ConfigValidation(
                "Invalid search.average 0. Must be at least 1".to_string(),
            ));
        }

        if let Some(rate) = self.event_builder.bin_rate_hz {
            if !(rate > 0.0) || !rate.is_finite() {
                return Err(PlanError::ConfigValidation(format!(
                    "Invalid event_builder.bin_rate_hz {}. Must be a positive number",
                    rate
                )));
            }
        }

        Ok(())
    }
}
