//! Structured logging setup.
//!
//! Installs a global `tracing` subscriber configured from [`LoggingConfig`].
//! `RUST_LOG` takes precedence over the configured level when it is set.

use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, PlansConfig};
use crate::error::{PlanError, PlanResult};

/// Build the filter: `RUST_LOG` if present, otherwise the configured level.
pub fn env_filter(logging: &LoggingConfig) -> PlanResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&logging.level)
            .map_err(|e| PlanError::TracingInit(format!("bad level {:?}: {}", logging.level, e))),
    }
}

/// Install the global subscriber described by `config.logging`.
///
/// Fails with [`PlanError::TracingInit`] if a global subscriber is already set.
pub fn init_from_config(config: &PlansConfig) -> PlanResult<()> {
    let filter = env_filter(&config.logging)?;

    let result = if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| PlanError::TracingInit(e.to_string()))
}
