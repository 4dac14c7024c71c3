//! Device capability traits
//!
//! Plans talk to hardware only through these traits. Each capability is a
//! separate trait so a device advertises exactly what it can do, and code that
//! needs a capability asks for it in its signature.
//!
//! - [`Movable`]: positioners (motors, delay stages)
//! - [`Readable`]: detectors that can be triggered and read
//! - [`Bounded`]: positioners with soft limits

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::experiment::{DataKey, DataValue};

pub mod mock;

/// One reading returned by [`Readable::read`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Measured value
    pub value: DataValue,
    /// Unix timestamp of the measurement, in seconds
    pub timestamp: f64,
}

impl Reading {
    /// Reading taken at `timestamp`.
    pub fn new(value: impl Into<DataValue>, timestamp: f64) -> Self {
        Self {
            value: value.into(),
            timestamp,
        }
    }
}

/// Capability for devices that move to a position.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Device name, also the name of its position field.
    fn name(&self) -> &str;

    /// Move to `target` and wait for completion.
    async fn move_abs(&self, target: f64) -> Result<()>;

    /// Current position.
    async fn position(&self) -> Result<f64>;
}

/// Capability for detectors.
#[async_trait]
pub trait Readable: Send + Sync {
    /// Device name.
    fn name(&self) -> &str;

    /// Acquire a new reading and wait for it to complete.
    async fn trigger(&self) -> Result<()> {
        Ok(())
    }

    /// Latest reading of every field.
    async fn read(&self) -> Result<HashMap<String, Reading>>;

    /// Schema of the fields returned by [`read`](Self::read).
    async fn describe(&self) -> Result<HashMap<String, DataKey>>;
}

/// Capability for positioners with soft limits.
pub trait Bounded: Send + Sync {
    /// `(low, high)`, or `None` if unset.
    fn limits(&self) -> Option<(f64, f64)>;
}
