//! Mock Hardware Implementations
//!
//! Simulated devices for tests and dry runs. All state is async-safe.
//!
//! # Available Mocks
//!
//! - `MockMotor` - Positioner with optional soft limits and a move counter
//! - `MockSignal` - Detector whose value is a function of a motor's position

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

use super::{Bounded, Movable, Readable, Reading};
use crate::experiment::document::now_ns;
use crate::experiment::{DataKey, DataValue};

// =============================================================================
// MockMotor - Simulated Positioner
// =============================================================================

/// Mock positioner that reaches its target instantly.
///
/// # Example
///
/// ```rust,ignore
/// let motor = MockMotor::new("stage_x").with_limits(-5.0, 5.0);
/// motor.move_abs(2.0).await?;
/// assert_eq!(motor.position().await?, 2.0);
/// ```
#[derive(Debug)]
pub struct MockMotor {
    name: String,
    position: RwLock<f64>,
    limits: Option<(f64, f64)>,
    moves: AtomicUsize,
}

impl MockMotor {
    /// Create new mock motor at position 0.0
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            position: RwLock::new(0.0),
            limits: None,
            moves: AtomicUsize::new(0),
        }
    }

    /// Set soft limits; moves outside them fail.
    pub fn with_limits(mut self, low: f64, high: f64) -> Self {
        self.limits = Some((low, high));
        self
    }

    /// Number of completed moves.
    pub fn move_count(&self) -> usize {
        self.moves.load(Ordering::SeqCst)
    }

    /// Position without going through the async trait.
    pub async fn current(&self) -> f64 {
        *self.position.read().await
    }
}

#[async_trait]
impl Movable for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn move_abs(&self, target: f64) -> Result<()> {
        if let Some((low, high)) = self.limits {
            if low < high && !(low..=high).contains(&target) {
                bail!(
                    "{}: target {} outside soft limits ({}, {})",
                    self.name,
                    target,
                    low,
                    high
                );
            }
        }
        trace!(motor = %self.name, target, "mock move");
        *self.position.write().await = target;
        self.moves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }
}

#[async_trait]
impl Readable for MockMotor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<HashMap<String, Reading>> {
        let position = *self.position.read().await;
        Ok(HashMap::from([(
            self.name.clone(),
            Reading::new(position, now_ns() as f64 * 1e-9),
        )]))
    }

    async fn describe(&self) -> Result<HashMap<String, DataKey>> {
        Ok(HashMap::from([(
            self.name.clone(),
            DataKey::scalar(&self.name, "mm"),
        )]))
    }
}

impl Bounded for MockMotor {
    fn limits(&self) -> Option<(f64, f64)> {
        self.limits
    }
}

// =============================================================================
// MockSignal - Simulated Detector
// =============================================================================

type Response = Box<dyn Fn(f64) -> f64 + Send + Sync>;

/// Mock detector reading `f(motor position)`.
pub struct MockSignal {
    name: String,
    motor: Arc<MockMotor>,
    response: Response,
    triggers: AtomicUsize,
}

impl std::fmt::Debug for MockSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSignal")
            .field("name", &self.name)
            .field("motor", &self.motor.name)
            .finish()
    }
}

impl MockSignal {
    /// Detector named `name` whose value follows `response` of the motor position.
    pub fn new<F>(name: &str, motor: Arc<MockMotor>, response: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            motor,
            response: Box::new(response),
            triggers: AtomicUsize::new(0),
        }
    }

    /// Number of triggers so far.
    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readable for MockSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn trigger(&self) -> Result<()> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self) -> Result<HashMap<String, Reading>> {
        let value = (self.response)(self.motor.current().await);
        Ok(HashMap::from([(
            self.name.clone(),
            Reading {
                value: DataValue::Number(value),
                timestamp: now_ns() as f64 * 1e-9,
            },
        )]))
    }

    async fn describe(&self) -> Result<HashMap<String, DataKey>> {
        Ok(HashMap::from([(
            self.name.clone(),
            DataKey::scalar(&self.name, ""),
        )]))
    }
}
