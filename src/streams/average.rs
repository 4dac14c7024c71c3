//! Stream averager.
//!
//! As event documents are emitted they are collected by an [`AverageStream`],
//! averaged in fixed-size windows and re-emitted as a secondary event stream.
//! The window size comes from the constructor, or per run from the `average`
//! key of the start document metadata.

use tracing::warn;

use super::batch::{BatchReducer, BatchStream};
use crate::config::AveragingConfig;
use crate::error::{PlanError, PlanResult};
use crate::experiment::{DataValue, Dtype};

/// Arithmetic mean of numeric and array fields.
///
/// Integers average to numbers. Arrays are averaged elementwise and must share
/// one length. String and boolean fields are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

impl BatchReducer for Mean {
    fn reduce(
        &self,
        field: &str,
        dtype: Dtype,
        values: &[&DataValue],
    ) -> PlanResult<Option<DataValue>> {
        if values.is_empty() {
            return Ok(None);
        }

        match dtype {
            Dtype::Number | Dtype::Integer => {
                let mut sum = 0.0;
                for value in values {
                    sum += value.as_f64().ok_or_else(|| {
                        PlanError::Consistency(format!(
                            "field {:?} declared {} but holds {:?}",
                            field, dtype, value
                        ))
                    })?;
                }
                Ok(Some(DataValue::Number(sum / values.len() as f64)))
            }
            Dtype::Array => {
                let mut sum: Vec<f64> = Vec::new();
                for (i, value) in values.iter().enumerate() {
                    let items = value.as_array().ok_or_else(|| {
                        PlanError::Consistency(format!(
                            "field {:?} declared array but holds {:?}",
                            field, value
                        ))
                    })?;
                    if i == 0 {
                        sum = items.to_vec();
                    } else if items.len() != sum.len() {
                        return Err(PlanError::Consistency(format!(
                            "field {:?} has arrays of length {} and {}",
                            field,
                            sum.len(),
                            items.len()
                        )));
                    } else {
                        for (acc, item) in sum.iter_mut().zip(items) {
                            *acc += item;
                        }
                    }
                }
                let n = values.len() as f64;
                Ok(Some(DataValue::Array(sum.into_iter().map(|v| v / n).collect())))
            }
            Dtype::String | Dtype::Boolean => {
                warn!(field, dtype = %dtype, "non-numeric field dropped from average");
                Ok(None)
            }
        }
    }
}

/// Stream that averages every `n` events into one.
pub type AverageStream = BatchStream<Mean>;

impl BatchStream<Mean> {
    /// Averaging stream; `None` averages single events.
    pub fn new(num: Option<usize>) -> Self {
        Self::with_reducer(Mean, num.unwrap_or(1))
    }

    /// Averaging stream using the configured default window.
    pub fn from_config(config: &AveragingConfig) -> Self {
        Self::new(Some(config.default_batch_size))
    }
}
