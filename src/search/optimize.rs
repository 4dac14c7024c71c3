//! Device-driven optimization.
//!
//! Moves a motor to the extremum of a detector signal using the golden-section
//! search. Every probe moves the motor, then averages a number of shots of the
//! signal through an [`AverageStream`] so the averaged data can be watched by
//! any subscriber of that stream.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::golden::{GoldenSection, Objective, SearchInterval};
use crate::config::SearchConfig;
use crate::device::{Bounded, Movable, Readable, Reading};
use crate::error::{PlanError, PlanResult};
use crate::experiment::{DataKey, DataValue, DescriptorDoc, EventDoc, StartDoc, StopDoc};
use crate::streams::AverageStream;

/// Tuning for [`optimize`].
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOptions {
    /// Width of the final interval
    pub tolerance: f64,
    /// Shots averaged at each probe
    pub average: usize,
    /// Search range; falls back to the motor soft limits
    pub limits: Option<(f64, f64)>,
    /// Optimization method; only "golden" exists
    pub method: String,
    /// Minimize or maximize
    pub objective: Objective,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

impl OptimizeOptions {
    /// Options seeded from the `search` configuration section.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            tolerance: config.tolerance,
            average: config.average,
            limits: None,
            method: config.method.clone(),
            objective: Objective::Minimize,
        }
    }

    /// Search within `(low, high)`.
    pub fn with_limits(mut self, low: f64, high: f64) -> Self {
        self.limits = Some((low, high));
        self
    }

    /// Final interval width.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Shots per probe.
    pub fn with_average(mut self, average: usize) -> Self {
        self.average = average;
        self
    }
}

/// Motor to optimize, with its soft limits when it has them.
#[derive(Clone, Copy)]
pub struct OptimizeTarget<'a> {
    motor: &'a dyn Movable,
    soft_limits: Option<&'a dyn Bounded>,
}

impl<'a> OptimizeTarget<'a> {
    /// Motor without soft limits; explicit limits are then required.
    pub fn unbounded(motor: &'a dyn Movable) -> Self {
        Self {
            motor,
            soft_limits: None,
        }
    }

    /// Motor whose soft limits serve as the default search range.
    pub fn bounded<M: Movable + Bounded>(motor: &'a M) -> Self {
        Self {
            motor,
            soft_limits: Some(motor),
        }
    }

    fn resolve_limits(&self, explicit: Option<(f64, f64)>) -> PlanResult<(f64, f64)> {
        if let Some(limits) = explicit {
            return Ok(limits);
        }
        match self.soft_limits.and_then(|bounded| bounded.limits()) {
            // (0, 0) is how unconfigured soft limits read back
            Some((low, high)) if low != 0.0 || high != 0.0 => {
                warn!(
                    motor = self.motor.name(),
                    "No limits provided. Using the motor soft limits ({}, {})",
                    low,
                    high
                );
                Ok((low, high))
            }
            _ => Err(PlanError::Bounds(
                "No limits provided or set on motor".to_string(),
            )),
        }
    }
}

/// Trigger and read `detectors` `num` times and return the averaged reading.
///
/// Opens a private run on `stream` if none is open. Repeated calls with the
/// same detectors share one descriptor. Shots left over from a failed call
/// are discarded, so a failed measurement can simply be retried. The returned
/// map holds only the fields that could be averaged.
pub async fn measure_average(
    detectors: &[&dyn Readable],
    num: usize,
    stream: &mut AverageStream,
) -> PlanResult<HashMap<String, DataValue>> {
    if !stream.is_running() {
        stream.open(&StartDoc::new("measure_average", "measure_average"))?;
    }
    stream.discard_partial();
    let num = num.max(1);
    stream.set_cache_size(num);

    let outcome = average_shots(detectors, num, stream).await;
    if outcome.is_err() {
        stream.discard_partial();
    }
    outcome
}

async fn average_shots(
    detectors: &[&dyn Readable],
    num: usize,
    stream: &mut AverageStream,
) -> PlanResult<HashMap<String, DataValue>> {
    let run_uid = stream.run_uid().unwrap_or_default().to_string();

    let mut data_keys = HashMap::new();
    for detector in detectors {
        let keys: HashMap<String, DataKey> = detector.describe().await?;
        data_keys.extend(keys);
    }
    let known = stream.declared("primary", &data_keys).map(|d| d.uid.clone());
    let descriptor_uid = match known {
        Some(uid) => uid,
        None => {
            let mut descriptor = DescriptorDoc::new(&run_uid, "primary");
            descriptor.data_keys = data_keys;
            stream.declare(&descriptor)?;
            descriptor.uid
        }
    };

    for shot in 0..num {
        for detector in detectors {
            detector.trigger().await?;
        }
        let mut event = EventDoc::new(&run_uid, &descriptor_uid, shot as u32 + 1);
        for detector in detectors {
            let readings: HashMap<String, Reading> = detector.read().await?;
            for (field, reading) in readings {
                event
                    .timestamps
                    .insert(field.clone(), (reading.timestamp * 1e9) as u64);
                event.data.insert(field, reading.value);
            }
        }
        stream.push(&event)?;
    }

    stream
        .last_event()
        .cloned()
        .ok_or_else(|| PlanError::Consistency("no averaged reading was produced".to_string()))
}

/// Find the extremum of `signal` along the target motor and move there.
///
/// Returns the final bracketing interval; the motor ends at its midpoint.
pub async fn optimize(
    signal: &dyn Readable,
    target: OptimizeTarget<'_>,
    options: &OptimizeOptions,
) -> PlanResult<SearchInterval> {
    let mut stream = AverageStream::new(Some(options.average));
    optimize_with_stream(signal, target, options, &mut stream).await
}

/// [`optimize`], averaging through a caller-owned stream.
///
/// Subscribers of `stream` see one derived event per probe.
pub async fn optimize_with_stream(
    signal: &dyn Readable,
    target: OptimizeTarget<'_>,
    options: &OptimizeOptions,
    stream: &mut AverageStream,
) -> PlanResult<SearchInterval> {
    let (low, high) = target.resolve_limits(options.limits)?;
    if options.method != "golden" {
        return Err(PlanError::UnknownMethod(options.method.clone()));
    }

    let start = StartDoc::new("optimize", "optimize")
        .with_arg("signal", signal.name())
        .with_arg("motor", target.motor.name())
        .with_arg("tolerance", &options.tolerance.to_string())
        .with_arg("average", &options.average.to_string())
        .with_arg("limits", &format!("({}, {})", low, high))
        .with_arg("method", &options.method)
        .with_arg(
            "maximize",
            &(options.objective == Objective::Maximize).to_string(),
        )
        .with_hint(target.motor.name());
    stream.open(&start)?;
    info!(
        signal = signal.name(),
        motor = target.motor.name(),
        "optimization started"
    );

    let outcome = run_golden(signal, target.motor, low, high, options, stream).await;
    let stop = match &outcome {
        Ok(_) => StopDoc::success(&start.uid),
        Err(e) => StopDoc::fail(&start.uid, &e.to_string()),
    };
    stream.close(&stop)?;
    outcome
}

async fn run_golden(
    signal: &dyn Readable,
    motor: &dyn Movable,
    low: f64,
    high: f64,
    options: &OptimizeOptions,
    stream: &mut AverageStream,
) -> PlanResult<SearchInterval> {
    let field = signal.name().to_string();
    let mut search = GoldenSection::new(low, high, options.tolerance, options.objective)?;

    while let Some(position) = search.next_probe() {
        motor.move_abs(position).await?;
        let averaged = measure_average(&[signal], options.average, stream).await?;
        let value = averaged
            .get(&field)
            .and_then(DataValue::as_f64)
            .ok_or_else(|| {
                PlanError::Consistency(format!("averaged reading has no numeric {:?}", field))
            })?;
        debug!("Found a value of {} at {}", value, position);
        search.report(value);
    }

    let interval = search
        .result()
        .ok_or_else(|| PlanError::Bounds("search ended without a result".to_string()))?;
    debug!("Moving motor to center of discovered range ...");
    motor.move_abs(interval.midpoint()).await?;
    Ok(interval)
}

/// Minimize `signal` along the target motor.
pub async fn minimize(
    signal: &dyn Readable,
    target: OptimizeTarget<'_>,
    options: &OptimizeOptions,
) -> PlanResult<SearchInterval> {
    let options = OptimizeOptions {
        objective: Objective::Minimize,
        ..options.clone()
    };
    optimize(signal, target, &options).await
}

/// Maximize `signal` along the target motor.
pub async fn maximize(
    signal: &dyn Readable,
    target: OptimizeTarget<'_>,
    options: &OptimizeOptions,
) -> PlanResult<SearchInterval> {
    let options = OptimizeOptions {
        objective: Objective::Maximize,
        ..options.clone()
    };
    optimize(signal, target, &options).await
}

/// Move the motor until `signal` reads `value`.
///
/// Minimizes the absolute error `|signal - value|`.
pub async fn walk_to_target(
    signal: &dyn Readable,
    target: OptimizeTarget<'_>,
    value: f64,
    options: &OptimizeOptions,
) -> PlanResult<SearchInterval> {
    let error = ErrorSignal::new(signal, value);
    minimize(&error, target, options).await
}

/// Absolute error of another detector's reading from a target value.
pub struct ErrorSignal<'a> {
    inner: &'a dyn Readable,
    target: f64,
    name: String,
}

impl<'a> ErrorSignal<'a> {
    /// Error of `inner` from `target`, named `<inner>_error`.
    pub fn new(inner: &'a dyn Readable, target: f64) -> Self {
        Self {
            inner,
            target,
            name: format!("{}_error", inner.name()),
        }
    }
}

#[async_trait]
impl Readable for ErrorSignal<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn trigger(&self) -> anyhow::Result<()> {
        self.inner.trigger().await
    }

    async fn read(&self) -> anyhow::Result<HashMap<String, Reading>> {
        let readings = self.inner.read().await?;
        let reading = readings
            .get(self.inner.name())
            .ok_or_else(|| anyhow::anyhow!("{} returned no reading", self.inner.name()))?;
        let value = reading
            .value
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("{} is not numeric", self.inner.name()))?;
        Ok(HashMap::from([(
            self.name.clone(),
            Reading::new((value - self.target).abs(), reading.timestamp),
        )]))
    }

    async fn describe(&self) -> anyhow::Result<HashMap<String, DataKey>> {
        Ok(HashMap::from([(
            self.name.clone(),
            DataKey::scalar(self.inner.name(), ""),
        )]))
    }
}
