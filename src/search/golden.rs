//! Golden-section search.
//!
//! Narrows the location of the extremum of a unimodal function to an interval
//! no wider than a tolerance. Probe points split the interval by the golden
//! ratio, so every iteration reuses one previous measurement and costs exactly
//! one new probe. The number of iterations depends only on the starting width
//! and the tolerance.
//!
//! [`GoldenSection`] is the search as an explicit state machine, for callers
//! whose probes are asynchronous (see `search::optimize`). The
//! [`golden_section_search`] and [`search`] functions drive it synchronously.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};

/// The golden ratio, (1 + sqrt 5) / 2.
pub const GOLDEN_RATIO: f64 = 1.618_033_988_749_895;

/// Whether to look for a minimum or a maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    /// Find the minimum
    #[default]
    Minimize,
    /// Find the maximum by minimizing the negated signal
    Maximize,
}

impl Objective {
    /// Value the minimizer should see for a raw probe reading.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            Objective::Minimize => value,
            Objective::Maximize => -value,
        }
    }
}

/// Closed interval believed to contain the extremum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchInterval {
    /// Lower bound
    pub lo: f64,
    /// Upper bound
    pub hi: f64,
}

impl SearchInterval {
    /// Interval `[lo, hi]`.
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// `hi - lo`
    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }

    /// Centre of the interval.
    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    /// Whether `x` lies inside, bounds included.
    pub fn contains(&self, x: f64) -> bool {
        self.lo <= x && x <= self.hi
    }

    /// `(lo, hi)`
    pub fn as_tuple(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Low,
    High,
}

/// Golden-section search driven one probe at a time.
///
/// Call [`next_probe`](Self::next_probe) for the position to measure and
/// [`report`](Self::report) with the measured value until `next_probe`
/// returns `None`; then [`result`](Self::result) holds the final interval.
#[derive(Debug, Clone)]
pub struct GoldenSection {
    objective: Objective,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    region: f64,
    low: f64,
    high: f64,
    expect: Side,
    initializing: bool,
    iterations: usize,
    remaining: usize,
    result: Option<SearchInterval>,
}

impl GoldenSection {
    /// Start a search over `[lo, hi]`.
    ///
    /// # Errors
    ///
    /// `PlanError::Bounds` for non-finite bounds, `lo > hi` or a non-positive
    /// tolerance.
    pub fn new(lo: f64, hi: f64, tolerance: f64, objective: Objective) -> PlanResult<Self> {
        if !lo.is_finite() || !hi.is_finite() {
            return Err(PlanError::Bounds(format!(
                "search limits ({}, {}) are not finite",
                lo, hi
            )));
        }
        if lo > hi {
            return Err(PlanError::Bounds(format!(
                "lower limit {} is above upper limit {}",
                lo, hi
            )));
        }
        if !(tolerance > 0.0) {
            return Err(PlanError::Bounds(format!(
                "tolerance must be positive, got {}",
                tolerance
            )));
        }

        let region = hi - lo;
        let mut search = Self {
            objective,
            a: lo,
            b: hi,
            c: hi - region / GOLDEN_RATIO,
            d: lo + region / GOLDEN_RATIO,
            region,
            low: f64::NAN,
            high: f64::NAN,
            expect: Side::Low,
            initializing: true,
            iterations: 0,
            remaining: 0,
            result: None,
        };

        if region <= tolerance {
            search.result = Some(SearchInterval::new(lo, hi));
            return Ok(search);
        }

        let n = ((tolerance / region).ln() / (1.0 / GOLDEN_RATIO).ln()).ceil() as usize;
        search.iterations = n;
        search.remaining = n.saturating_sub(1);
        debug!(
            tolerance,
            steps = n,
            "beginning golden-section search over ({}, {})",
            lo,
            hi
        );
        Ok(search)
    }

    /// Number of iterations `n`; the search takes `n + 1` probes.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Position to measure next, or `None` once finished.
    pub fn next_probe(&self) -> Option<f64> {
        if self.result.is_some() {
            return None;
        }
        Some(match self.expect {
            Side::Low => self.c,
            Side::High => self.d,
        })
    }

    /// Feed the raw reading taken at the last [`next_probe`](Self::next_probe).
    ///
    /// Ignored once the search has finished.
    pub fn report(&mut self, value: f64) {
        if self.result.is_some() {
            return;
        }

        let value = self.objective.apply(value);
        match self.expect {
            Side::Low => self.low = value,
            Side::High => self.high = value,
        }

        if self.initializing && self.expect == Side::Low {
            self.expect = Side::High;
            return;
        }
        self.initializing = false;
        self.advance();
    }

    /// Final interval, once finished.
    pub fn result(&self) -> Option<SearchInterval> {
        self.result
    }

    /// Interval currently known to hold the extremum.
    pub fn bracket(&self) -> SearchInterval {
        SearchInterval::new(self.a, self.b)
    }

    fn advance(&mut self) {
        if self.remaining == 0 {
            let interval = if self.low < self.high {
                SearchInterval::new(self.a, self.d)
            } else {
                SearchInterval::new(self.c, self.b)
            };
            debug!(lo = interval.lo, hi = interval.hi, "golden-section search finished");
            self.result = Some(interval);
            return;
        }

        let step = self.iterations - self.remaining;
        debug!("Iteration {}: extremum is between {} and {}", step, self.a, self.b);
        self.remaining -= 1;

        if self.low < self.high {
            self.b = self.d;
            self.d = self.c;
            self.high = self.low;
            self.region /= GOLDEN_RATIO;
            self.c = self.b - self.region / GOLDEN_RATIO;
            self.expect = Side::Low;
        } else {
            self.a = self.c;
            self.c = self.d;
            self.low = self.high;
            self.region /= GOLDEN_RATIO;
            self.d = self.a + self.region / GOLDEN_RATIO;
            self.expect = Side::High;
        }
    }
}

/// Run a golden-section search with a fallible probe.
///
/// The probe is responsible for any positioning or measurement side effects;
/// its first error aborts the search.
pub fn golden_section_search<F, E>(
    mut probe: F,
    lo: f64,
    hi: f64,
    tolerance: f64,
    objective: Objective,
) -> Result<SearchInterval, E>
where
    F: FnMut(f64) -> Result<f64, E>,
    E: From<PlanError>,
{
    let mut search = GoldenSection::new(lo, hi, tolerance, objective)?;
    while let Some(x) = search.next_probe() {
        let value = probe(x)?;
        search.report(value);
    }
    search
        .result()
        .ok_or_else(|| PlanError::Bounds("search ended without a result".to_string()).into())
}

/// Bracket the minimum (or maximum) of `probe` on `[lo, hi]` to within `tolerance`.
///
/// Returns `(lo, hi)` untouched, without probing, when it is already narrow enough.
pub fn search<F>(
    mut probe: F,
    lo: f64,
    hi: f64,
    tolerance: f64,
    maximize: bool,
) -> PlanResult<(f64, f64)>
where
    F: FnMut(f64) -> f64,
{
    let objective = if maximize {
        Objective::Maximize
    } else {
        Objective::Minimize
    };
    golden_section_search(|x| Ok::<f64, PlanError>(probe(x)), lo, hi, tolerance, objective)
        .map(|interval| interval.as_tuple())
}
