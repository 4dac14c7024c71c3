//! Extremum search.
//!
//! - [`golden`]: golden-section search over a caller-supplied probe
//! - [`optimize`]: drives the search with a motor and an averaged detector

pub mod golden;
pub mod optimize;

pub use golden::{
    golden_section_search, search, GoldenSection, Objective, SearchInterval, GOLDEN_RATIO,
};
pub use optimize::{
    maximize, measure_average, minimize, optimize, optimize_with_stream, walk_to_target,
    ErrorSignal, OptimizeOptions, OptimizeTarget,
};
