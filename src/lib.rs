//! Core library for beamline experiment plans.
//!
//! This library contains the document model, streaming document callbacks
//! (batch averaging, timestamp event building), the golden-section extremum
//! search, and the DAQ step-scan instruction preprocessor used when composing
//! data-acquisition plans.
//!
//! - [`experiment`]: run documents, the callback trait and the re-emitting dispatcher
//! - [`streams`]: `AverageStream` and the `EventRouter`
//! - [`search`]: golden-section search and device-driven optimization
//! - [`plan`]: plan instructions, stubs, the mutator and DAQ preprocessors
//! - [`callbacks`]: run-table formatting and electronic logbook posting
//! - [`device`]: capability traits for motors and detectors

pub mod callbacks;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod experiment;
pub mod plan;
pub mod search;
pub mod streams;
pub mod tracing_init;

pub use error::{PlanError, PlanResult};
