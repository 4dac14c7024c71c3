//! Streaming document callbacks.
//!
//! - [`AverageStream`]: averages fixed-size windows of events and re-emits them
//! - [`EventRouter`]: builds bundles from asynchronously arriving values

pub mod average;
pub mod batch;
pub mod event_builder;

pub use average::{AverageStream, Mean};
pub use batch::{BatchReducer, BatchStream};
pub use event_builder::{BuiltEvent, EventRouter, EventSink, TimestampBinning};
