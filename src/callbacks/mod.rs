//! Document consumers that report on finished runs.

pub mod run_table;

pub use run_table::{format_value, Elog, ElogPoster, RunTable, NOT_AVAILABLE};
