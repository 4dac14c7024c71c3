//! Plans as instruction streams.
//!
//! - [`msg`]: the [`Msg`] instruction record
//! - [`stubs`]: builders for single instructions and small plans
//! - [`mutator`]: lazy rewriting of a plan, message by message
//! - [`preprocessors`]: DAQ wrappers built on the mutator
//! - [`validate`]: static checks and printable summaries

pub mod msg;
pub mod mutator;
pub mod preprocessors;
pub mod stubs;
pub mod validate;

pub use msg::{Command, DeviceRef, Msg, ParameterValue};
pub use mutator::{plan_mutator, MsgMutator, PlanMutator};
pub use preprocessors::{
    daq_during_wrapper, daq_step_scan_wrapper, DaqDuringConfig, DaqStepConfig, DaqStepMutator,
    StageWrapper,
};
pub use validate::{check_limits, check_open_close, summarize_plan, validate_plan};
