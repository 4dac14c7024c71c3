//! DAQ preprocessors.
//!
//! Wrappers that take a plan and return the same plan modified to run the
//! DAQ alongside it. The DAQ is passed in as a [`DeviceRef`]; nothing here
//! looks it up from global state.
//!
//! - [`daq_step_scan_wrapper`]: the DAQ takes data at every bundle of a step scan
//! - [`daq_during_wrapper`]: the DAQ runs as a flyer for the whole of each run

use std::collections::BTreeMap;
use std::iter::FusedIterator;
use tracing::debug;

use super::msg::{Command, DeviceRef, Msg, ParameterValue};
use super::mutator::{plan_mutator, MsgMutator};
use super::stubs;
use crate::config::DaqDefaults;
use crate::error::{PlanError, PlanResult};

/// DAQ configuration for a step scan.
#[derive(Debug, Clone, PartialEq)]
pub struct DaqStepConfig {
    /// Events to take at each step; `None` keeps the DAQ's last value
    pub events: Option<u64>,
    /// Seconds to spend at each step; `None` keeps the DAQ's last value
    pub duration: Option<f64>,
    /// Record the run in the DAQ
    pub record: bool,
    /// Count events after the level-3 trigger filter
    pub use_l3t: bool,
}

impl Default for DaqStepConfig {
    fn default() -> Self {
        Self {
            events: None,
            duration: None,
            record: true,
            use_l3t: false,
        }
    }
}

impl From<&DaqDefaults> for DaqStepConfig {
    fn from(defaults: &DaqDefaults) -> Self {
        Self {
            events: defaults.events,
            duration: defaults.duration,
            record: defaults.record,
            use_l3t: defaults.use_l3t,
        }
    }
}

impl DaqStepConfig {
    /// Take `events` events per step.
    pub fn with_events(mut self, events: u64) -> Self {
        self.events = Some(events);
        self
    }

    /// Spend `duration` seconds per step.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Turn recording on or off.
    pub fn with_record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    fn configure_kwargs(&self, controls: &[DeviceRef]) -> BTreeMap<String, ParameterValue> {
        BTreeMap::from([
            ("events".to_string(), ParameterValue::from(self.events)),
            ("duration".to_string(), ParameterValue::from(self.duration)),
            ("record".to_string(), ParameterValue::from(self.record)),
            ("use_l3t".to_string(), ParameterValue::from(self.use_l3t)),
            ("controls".to_string(), controls_value(controls)),
        ])
    }
}

fn controls_value(controls: &[DeviceRef]) -> ParameterValue {
    ParameterValue::Array(controls.iter().map(ParameterValue::from).collect())
}

/// Inserts the DAQ into the trigger/read protocol of every bundle.
///
/// One instance serves exactly one plan.
#[derive(Debug, Clone)]
pub struct DaqStepMutator {
    daq: DeviceRef,
    config: DaqStepConfig,
    first_calib_cycle: bool,
    first_trigger: bool,
    first_read: bool,
    daq_has_triggered: bool,
    motor_cache: Vec<DeviceRef>,
}

impl DaqStepMutator {
    /// Fresh state for one plan.
    pub fn new(daq: DeviceRef, config: DaqStepConfig) -> Self {
        Self {
            daq,
            config,
            first_calib_cycle: true,
            first_trigger: true,
            first_read: true,
            daq_has_triggered: false,
            motor_cache: Vec::new(),
        }
    }

    /// Devices moved so far, in the order first seen.
    pub fn motor_cache(&self) -> &[DeviceRef] {
        &self.motor_cache
    }

    /// Whether the DAQ configure message is still to come.
    pub fn first_calib_cycle_pending(&self) -> bool {
        self.first_calib_cycle
    }

    /// Whether the current bundle has not seen a trigger yet.
    pub fn first_trigger_pending(&self) -> bool {
        self.first_trigger
    }

    /// Whether the current bundle has not seen a read yet.
    pub fn first_read_pending(&self) -> bool {
        self.first_read
    }

    /// Whether the DAQ was triggered in the current bundle.
    pub fn daq_has_triggered(&self) -> bool {
        self.daq_has_triggered
    }

    fn on_trigger(&mut self, msg: Msg) -> PlanResult<Vec<Msg>> {
        let targets_daq = msg.is_on(&self.daq);
        if targets_daq {
            if self.daq_has_triggered {
                return Err(PlanError::MisconfiguredScan(
                    "daq cannot be passed unless it is the first detector".to_string(),
                ));
            }
            self.daq_has_triggered = true;
        }

        if !self.first_trigger {
            return Ok(vec![msg]);
        }
        self.first_trigger = false;

        let mut out = Vec::with_capacity(3);
        // Configure before the first step, once all motors are known
        if self.first_calib_cycle {
            self.first_calib_cycle = false;
            debug!(controls = ?self.motor_cache, "configuring daq");
            out.push(stubs::configure(
                &self.daq,
                self.config.configure_kwargs(&self.motor_cache),
            ));
        }
        if !targets_daq {
            out.push(stubs::trigger(&self.daq, msg.group.as_deref()));
            self.daq_has_triggered = true;
        }
        out.push(msg);
        Ok(out)
    }

    fn on_read(&mut self, msg: Msg) -> Vec<Msg> {
        if !self.first_read {
            return vec![msg];
        }
        self.first_read = false;
        if msg.is_on(&self.daq) {
            vec![msg]
        } else {
            vec![stubs::read(&self.daq), msg]
        }
    }
}

impl MsgMutator for DaqStepMutator {
    fn mutate(&mut self, msg: Msg) -> PlanResult<Vec<Msg>> {
        match msg.command {
            Command::Save | Command::Drop => {
                self.first_trigger = true;
                self.first_read = true;
                self.daq_has_triggered = false;
                Ok(vec![msg])
            }
            Command::Trigger => self.on_trigger(msg),
            Command::Read => Ok(self.on_read(msg)),
            Command::Set => {
                if let Some(target) = &msg.target {
                    if !self.motor_cache.contains(target) {
                        self.motor_cache.push(target.clone());
                    }
                }
                Ok(vec![msg])
            }
            // The wrapper owns DAQ staging
            Command::Stage | Command::Unstage if msg.is_on(&self.daq) => Ok(vec![Msg {
                target: Some(DeviceRef::placeholder()),
                ..msg
            }]),
            _ => Ok(vec![msg]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagePhase {
    Stage,
    Body,
    Done,
}

/// Stages a device around a fallible plan.
///
/// The closing unstage is emitted only when the plan ends without error.
#[derive(Debug)]
pub struct StageWrapper<I> {
    device: DeviceRef,
    plan: I,
    phase: StagePhase,
}

impl<I> StageWrapper<I>
where
    I: Iterator<Item = PlanResult<Msg>>,
{
    /// Wrap `plan` in `stage(device)` / `unstage(device)`.
    pub fn new(device: DeviceRef, plan: I) -> Self {
        Self {
            device,
            plan,
            phase: StagePhase::Stage,
        }
    }
}

impl<I> Iterator for StageWrapper<I>
where
    I: Iterator<Item = PlanResult<Msg>>,
{
    type Item = PlanResult<Msg>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.phase {
            StagePhase::Stage => {
                self.phase = StagePhase::Body;
                Some(Ok(stubs::stage(&self.device)))
            }
            StagePhase::Body => match self.plan.next() {
                Some(Ok(msg)) => Some(Ok(msg)),
                Some(Err(e)) => {
                    self.phase = StagePhase::Done;
                    Some(Err(e))
                }
                None => {
                    self.phase = StagePhase::Done;
                    Some(Ok(stubs::unstage(&self.device)))
                }
            },
            StagePhase::Done => None,
        }
    }
}

impl<I> FusedIterator for StageWrapper<I> where I: Iterator<Item = PlanResult<Msg>> {}

/// Turn an open plan into a DAQ step scan.
///
/// Stages the DAQ around the plan, configures it before the first trigger
/// with every motor moved so far as `controls`, and puts a DAQ trigger and a
/// DAQ read ahead of the first trigger and first read of every bundle. If the
/// plan triggers the DAQ itself it must be the first detector; triggering it
/// again in the same bundle fails with `PlanError::MisconfiguredScan`.
///
/// ```
/// use daq_plans::plan::{daq_step_scan_wrapper, stubs, DaqStepConfig, DeviceRef};
///
/// let det = DeviceRef::new("ipm");
/// let daq = DeviceRef::new("daq");
/// let plan = stubs::count(&[det], 3);
/// let msgs: Vec<_> = daq_step_scan_wrapper(plan, daq, DaqStepConfig::default().with_events(120))
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(msgs.iter().filter(|m| m.command.as_str() == "configure").count(), 1);
/// ```
pub fn daq_step_scan_wrapper<P>(
    plan: P,
    daq: DeviceRef,
    config: DaqStepConfig,
) -> impl Iterator<Item = PlanResult<Msg>>
where
    P: IntoIterator<Item = Msg>,
{
    let mutator = DaqStepMutator::new(daq.clone(), config);
    StageWrapper::new(daq, plan_mutator(plan, mutator))
}

/// DAQ configuration for [`daq_during_wrapper`].
#[derive(Debug, Clone, PartialEq)]
pub struct DaqDuringConfig {
    /// Record the run in the DAQ
    pub record: bool,
    /// Count events after the level-3 trigger filter
    pub use_l3t: bool,
    /// Devices whose values go into the DAQ data stream
    pub controls: Option<Vec<DeviceRef>>,
}

impl Default for DaqDuringConfig {
    fn default() -> Self {
        Self {
            record: true,
            use_l3t: false,
            controls: None,
        }
    }
}

/// Runs the DAQ as a flyer inside every run.
#[derive(Debug, Clone)]
struct FlyDuring {
    daq: DeviceRef,
}

impl MsgMutator for FlyDuring {
    fn mutate(&mut self, msg: Msg) -> PlanResult<Vec<Msg>> {
        match msg.command {
            Command::OpenRun => {
                let group = stubs::new_group();
                Ok(vec![
                    msg,
                    stubs::kickoff(&self.daq, Some(&group)),
                    stubs::wait(Some(&group)),
                ])
            }
            Command::CloseRun => {
                let group = stubs::new_group();
                Ok(vec![
                    stubs::complete(&self.daq, Some(&group)),
                    stubs::wait(Some(&group)),
                    stubs::collect(&self.daq),
                    msg,
                ])
            }
            _ => Ok(vec![msg]),
        }
    }
}

/// Run the DAQ for the whole duration of each run of `plan`.
///
/// The DAQ is staged around the plan and configured for free-running
/// (`events=0`) up front. This is not a step scan; see
/// [`daq_step_scan_wrapper`] for that.
pub fn daq_during_wrapper<P>(
    plan: P,
    daq: DeviceRef,
    config: DaqDuringConfig,
) -> impl Iterator<Item = PlanResult<Msg>>
where
    P: IntoIterator<Item = Msg>,
{
    let controls = config
        .controls
        .as_deref()
        .map_or(ParameterValue::Null, controls_value);
    let kwargs = BTreeMap::from([
        ("events".to_string(), ParameterValue::Int(0)),
        ("record".to_string(), ParameterValue::from(config.record)),
        ("use_l3t".to_string(), ParameterValue::from(config.use_l3t)),
        ("controls".to_string(), controls),
    ]);

    let configure = std::iter::once(Ok(stubs::configure(&daq, kwargs)));
    let body = plan_mutator(plan, FlyDuring { daq: daq.clone() });
    StageWrapper::new(daq, configure.chain(body))
}
