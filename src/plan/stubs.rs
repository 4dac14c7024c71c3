//! Instruction builders and basic plans.
//!
//! Stubs return the messages for one small operation. Plans compose stubs
//! into complete procedures as a `Vec<Msg>`, ready to be wrapped by
//! preprocessors and handed to the interpreter.

use std::collections::BTreeMap;
use uuid::Uuid;

use super::msg::{Command, DeviceRef, Msg, ParameterValue};

/// Begin a run carrying `md` as metadata.
pub fn open_run(md: BTreeMap<String, ParameterValue>) -> Msg {
    Msg {
        kwargs: md,
        ..Msg::new(Command::OpenRun)
    }
}

/// End the current run.
pub fn close_run() -> Msg {
    Msg::new(Command::CloseRun)
}

/// Begin a bundle in `stream`.
pub fn create(stream: &str) -> Msg {
    Msg::new(Command::Create).with_kwarg("name", stream)
}

/// Emit the current bundle.
pub fn save() -> Msg {
    Msg::new(Command::Save)
}

/// Discard the current bundle.
pub fn drop_bundle() -> Msg {
    Msg::new(Command::Drop)
}

/// Set `device` to `value` without waiting.
pub fn set(device: &DeviceRef, value: impl Into<ParameterValue>, group: Option<&str>) -> Msg {
    Msg::new(Command::Set)
        .on(device)
        .with_arg(value)
        .in_group(group)
}

/// Move `device` to `value` and wait for it.
pub fn mv(device: &DeviceRef, value: impl Into<ParameterValue>) -> Vec<Msg> {
    let group = new_group();
    vec![set(device, value, Some(&group)), wait(Some(&group))]
}

/// Trigger `device`.
pub fn trigger(device: &DeviceRef, group: Option<&str>) -> Msg {
    Msg::new(Command::Trigger).on(device).in_group(group)
}

/// Read `device` into the current bundle.
pub fn read(device: &DeviceRef) -> Msg {
    Msg::new(Command::Read).on(device)
}

/// Stage `device`.
pub fn stage(device: &DeviceRef) -> Msg {
    Msg::new(Command::Stage).on(device)
}

/// Unstage `device`.
pub fn unstage(device: &DeviceRef) -> Msg {
    Msg::new(Command::Unstage).on(device)
}

/// Configure `device` with keyword arguments.
pub fn configure(device: &DeviceRef, kwargs: BTreeMap<String, ParameterValue>) -> Msg {
    Msg {
        kwargs,
        ..Msg::new(Command::Configure).on(device)
    }
}

/// Wait for every operation in `group`.
pub fn wait(group: Option<&str>) -> Msg {
    Msg::new(Command::Wait).in_group(group)
}

/// Mark a point the plan may resume from.
pub fn checkpoint() -> Msg {
    Msg::new(Command::Checkpoint)
}

/// Start flyer `device`.
pub fn kickoff(device: &DeviceRef, group: Option<&str>) -> Msg {
    Msg::new(Command::Kickoff).on(device).in_group(group)
}

/// Ask flyer `device` to finish.
pub fn complete(device: &DeviceRef, group: Option<&str>) -> Msg {
    Msg::new(Command::Complete).on(device).in_group(group)
}

/// Collect data from flyer `device`.
pub fn collect(device: &DeviceRef) -> Msg {
    Msg::new(Command::Collect).on(device)
}

/// Fresh completion group name.
pub fn new_group() -> String {
    Uuid::new_v4().to_string()
}

/// Trigger every device, wait, then read them all into one bundle.
pub fn trigger_and_read(devices: &[DeviceRef], stream: &str) -> Vec<Msg> {
    let group = new_group();
    let mut plan: Vec<Msg> = devices
        .iter()
        .map(|device| trigger(device, Some(&group)))
        .collect();
    plan.push(wait(Some(&group)));
    plan.push(create(stream));
    plan.extend(devices.iter().map(read));
    plan.push(save());
    plan
}

/// Take `num` readings of `detectors`.
pub fn count(detectors: &[DeviceRef], num: usize) -> Vec<Msg> {
    let mut md = BTreeMap::new();
    md.insert("plan_name".to_string(), ParameterValue::from("count"));
    md.insert("num_points".to_string(), ParameterValue::from(num));

    let mut plan: Vec<Msg> = detectors.iter().map(stage).collect();
    plan.push(open_run(md));
    for _ in 0..num {
        plan.push(checkpoint());
        plan.extend(trigger_and_read(detectors, "primary"));
    }
    plan.push(close_run());
    plan.extend(detectors.iter().rev().map(unstage));
    plan
}

/// Step `motor` through `num` evenly spaced points from `start` to `stop`,
/// reading `detectors` and the motor at each one.
pub fn scan(
    detectors: &[DeviceRef],
    motor: &DeviceRef,
    start: f64,
    stop: f64,
    num: usize,
) -> Vec<Msg> {
    let mut md = BTreeMap::new();
    md.insert("plan_name".to_string(), ParameterValue::from("scan"));
    md.insert("num_points".to_string(), ParameterValue::from(num));
    md.insert("motors".to_string(), ParameterValue::Array(vec![motor.into()]));

    let mut devices: Vec<DeviceRef> = detectors.to_vec();
    if !devices.contains(motor) {
        devices.push(motor.clone());
    }

    let mut plan: Vec<Msg> = devices.iter().map(stage).collect();
    plan.push(open_run(md));
    for position in linspace(start, stop, num) {
        plan.push(checkpoint());
        plan.extend(mv(motor, position));
        plan.extend(trigger_and_read(&devices, "primary"));
    }
    plan.push(close_run());
    plan.extend(devices.iter().rev().map(unstage));
    plan
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num).map(|i| start + step * i as f64).collect()
        }
    }
}
