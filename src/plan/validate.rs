//! Static checks and summaries of plans.
//!
//! Plans are plain message lists, so they can be inspected before anything is
//! sent to hardware.

use std::collections::HashMap;
use tracing::{info, warn};

use super::msg::{Command, DeviceRef, Msg};
use crate::error::{PlanError, PlanResult};

/// Check that runs open and close in matching pairs and that devices are
/// staged and unstaged in balance.
///
/// Nested runs must carry distinct run keys.
pub fn check_open_close(plan: &[Msg]) -> PlanResult<()> {
    let mut run_keys: Vec<Option<&str>> = Vec::new();
    let mut staged: Vec<&DeviceRef> = Vec::new();

    for msg in plan {
        match msg.command {
            Command::OpenRun => {
                let key = msg.run.as_deref();
                if run_keys.contains(&key) {
                    return Err(PlanError::Validation(
                        "Duplicate run_key found, plans are nested incorrectly.".to_string(),
                    ));
                }
                run_keys.push(key);
            }
            Command::CloseRun => match run_keys.pop() {
                Some(key) if key == msg.run.as_deref() => {}
                Some(_) => {
                    return Err(PlanError::Validation(
                        "Mismatched run keys, open_run and close_run misconfigured.".to_string(),
                    ))
                }
                None => {
                    return Err(PlanError::Validation(
                        "Plan closes a run that was never opened.".to_string(),
                    ))
                }
            },
            Command::Stage => {
                if let Some(device) = &msg.target {
                    if staged.contains(&device) {
                        return Err(PlanError::Validation(format!(
                            "Plan attempts to stage {} while it is already staged.",
                            device
                        )));
                    }
                    staged.push(device);
                }
            }
            Command::Unstage => {
                if let Some(device) = &msg.target {
                    match staged.iter().rposition(|d| *d == device) {
                        Some(index) => {
                            staged.remove(index);
                        }
                        None => {
                            return Err(PlanError::Validation(format!(
                                "Plan attempts to unstage {} which has not been staged.",
                                device
                            )))
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if !run_keys.is_empty() {
        return Err(PlanError::Validation(
            "Plan ended without all runs being closed.".to_string(),
        ));
    }
    if !staged.is_empty() {
        return Err(PlanError::Validation(
            "Plan ended without unstaging all staged devices.".to_string(),
        ));
    }
    Ok(())
}

/// Check every `set` against the known limits of its device.
pub fn check_limits(plan: &[Msg], limits: &HashMap<String, (f64, f64)>) -> PlanResult<()> {
    for msg in plan.iter().filter(|m| m.command == Command::Set) {
        let Some(name) = msg.target_name() else {
            continue;
        };
        let Some(&(low, high)) = limits.get(name) else {
            continue;
        };
        let value = msg
            .args
            .first()
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                PlanError::Validation(format!("{} is set to a non-numeric value", name))
            })?;
        if value < low || value > high {
            return Err(PlanError::Validation(format!(
                "{} value {} outside of limits ({}, {})",
                name, value, low, high
            )));
        }
    }
    Ok(())
}

/// Run every check; returns `(true, "")` or `(false, reason)`.
pub fn validate_plan(plan: &[Msg], limits: &HashMap<String, (f64, f64)>) -> (bool, String) {
    let outcome = run_check("check_open_close", || check_open_close(plan))
        .and_then(|()| run_check("check_limits", || check_limits(plan, limits)));

    match outcome {
        Ok(()) => (true, String::new()),
        Err(e) => {
            let reason = match e {
                PlanError::Validation(reason) => reason,
                other => other.to_string(),
            };
            warn!("{}", reason);
            (false, format!("Plan validation failed for reason: {}", reason))
        }
    }
}

fn run_check(name: &str, check: impl FnOnce() -> PlanResult<()>) -> PlanResult<()> {
    info!("running {}", name);
    check()
}

/// One line per move, DAQ configuration, DAQ acquisition and saved bundle.
pub fn summarize_plan(plan: &[Msg], daq: Option<&DeviceRef>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut read_cache: Vec<String> = Vec::new();
    let mut daq_events = String::from("None");
    let mut daq_record = String::from("None");
    let is_daq = |msg: &Msg| daq.is_some_and(|d| msg.is_on(d));

    for msg in plan {
        match msg.command {
            Command::OpenRun => lines.push(format!("{:=^80}", " Open Run ")),
            Command::CloseRun => lines.push(format!("{:=^80}", " Close Run ")),
            Command::Configure if is_daq(msg) => {
                let kwarg = |key: &str| {
                    msg.kwargs
                        .get(key)
                        .map_or_else(|| "None".to_string(), ToString::to_string)
                };
                daq_events = kwarg("events");
                daq_record = kwarg("record");
                lines.push(format!(
                    "Configure DAQ -> (events={}, record={}, use_l3t={}, duration={})",
                    daq_events,
                    daq_record,
                    kwarg("use_l3t"),
                    kwarg("duration")
                ));
            }
            Command::Set => {
                let target = msg.target_name().unwrap_or("None");
                let value = msg
                    .args
                    .first()
                    .map_or_else(|| "None".to_string(), ToString::to_string);
                lines.push(format!("{} -> {}", target, value));
            }
            Command::Create => read_cache.clear(),
            Command::Read => {
                if let Some(name) = msg.target_name() {
                    read_cache.push(name.to_string());
                }
                if is_daq(msg) {
                    lines.push(format!(
                        "  Run DAQ for {} events, (record={})",
                        daq_events, daq_record
                    ));
                }
            }
            Command::Save => lines.push(format!("  Read {:?}", read_cache)),
            _ => {}
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::stubs;
    use std::collections::BTreeMap;

    #[test]
    fn test_balanced_plan_passes() {
        let det = DeviceRef::new("det");
        let plan = stubs::count(&[det], 2);
        assert!(check_open_close(&plan).is_ok());
    }

    #[test]
    fn test_unclosed_run_fails() {
        let plan = vec![stubs::open_run(BTreeMap::new())];
        let err = check_open_close(&plan).unwrap_err();
        assert!(err.to_string().contains("without all runs being closed"));
    }

    #[test]
    fn test_duplicate_run_key_fails() {
        let plan = vec![
            stubs::open_run(BTreeMap::new()).for_run("a"),
            stubs::open_run(BTreeMap::new()).for_run("a"),
        ];
        assert!(check_open_close(&plan).is_err());
    }

    #[test]
    fn test_nested_runs_with_keys_pass() {
        let plan = vec![
            stubs::open_run(BTreeMap::new()).for_run("outer"),
            stubs::open_run(BTreeMap::new()).for_run("inner"),
            stubs::close_run().for_run("inner"),
            stubs::close_run().for_run("outer"),
        ];
        assert!(check_open_close(&plan).is_ok());
    }

    #[test]
    fn test_double_stage_fails() {
        let det = DeviceRef::new("det");
        let plan = vec![stubs::stage(&det), stubs::stage(&det)];
        assert!(check_open_close(&plan).is_err());
    }

    #[test]
    fn test_limits() {
        let motor = DeviceRef::new("motor");
        let limits = HashMap::from([("motor".to_string(), (-1.0, 1.0))]);
        assert!(check_limits(&[stubs::set(&motor, 0.5, None)], &limits).is_ok());
        assert!(check_limits(&[stubs::set(&motor, 1.5, None)], &limits).is_err());
    }

    #[test]
    fn test_validate_plan_reports_reason() {
        let det = DeviceRef::new("det");
        let (ok, reason) = validate_plan(&[stubs::stage(&det)], &HashMap::new());
        assert!(!ok);
        assert_eq!(
            reason,
            "Plan validation failed for reason: Plan ended without unstaging all staged devices."
        );

        let (ok, reason) = validate_plan(&stubs::count(&[det], 1), &HashMap::new());
        assert!(ok);
        assert!(reason.is_empty());
    }

    #[test]
    fn test_summary_lines() {
        let det = DeviceRef::new("det");
        let motor = DeviceRef::new("motor");
        let plan = stubs::scan(&[det], &motor, 0.0, 1.0, 2);
        let lines = summarize_plan(&plan, None);

        assert_eq!(lines[0], format!("{:=^80}", " Open Run "));
        assert_eq!(lines[1], "motor -> 0");
        assert_eq!(lines[2], "  Read [\"det\", \"motor\"]");
        assert_eq!(lines[5], format!("{:=^80}", " Close Run "));
        assert_eq!(lines.len(), 6);
    }
}
