//! Tests for the DAQ step-scan and fly-scan preprocessors.

use daq_plans::plan::{
    daq_during_wrapper, daq_step_scan_wrapper, stubs, validate_plan, Command, DaqDuringConfig,
    DaqStepConfig, DeviceRef, Msg, ParameterValue,
};
use daq_plans::{PlanError, PlanResult};
use std::collections::{BTreeMap, HashMap};

fn daq() -> DeviceRef {
    DeviceRef::new("daq")
}

fn wrap(plan: Vec<Msg>, config: DaqStepConfig) -> PlanResult<Vec<Msg>> {
    daq_step_scan_wrapper(plan, daq(), config).collect()
}

fn on_daq<'a>(msgs: &'a [Msg], command: Command) -> Vec<&'a Msg> {
    msgs.iter()
        .filter(|m| m.command == command && m.is_on(&daq()))
        .collect()
}

#[test]
fn test_plan_without_bundles_is_only_staged() {
    let motor = DeviceRef::new("stage_x");
    let mut plan = vec![stubs::checkpoint()];
    plan.extend(stubs::mv(&motor, 1.0));
    plan.extend(stubs::mv(&motor, 2.0));

    let out = wrap(plan.clone(), DaqStepConfig::default()).unwrap();

    let mut expected = vec![stubs::stage(&daq())];
    expected.extend(plan);
    expected.push(stubs::unstage(&daq()));
    assert_eq!(out, expected);
    assert!(out.iter().all(|m| m.command != Command::Configure));
}

#[test]
fn test_step_scan_configures_once_and_runs_every_step() {
    let det = DeviceRef::new("ipm");
    let motor = DeviceRef::new("stage_x");
    let steps = 5;
    let plan = stubs::scan(&[det.clone()], &motor, 0.0, 4.0, steps);

    let out = wrap(plan, DaqStepConfig::default().with_events(120)).unwrap();

    let configures = on_daq(&out, Command::Configure);
    assert_eq!(configures.len(), 1);
    let kwargs = &configures[0].kwargs;
    assert_eq!(kwargs["events"], ParameterValue::Int(120));
    assert_eq!(kwargs["duration"], ParameterValue::Null);
    assert_eq!(kwargs["record"], ParameterValue::Bool(true));
    assert_eq!(
        kwargs["controls"],
        ParameterValue::Array(vec![ParameterValue::from("stage_x")])
    );

    assert_eq!(on_daq(&out, Command::Trigger).len(), steps);
    assert_eq!(on_daq(&out, Command::Read).len(), steps);

    // Configure comes after the first move and before the first trigger
    let first_set = out.iter().position(|m| m.command == Command::Set).unwrap();
    let configure = out.iter().position(|m| m.command == Command::Configure).unwrap();
    let first_trigger = out.iter().position(|m| m.command == Command::Trigger).unwrap();
    assert!(first_set < configure && configure < first_trigger);
    assert!(out[first_trigger].is_on(&daq()));

    assert_eq!(out.first(), Some(&stubs::stage(&daq())));
    assert_eq!(out.last(), Some(&stubs::unstage(&daq())));

    let (ok, reason) = validate_plan(&out, &HashMap::new());
    assert!(ok, "{}", reason);
}

#[test]
fn test_daq_trigger_shares_group_of_first_trigger() {
    let det = DeviceRef::new("ipm");
    let plan = stubs::count(&[det], 1);
    let out = wrap(plan, DaqStepConfig::default()).unwrap();

    let triggers: Vec<&Msg> = out.iter().filter(|m| m.command == Command::Trigger).collect();
    assert_eq!(triggers.len(), 2);
    assert!(triggers[0].is_on(&daq()));
    assert_eq!(triggers[0].group, triggers[1].group);

    let reads: Vec<&Msg> = out.iter().filter(|m| m.command == Command::Read).collect();
    assert!(reads[0].is_on(&daq()));
}

#[test]
fn test_daq_after_detector_is_misconfigured() {
    let det = DeviceRef::new("ipm");
    let plan = stubs::trigger_and_read(&[det, daq()], "primary");

    let results: Vec<PlanResult<Msg>> =
        daq_step_scan_wrapper(plan, daq(), DaqStepConfig::default()).collect();

    let last = results.last().unwrap();
    match last {
        Err(PlanError::MisconfiguredScan(msg)) => {
            assert!(msg.contains("first detector"), "{}", msg)
        }
        other => panic!("expected MisconfiguredScan, got {:?}", other),
    }
    // No unstage after a failure
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .all(|m| m.command != Command::Unstage));
}

#[test]
fn test_daq_as_first_detector_is_accepted() {
    let det = DeviceRef::new("ipm");
    let plan = stubs::trigger_and_read(&[daq(), det], "primary");
    let out = wrap(plan, DaqStepConfig::default()).unwrap();

    assert_eq!(on_daq(&out, Command::Trigger).len(), 1);
    assert_eq!(on_daq(&out, Command::Read).len(), 1);
    assert_eq!(on_daq(&out, Command::Configure).len(), 1);
}

#[test]
fn test_inner_daq_staging_is_neutralized() {
    let plan = stubs::count(&[daq()], 1);
    let out = wrap(plan, DaqStepConfig::default()).unwrap();

    assert_eq!(on_daq(&out, Command::Stage).len(), 1);
    assert_eq!(on_daq(&out, Command::Unstage).len(), 1);
    assert!(out
        .iter()
        .any(|m| m.command == Command::Stage && m.target == Some(DeviceRef::placeholder())));
}

#[test]
fn test_during_wrapper_flies_the_daq() {
    let det = DeviceRef::new("ipm");
    let plan = stubs::count(&[det], 2);
    let config = DaqDuringConfig {
        controls: Some(vec![DeviceRef::new("stage_x")]),
        ..DaqDuringConfig::default()
    };

    let out: Vec<Msg> = daq_during_wrapper(plan, daq(), config)
        .collect::<PlanResult<_>>()
        .unwrap();

    assert_eq!(out[0], stubs::stage(&daq()));
    assert_eq!(out[1].command, Command::Configure);
    assert_eq!(out[1].kwargs["events"], ParameterValue::Int(0));
    assert_eq!(out.last(), Some(&stubs::unstage(&daq())));

    let open = out.iter().position(|m| m.command == Command::OpenRun).unwrap();
    assert_eq!(out[open + 1].command, Command::Kickoff);
    assert_eq!(out[open + 2].command, Command::Wait);

    let close = out.iter().position(|m| m.command == Command::CloseRun).unwrap();
    let tail: Vec<Command> = out[close - 3..close].iter().map(|m| m.command).collect();
    assert_eq!(tail, vec![Command::Complete, Command::Wait, Command::Collect]);

    // Not a step scan: the DAQ is never triggered per bundle
    assert!(on_daq(&out, Command::Trigger).is_empty());
}

#[test]
fn test_config_defaults_flow_into_configure() {
    let defaults = daq_plans::config::DaqDefaults {
        events: None,
        duration: Some(2.5),
        record: false,
        use_l3t: true,
    };
    let det = DeviceRef::new("ipm");
    let plan = stubs::count(&[det], 1);
    let out = wrap(plan, DaqStepConfig::from(&defaults)).unwrap();

    let configure = on_daq(&out, Command::Configure)[0];
    let expected: BTreeMap<String, ParameterValue> = BTreeMap::from([
        ("events".to_string(), ParameterValue::Null),
        ("duration".to_string(), ParameterValue::Float(2.5)),
        ("record".to_string(), ParameterValue::Bool(false)),
        ("use_l3t".to_string(), ParameterValue::Bool(true)),
        ("controls".to_string(), ParameterValue::Array(Vec::new())),
    ]);
    assert_eq!(configure.kwargs, expected);
}
