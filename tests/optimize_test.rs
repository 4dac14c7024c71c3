//! Tests for device-driven optimization against mock hardware.

use async_trait::async_trait;
use daq_plans::device::mock::{MockMotor, MockSignal};
use daq_plans::device::{Movable, Readable, Reading};
use daq_plans::experiment::{DataKey, DataValue, DocumentCollector};
use daq_plans::search::{
    maximize, measure_average, minimize, optimize, optimize_with_stream, walk_to_target,
    GoldenSection, Objective, OptimizeOptions, OptimizeTarget,
};
use daq_plans::streams::AverageStream;
use daq_plans::PlanError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Detector that times out on one chosen read.
struct FlakyDetector {
    reads: AtomicUsize,
    fail_on: usize,
}

impl FlakyDetector {
    fn new(fail_on: usize) -> Self {
        Self {
            reads: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl Readable for FlakyDetector {
    fn name(&self) -> &str {
        "diode"
    }

    async fn read(&self) -> anyhow::Result<HashMap<String, Reading>> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            anyhow::bail!("transient read timeout");
        }
        Ok(HashMap::from([("diode".to_string(), Reading::new(n as f64, 0.0))]))
    }

    async fn describe(&self) -> anyhow::Result<HashMap<String, DataKey>> {
        Ok(HashMap::from([("diode".to_string(), DataKey::scalar("diode", "V"))]))
    }
}

fn parabola(motor: &Arc<MockMotor>) -> MockSignal {
    MockSignal::new("ipm", Arc::clone(motor), |x| (x - 3.0).powi(2))
}

#[tokio::test]
async fn test_minimize_moves_to_center_of_bracket() {
    let motor = Arc::new(MockMotor::new("stage_x").with_limits(0.0, 10.0));
    let signal = parabola(&motor);
    let options = OptimizeOptions::default().with_tolerance(0.01);

    let interval = minimize(&signal, OptimizeTarget::bounded(&*motor), &options)
        .await
        .unwrap();

    assert!(interval.contains(3.0));
    assert!(interval.width() <= 0.01);
    assert_eq!(motor.current().await, interval.midpoint());

    let probes = GoldenSection::new(0.0, 10.0, 0.01, Objective::Minimize)
        .unwrap()
        .iterations()
        + 1;
    // One move per probe plus the final move to the midpoint
    assert_eq!(motor.move_count(), probes + 1);
    assert_eq!(signal.trigger_count(), probes);
}

#[tokio::test]
async fn test_maximize_with_explicit_limits() {
    let motor = Arc::new(MockMotor::new("delay"));
    let signal = MockSignal::new("diode", Arc::clone(&motor), |x| 10.0 - (x + 1.0).powi(2));
    let options = OptimizeOptions::default()
        .with_limits(-5.0, 5.0)
        .with_tolerance(0.05);

    let interval = maximize(&signal, OptimizeTarget::unbounded(&*motor), &options)
        .await
        .unwrap();

    assert!(interval.contains(-1.0));
    assert!((motor.current().await + 1.0).abs() < 0.05);
}

#[tokio::test]
async fn test_walk_to_target_value() {
    let motor = Arc::new(MockMotor::new("stage_y").with_limits(0.0, 10.0));
    let signal = MockSignal::new("encoder", Arc::clone(&motor), |x| 2.0 * x);
    let options = OptimizeOptions::default().with_tolerance(0.01);

    walk_to_target(&signal, OptimizeTarget::bounded(&*motor), 4.0, &options)
        .await
        .unwrap();

    assert!((motor.current().await - 2.0).abs() < 0.01);
}

#[tokio::test]
async fn test_averaging_triggers_every_shot() {
    let motor = Arc::new(MockMotor::new("stage_x"));
    let signal = parabola(&motor);
    let options = OptimizeOptions::default()
        .with_limits(0.0, 10.0)
        .with_tolerance(0.5)
        .with_average(3);

    optimize(&signal, OptimizeTarget::unbounded(&*motor), &options)
        .await
        .unwrap();

    let probes = GoldenSection::new(0.0, 10.0, 0.5, Objective::Minimize)
        .unwrap()
        .iterations()
        + 1;
    assert_eq!(signal.trigger_count(), probes * 3);
}

#[tokio::test]
async fn test_subscribers_see_one_event_per_probe() {
    let motor = Arc::new(MockMotor::new("stage_x"));
    let signal = parabola(&motor);
    let options = OptimizeOptions::default()
        .with_limits(0.0, 10.0)
        .with_tolerance(0.1);

    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(None);
    stream.subscribe(Box::new(collector.clone()));

    optimize_with_stream(&signal, OptimizeTarget::unbounded(&*motor), &options, &mut stream)
        .await
        .unwrap();

    let probes = GoldenSection::new(0.0, 10.0, 0.1, Objective::Minimize)
        .unwrap()
        .iterations()
        + 1;
    let docs = collector.lock();
    assert_eq!(docs.starts.len(), 1);
    assert_eq!(docs.starts[0].plan_args["motor"], "stage_x");
    assert_eq!(docs.descriptors.len(), 1);
    assert_eq!(docs.events.len(), probes);
    assert_eq!(docs.stops.len(), 1);
    assert_eq!(docs.stops[0].exit_status, "success");
    assert_eq!(docs.stops[0].total_events() as usize, probes);
}

#[tokio::test]
async fn test_missing_limits_is_bounds_error() {
    let motor = Arc::new(MockMotor::new("stage_x"));
    let signal = parabola(&motor);

    let err = optimize(&signal, OptimizeTarget::bounded(&*motor), &OptimizeOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PlanError::Bounds(_)));
    assert_eq!(motor.move_count(), 0);
}

#[tokio::test]
async fn test_unknown_method_rejected_before_moving() {
    let motor = Arc::new(MockMotor::new("stage_x"));
    let signal = parabola(&motor);
    let options = OptimizeOptions {
        method: "simplex".to_string(),
        ..OptimizeOptions::default().with_limits(0.0, 1.0)
    };

    let err = optimize(&signal, OptimizeTarget::unbounded(&*motor), &options)
        .await
        .unwrap_err();

    assert!(matches!(err, PlanError::UnknownMethod(ref m) if m == "simplex"));
    assert_eq!(motor.move_count(), 0);
}

#[tokio::test]
async fn test_device_failure_closes_run_as_failed() {
    let motor = Arc::new(MockMotor::new("stage_x").with_limits(0.0, 5.0));
    let signal = parabola(&motor);
    let options = OptimizeOptions::default().with_limits(0.0, 10.0);

    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(None);
    stream.subscribe(Box::new(collector.clone()));

    let target = OptimizeTarget::unbounded(&*motor);
    let err = optimize_with_stream(&signal, target, &options, &mut stream)
        .await
        .unwrap_err();

    assert!(matches!(err, PlanError::Device(_)));
    assert!(!stream.is_running());
    assert!(Movable::position(&*motor).await.unwrap() < 5.0);

    let docs = collector.lock();
    assert_eq!(docs.stops[0].exit_status, "fail");
    assert!(docs.stops[0].reason.contains("outside soft limits"));
}

#[tokio::test]
async fn test_measure_average_retry_after_failed_read() {
    let detector = FlakyDetector::new(2);
    let mut stream = AverageStream::new(None);

    let err = measure_average(&[&detector], 3, &mut stream)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Device(_)));
    assert_eq!(stream.raw_cache_len(), 0);
    assert!(stream.is_running());

    // Reads 3, 4 and 5 succeed
    let data = measure_average(&[&detector], 3, &mut stream).await.unwrap();
    assert_eq!(data["diode"], DataValue::Number(4.0));
}

#[tokio::test]
async fn test_repeated_measurements_share_a_descriptor() {
    let motor = Arc::new(MockMotor::new("stage_x"));
    let signal = parabola(&motor);
    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(None);
    stream.subscribe(Box::new(collector.clone()));

    for _ in 0..5 {
        measure_average(&[&signal], 2, &mut stream).await.unwrap();
    }

    let docs = collector.lock();
    assert_eq!(docs.descriptors.len(), 1);
    assert_eq!(docs.events.len(), 5);
    let seq: Vec<u32> = docs.events.iter().map(|e| e.seq_num).collect();
    assert_eq!(seq, vec![1, 2, 3, 4, 5]);
}
