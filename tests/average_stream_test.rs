//! Tests for the averaging document stream.

use daq_plans::experiment::{
    DataKey, DataValue, DescriptorDoc, DocumentCallback, DocumentCollector, Dtype, EventDoc,
    StartDoc, StopDoc,
};
use daq_plans::streams::AverageStream;
use daq_plans::PlanError;

fn descriptor(run_uid: &str) -> DescriptorDoc {
    DescriptorDoc::new(run_uid, "primary")
        .with_data_key("ipm", DataKey::scalar("ipm", "V"))
        .with_data_key("shots", DataKey::new(Dtype::Integer, "evr"))
        .with_data_key("wave", DataKey::array("wave8", vec![3]))
}

fn event(run_uid: &str, desc: &DescriptorDoc, seq: u32, ipm: f64) -> EventDoc {
    EventDoc::new(run_uid, &desc.uid, seq)
        .with_datum("ipm", ipm)
        .with_datum("shots", DataValue::Integer(seq as i64))
        .with_datum("wave", vec![ipm, 2.0 * ipm, 0.0])
}

#[test]
fn test_mean_of_each_window() {
    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(Some(4));
    stream.subscribe(Box::new(collector.clone()));

    let start = StartDoc::new("count", "count");
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();

    for (i, ipm) in [1.0, 2.0, 3.0, 6.0].into_iter().enumerate() {
        stream.event(&event(&start.uid, &desc, i as u32 + 1, ipm)).unwrap();
    }
    stream.stop(&StopDoc::success(&start.uid)).unwrap();

    let docs = collector.lock();
    assert_eq!(docs.starts.len(), 1);
    assert_eq!(docs.events.len(), 1);

    let data = &docs.events[0].data;
    assert_eq!(data["ipm"], DataValue::Number(3.0));
    assert_eq!(data["shots"], DataValue::Number(2.5));
    assert_eq!(data["wave"], DataValue::Array(vec![3.0, 6.0, 0.0]));

    // Integers are declared as numbers once averaged
    assert_eq!(docs.descriptors[0].data_keys["shots"].dtype, Dtype::Number);
    assert_eq!(docs.stops[0].num_events["primary"], 1);
}

#[test]
fn test_emits_every_k_events() {
    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(Some(3));
    stream.subscribe(Box::new(collector.clone()));

    let start = StartDoc::new("count", "count");
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();

    let mut flushed_at = Vec::new();
    for seq in 1..=7 {
        if stream.push(&event(&start.uid, &desc, seq, 1.0)).unwrap().is_some() {
            flushed_at.push(seq);
        }
    }

    assert_eq!(flushed_at, vec![3, 6]);
    assert_eq!(stream.raw_cache_len(), 1);

    let docs = collector.lock();
    let seq_nums: Vec<u32> = docs.events.iter().map(|e| e.seq_num).collect();
    assert_eq!(seq_nums, vec![1, 2]);
    // One derived descriptor per raw descriptor
    assert_eq!(docs.descriptors.len(), 1);
}

#[test]
fn test_metadata_overrides_window() {
    let mut stream = AverageStream::new(Some(5));
    let start = StartDoc::new("count", "count").with_metadata("average", 2i64);
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();

    assert_eq!(stream.cache_size(), 2);
    assert!(stream.push(&event(&start.uid, &desc, 1, 1.0)).unwrap().is_none());
    assert!(stream.push(&event(&start.uid, &desc, 2, 3.0)).unwrap().is_some());
    assert_eq!(stream.last_event().unwrap()["ipm"], DataValue::Number(2.0));
}

#[test]
fn test_descriptor_mismatch_fails_at_flush() {
    let mut stream = AverageStream::new(Some(3));
    let start = StartDoc::new("count", "count");
    let primary = descriptor(&start.uid);
    let other = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&primary).unwrap();
    stream.descriptor(&other).unwrap();

    // Not detected while caching
    assert!(stream.push(&event(&start.uid, &primary, 1, 1.0)).unwrap().is_none());
    assert!(stream.push(&event(&start.uid, &other, 1, 1.0)).unwrap().is_none());

    let err = stream.push(&event(&start.uid, &primary, 2, 1.0)).unwrap_err();
    match err {
        PlanError::Consistency(msg) => {
            assert!(msg.contains("different configurations"), "{}", msg)
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(stream.raw_cache_len(), 0);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let mut stream = AverageStream::new(Some(2));
    let start = StartDoc::new("count", "count");
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();

    for seq in 1..=2 {
        let e = event(&start.uid, &desc, seq, 4.0).with_datum("stray", 99.0);
        stream.push(&e).unwrap();
    }

    let data = stream.last_event().unwrap();
    assert!(!data.contains_key("stray"));
    assert_eq!(data["ipm"], DataValue::Number(4.0));
}

#[test]
fn test_array_length_mismatch_is_consistency_error() {
    let mut stream = AverageStream::new(Some(2));
    let start = StartDoc::new("count", "count");
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();

    stream.push(&event(&start.uid, &desc, 1, 1.0)).unwrap();
    let short = event(&start.uid, &desc, 2, 1.0).with_datum("wave", vec![1.0]);
    assert!(matches!(
        stream.push(&short),
        Err(PlanError::Consistency(_))
    ));
}

#[test]
fn test_events_before_start_are_rejected() {
    let mut stream = AverageStream::new(None);
    let e = EventDoc::new("run", "desc", 1).with_datum("ipm", 1.0);
    assert!(matches!(stream.push(&e), Err(PlanError::NoRunOpen)));
}

#[test]
fn test_partial_window_dropped_at_stop() {
    let collector = DocumentCollector::shared();
    let mut stream = AverageStream::new(Some(3));
    stream.subscribe(Box::new(collector.clone()));

    let start = StartDoc::new("count", "count");
    let desc = descriptor(&start.uid);
    stream.start(&start).unwrap();
    stream.descriptor(&desc).unwrap();
    stream.push(&event(&start.uid, &desc, 1, 1.0)).unwrap();
    stream.stop(&StopDoc::success(&start.uid)).unwrap();

    assert!(!stream.is_running());
    assert_eq!(stream.raw_cache_len(), 0);
    let docs = collector.lock();
    assert!(docs.events.is_empty());
    assert_eq!(docs.stops.len(), 1);
    assert_eq!(docs.stops[0].total_events(), 0);
}
