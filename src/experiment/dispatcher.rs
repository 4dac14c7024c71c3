//! Re-emission of derived document streams.
//!
//! [`LiveDispatcher`] is the building block for callbacks that consume one
//! document stream and publish another: it owns the derived run identity,
//! mints derived descriptors on demand and keeps per-stream sequence numbers.

use std::collections::HashMap;
use tracing::{debug, info};

use super::callback::DocumentCallback;
use super::document::{DataKey, DataValue, DescriptorDoc, EventDoc, StartDoc, StopDoc};
use crate::error::{PlanError, PlanResult};

struct DerivedStream {
    descriptor_uid: String,
    name: String,
    seq_num: u32,
}

/// Publishes a derived document stream to its subscribers.
#[derive(Default)]
pub struct LiveDispatcher {
    subscribers: Vec<Box<dyn DocumentCallback + Send>>,
    run_uid: Option<String>,
    raw_descriptors: HashMap<String, DescriptorDoc>,
    derived: HashMap<String, DerivedStream>,
}

impl std::fmt::Debug for LiveDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDispatcher")
            .field("subscribers", &self.subscribers.len())
            .field("run_uid", &self.run_uid)
            .field("raw_descriptors", &self.raw_descriptors.len())
            .finish()
    }
}

impl LiveDispatcher {
    /// Dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; it receives every document emitted from now on.
    pub fn subscribe(&mut self, callback: Box<dyn DocumentCallback + Send>) {
        self.subscribers.push(callback);
    }

    /// Whether a derived run is open.
    pub fn is_running(&self) -> bool {
        self.run_uid.is_some()
    }

    /// Uid of the derived run, if open.
    pub fn run_uid(&self) -> Option<&str> {
        self.run_uid.as_deref()
    }

    /// Raw descriptor seen under `uid`.
    pub fn raw_descriptor(&self, uid: &str) -> Option<&DescriptorDoc> {
        self.raw_descriptors.get(uid)
    }

    /// Raw descriptor of stream `name` already declaring exactly `data_keys`.
    pub fn matching_descriptor(
        &self,
        name: &str,
        data_keys: &HashMap<String, DataKey>,
    ) -> Option<&DescriptorDoc> {
        self.raw_descriptors
            .values()
            .find(|d| d.name == name && &d.data_keys == data_keys)
    }

    /// Open a derived run mirroring the upstream start document.
    pub fn start(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.raw_descriptors.clear();
        self.derived.clear();

        let mut derived = StartDoc::new(&doc.plan_type, &doc.plan_name);
        derived.plan_args = doc.plan_args.clone();
        derived.metadata = doc.metadata.clone();
        derived.hints = doc.hints.clone();
        info!(upstream = %doc.uid, derived = %derived.uid, "derived run started");

        self.run_uid = Some(derived.uid.clone());
        self.emit(|cb| cb.start(&derived))
    }

    /// Remember an upstream descriptor for later derived events.
    pub fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.raw_descriptors.insert(doc.uid.clone(), doc.clone());
        Ok(())
    }

    /// Emit one derived event computed from bundles under `raw_descriptor_uid`.
    ///
    /// The first event for a raw descriptor also emits a derived descriptor
    /// restricted to the fields present in `data`.
    pub fn process_event(
        &mut self,
        raw_descriptor_uid: &str,
        data: HashMap<String, DataValue>,
        time_ns: u64,
    ) -> PlanResult<EventDoc> {
        let run_uid = self.run_uid.clone().ok_or(PlanError::NoRunOpen)?;
        let raw = self
            .raw_descriptors
            .get(raw_descriptor_uid)
            .ok_or_else(|| PlanError::UnknownDescriptor(raw_descriptor_uid.to_string()))?;

        if !self.derived.contains_key(raw_descriptor_uid) {
            let mut desc = DescriptorDoc::new(&run_uid, &raw.name);
            desc.configuration = raw.configuration.clone();
            for (field, value) in &data {
                let mut key = raw
                    .data_keys
                    .get(field)
                    .cloned()
                    .unwrap_or_else(|| DataKey::for_value(field, value));
                // Averaging turns integers into numbers
                key.dtype = value.dtype();
                desc.data_keys.insert(field.clone(), key);
            }
            debug!(stream = %desc.name, uid = %desc.uid, "derived descriptor created");

            self.derived.insert(
                raw_descriptor_uid.to_string(),
                DerivedStream {
                    descriptor_uid: desc.uid.clone(),
                    name: desc.name.clone(),
                    seq_num: 0,
                },
            );
            self.emit(|cb| cb.descriptor(&desc))?;
        }

        let stream = self
            .derived
            .get_mut(raw_descriptor_uid)
            .ok_or_else(|| PlanError::UnknownDescriptor(raw_descriptor_uid.to_string()))?;
        stream.seq_num += 1;

        let mut event = EventDoc::new(&run_uid, &stream.descriptor_uid, stream.seq_num);
        event.time_ns = time_ns;
        event.timestamps = data.keys().map(|k| (k.clone(), time_ns)).collect();
        event.data = data;

        self.emit(|cb| cb.event(&event))?;
        Ok(event)
    }

    /// Close the derived run and clear per-run state.
    ///
    /// Does nothing if no derived run is open.
    pub fn stop(&mut self, doc: &StopDoc) -> PlanResult<()> {
        let Some(run_uid) = self.run_uid.take() else {
            return Ok(());
        };

        let mut stop = StopDoc::success(&run_uid);
        stop.exit_status = doc.exit_status.clone();
        stop.reason = doc.reason.clone();
        for stream in self.derived.values() {
            *stop.num_events.entry(stream.name.clone()).or_insert(0) += stream.seq_num;
        }

        self.raw_descriptors.clear();
        self.derived.clear();
        info!(derived = %run_uid, events = stop.total_events(), "derived run stopped");
        self.emit(|cb| cb.stop(&stop))
    }

    fn emit<F>(&mut self, mut f: F) -> PlanResult<()>
    where
        F: FnMut(&mut Box<dyn DocumentCallback + Send>) -> PlanResult<()>,
    {
        for subscriber in self.subscribers.iter_mut() {
            f(subscriber)?;
        }
        Ok(())
    }
}
