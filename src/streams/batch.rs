//! Collect-N-then-reduce document streams.
//!
//! A [`BatchStream`] caches raw events until its batch size is reached, checks
//! that the whole window came from one descriptor, reduces each field with a
//! [`BatchReducer`] and re-emits one derived event through a
//! [`LiveDispatcher`].

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::experiment::{
    DataKey, DataValue, DescriptorDoc, DocumentCallback, Dtype, EventDoc, LiveDispatcher, StartDoc,
    StopDoc,
};
use crate::error::{PlanError, PlanResult};

/// Reduces one field across a batch of events.
pub trait BatchReducer {
    /// Combine `values` of `field` (declared as `dtype`) into one value.
    ///
    /// `Ok(None)` drops the field from the derived event.
    fn reduce(&self, field: &str, dtype: Dtype, values: &[&DataValue])
        -> PlanResult<Option<DataValue>>;
}

/// Document stream that reduces every `cache_size` events into one.
#[derive(Debug)]
pub struct BatchStream<R> {
    reducer: R,
    cache_size: usize,
    default_cache_size: usize,
    raw_cache: Vec<EventDoc>,
    last_event: Option<HashMap<String, DataValue>>,
    dispatcher: LiveDispatcher,
}

impl<R: BatchReducer> BatchStream<R> {
    /// Stream reducing batches of `cache_size` events (at least 1).
    pub fn with_reducer(reducer: R, cache_size: usize) -> Self {
        let cache_size = cache_size.max(1);
        Self {
            reducer,
            cache_size,
            default_cache_size: cache_size,
            raw_cache: Vec::new(),
            last_event: None,
            dispatcher: LiveDispatcher::new(),
        }
    }

    /// Register a consumer of the derived stream.
    pub fn subscribe(&mut self, callback: Box<dyn DocumentCallback + Send>) {
        self.dispatcher.subscribe(callback);
    }

    /// Data of the most recently emitted derived event.
    pub fn last_event(&self) -> Option<&HashMap<String, DataValue>> {
        self.last_event.as_ref()
    }

    /// Number of events waiting for the next flush.
    pub fn raw_cache_len(&self) -> usize {
        self.raw_cache.len()
    }

    /// Current batch size.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Change the batch size for the rest of the run.
    pub fn set_cache_size(&mut self, cache_size: usize) {
        self.cache_size = cache_size.max(1);
    }

    /// Whether a run is open.
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Uid of the derived run, if open.
    pub fn run_uid(&self) -> Option<&str> {
        self.dispatcher.run_uid()
    }

    /// Open a run, honouring the `average` metadata override.
    pub fn open(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.raw_cache.clear();
        self.last_event = None;
        self.cache_size = doc.batch_size_override().unwrap_or(self.default_cache_size);
        debug!(cache_size = self.cache_size, "batch stream opened");
        self.dispatcher.start(doc)
    }

    /// Register a raw descriptor.
    pub fn declare(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.dispatcher.descriptor(doc)
    }

    /// Raw descriptor of stream `name` already declared with `data_keys` in
    /// this run.
    pub fn declared(
        &self,
        name: &str,
        data_keys: &HashMap<String, DataKey>,
    ) -> Option<&DescriptorDoc> {
        self.dispatcher.matching_descriptor(name, data_keys)
    }

    /// Drop cached events without flushing them; the run stays open.
    ///
    /// Returns how many events were dropped.
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.raw_cache.len();
        if dropped > 0 {
            debug!(discarded = dropped, "partial batch dropped");
            self.raw_cache.clear();
        }
        dropped
    }

    /// Add one event; returns the derived event when the batch flushes.
    pub fn push(&mut self, doc: &EventDoc) -> PlanResult<Option<EventDoc>> {
        if !self.dispatcher.is_running() {
            return Err(PlanError::NoRunOpen);
        }

        self.raw_cache.push(doc.clone());
        if self.raw_cache.len() < self.cache_size {
            return Ok(None);
        }

        let result = self.flush();
        self.raw_cache.clear();
        result.map(Some)
    }

    /// Close the run and drop anything still cached.
    pub fn close(&mut self, doc: &StopDoc) -> PlanResult<()> {
        if !self.raw_cache.is_empty() {
            debug!(discarded = self.raw_cache.len(), "partial batch dropped at stop");
        }
        self.raw_cache.clear();
        self.last_event = None;
        self.dispatcher.stop(doc)
    }

    fn flush(&mut self) -> PlanResult<EventDoc> {
        let desc_uid = match self.raw_cache.first() {
            Some(first) => first.descriptor_uid.clone(),
            None => return Err(PlanError::Consistency("empty batch".to_string())),
        };
        if self.raw_cache.iter().any(|e| e.descriptor_uid != desc_uid) {
            warn!(cache = self.raw_cache.len(), "batch mixes descriptors, discarding");
            return Err(PlanError::Consistency(
                "events in this bundle are from different configurations".to_string(),
            ));
        }

        let descriptor = self
            .dispatcher
            .raw_descriptor(&desc_uid)
            .ok_or_else(|| PlanError::UnknownDescriptor(desc_uid.clone()))?;

        let mut data = HashMap::new();
        for (field, key) in &descriptor.data_keys {
            let mut values = Vec::with_capacity(self.raw_cache.len());
            for event in &self.raw_cache {
                let value = event.data.get(field).ok_or_else(|| {
                    PlanError::Consistency(format!(
                        "event {} is missing field {:?}",
                        event.seq_num, field
                    ))
                })?;
                values.push(value);
            }
            if let Some(reduced) = self.reducer.reduce(field, key.dtype, &values)? {
                data.insert(field.clone(), reduced);
            }
        }

        let time_ns = self.raw_cache.iter().map(|e| e.time_ns).max().unwrap_or_default();
        let event = self.dispatcher.process_event(&desc_uid, data, time_ns)?;
        self.last_event = Some(event.data.clone());
        Ok(event)
    }
}

impl<R: BatchReducer> DocumentCallback for BatchStream<R> {
    fn start(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.open(doc)
    }

    fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.declare(doc)
    }

    fn event(&mut self, doc: &EventDoc) -> PlanResult<()> {
        self.push(doc).map(|_| ())
    }

    fn stop(&mut self, doc: &StopDoc) -> PlanResult<()> {
        self.close(doc)
    }
}
