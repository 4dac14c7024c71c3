//! Four-callback document protocol.
//!
//! Anything that consumes a run's documents implements [`DocumentCallback`].
//! Streams that re-emit derived documents are callbacks themselves, so
//! consumers can be chained arbitrarily.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::document::{DescriptorDoc, Document, EventDoc, StartDoc, StopDoc};
use crate::error::PlanResult;

/// Consumer of run documents.
///
/// Every method defaults to a no-op so implementors only override what they use.
pub trait DocumentCallback {
    /// A run started.
    fn start(&mut self, _doc: &StartDoc) -> PlanResult<()> {
        Ok(())
    }

    /// A stream schema was declared.
    fn descriptor(&mut self, _doc: &DescriptorDoc) -> PlanResult<()> {
        Ok(())
    }

    /// One bundle of readings arrived.
    fn event(&mut self, _doc: &EventDoc) -> PlanResult<()> {
        Ok(())
    }

    /// The run ended.
    fn stop(&mut self, _doc: &StopDoc) -> PlanResult<()> {
        Ok(())
    }

    /// Route a document to the matching callback.
    fn dispatch(&mut self, doc: &Document) -> PlanResult<()> {
        match doc {
            Document::Start(d) => self.start(d),
            Document::Descriptor(d) => self.descriptor(d),
            Document::Event(d) => self.event(d),
            Document::Stop(d) => self.stop(d),
        }
    }
}

/// Shared callbacks, so a caller can keep a handle to a subscriber.
impl<T: DocumentCallback + ?Sized> DocumentCallback for Arc<Mutex<T>> {
    fn start(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.lock().start(doc)
    }

    fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.lock().descriptor(doc)
    }

    fn event(&mut self, doc: &EventDoc) -> PlanResult<()> {
        self.lock().event(doc)
    }

    fn stop(&mut self, doc: &StopDoc) -> PlanResult<()> {
        self.lock().stop(doc)
    }
}

/// Records every document it receives, grouped by kind.
#[derive(Debug, Default, Clone)]
pub struct DocumentCollector {
    /// Start documents in arrival order
    pub starts: Vec<StartDoc>,
    /// Descriptor documents in arrival order
    pub descriptors: Vec<DescriptorDoc>,
    /// Event documents in arrival order
    pub events: Vec<EventDoc>,
    /// Stop documents in arrival order
    pub stops: Vec<StopDoc>,
}

impl DocumentCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// A collector behind `Arc<Mutex<_>>`, ready to subscribe.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Events belonging to the stream with this name.
    pub fn events_for(&self, stream: &str) -> Vec<&EventDoc> {
        let uids: Vec<&str> = self
            .descriptors
            .iter()
            .filter(|d| d.name == stream)
            .map(|d| d.uid.as_str())
            .collect();
        self.events
            .iter()
            .filter(|e| uids.contains(&e.descriptor_uid.as_str()))
            .collect()
    }
}

impl DocumentCallback for DocumentCollector {
    fn start(&mut self, doc: &StartDoc) -> PlanResult<()> {
        self.starts.push(doc.clone());
        Ok(())
    }

    fn descriptor(&mut self, doc: &DescriptorDoc) -> PlanResult<()> {
        self.descriptors.push(doc.clone());
        Ok(())
    }

    fn event(&mut self, doc: &EventDoc) -> PlanResult<()> {
        self.events.push(doc.clone());
        Ok(())
    }

    fn stop(&mut self, doc: &StopDoc) -> PlanResult<()> {
        self.stops.push(doc.clone());
        Ok(())
    }
}

/// Counts documents by kind.
#[derive(Debug, Default, Clone)]
pub struct CallbackCounter {
    counts: HashMap<&'static str, usize>,
}

impl CallbackCounter {
    /// Zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents of `kind` ("start", "descriptor", "event", "stop").
    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    fn bump(&mut self, kind: &'static str) -> PlanResult<()> {
        *self.counts.entry(kind).or_insert(0) += 1;
        Ok(())
    }
}

impl DocumentCallback for CallbackCounter {
    fn start(&mut self, _doc: &StartDoc) -> PlanResult<()> {
        self.bump("start")
    }

    fn descriptor(&mut self, _doc: &DescriptorDoc) -> PlanResult<()> {
        self.bump("descriptor")
    }

    fn event(&mut self, _doc: &EventDoc) -> PlanResult<()> {
        self.bump("event")
    }

    fn stop(&mut self, _doc: &StopDoc) -> PlanResult<()> {
        self.bump("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_routes_by_kind() {
        let start = StartDoc::new("count", "count");
        let desc = DescriptorDoc::new(&start.uid, "primary");
        let event = EventDoc::new(&start.uid, &desc.uid, 1);
        let stop = StopDoc::success(&start.uid);

        let mut counter = CallbackCounter::new();
        for doc in [
            Document::Start(start),
            Document::Descriptor(desc),
            Document::Event(event.clone()),
            Document::Event(event),
            Document::Stop(stop),
        ] {
            counter.dispatch(&doc).unwrap();
        }

        assert_eq!(counter.count("start"), 1);
        assert_eq!(counter.count("descriptor"), 1);
        assert_eq!(counter.count("event"), 2);
        assert_eq!(counter.count("stop"), 1);
    }

    #[test]
    fn test_collector_filters_by_stream() {
        let start = StartDoc::new("count", "count");
        let primary = DescriptorDoc::new(&start.uid, "primary");
        let baseline = DescriptorDoc::new(&start.uid, "baseline");

        let shared = DocumentCollector::shared();
        let mut handle = shared.clone();
        handle.descriptor(&primary).unwrap();
        handle.descriptor(&baseline).unwrap();
        handle.event(&EventDoc::new(&start.uid, &primary.uid, 1)).unwrap();
        handle.event(&EventDoc::new(&start.uid, &baseline.uid, 1)).unwrap();
        handle.event(&EventDoc::new(&start.uid, &primary.uid, 2)).unwrap();

        let collector = shared.lock();
        assert_eq!(collector.events_for("primary").len(), 2);
        assert_eq!(collector.events_for("baseline").len(), 1);
    }
}
