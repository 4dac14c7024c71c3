//! Timestamp event builder.
//!
//! Combines values arriving independently from several producers into
//! bundles. *Timed* fields must all arrive at one timestamp bin before a
//! bundle is built. *Slow* fields keep their latest value, which is copied into
//! every bundle until it is replaced.
//!
//! # Example
//!
//! ```
//! use daq_plans::streams::EventRouter;
//!
//! let (router, mut rx) = EventRouter::channel(["ipm", "wave"], ["temp"]);
//! router.save_value("temp", 295.0.into(), 0.5);
//! router.save_value("ipm", 1.0.into(), 1.0);
//! router.save_value("wave", 2.0.into(), 1.0);
//!
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.data.len(), 3);
//! ```

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::EventBuilderConfig;
use crate::experiment::DataValue;

/// One assembled bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltEvent {
    /// Field values, slow and timed
    pub data: HashMap<String, DataValue>,
    /// Source timestamp of every field, in seconds
    pub timestamps: HashMap<String, f64>,
    /// Time of the bin this bundle was built for, in seconds
    pub time: f64,
}

/// Receiver of built events.
///
/// Called with the router lock held; a sink must not call back into the
/// router that feeds it.
pub trait EventSink: Send + Sync {
    /// Handle one built event.
    fn emit(&self, event: BuiltEvent);
}

impl<F> EventSink for F
where
    F: Fn(BuiltEvent) + Send + Sync,
{
    fn emit(&self, event: BuiltEvent) {
        self(event)
    }
}

impl EventSink for mpsc::UnboundedSender<BuiltEvent> {
    fn emit(&self, event: BuiltEvent) {
        if self.send(event).is_err() {
            trace!("built event dropped, receiver closed");
        }
    }
}

/// Maps timestamps to bin keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampBinning {
    /// Bins per second
    pub rate_hz: f64,
}

impl Default for TimestampBinning {
    /// Nanosecond bins.
    fn default() -> Self {
        Self { rate_hz: 1e9 }
    }
}

impl TimestampBinning {
    /// Bins at `rate_hz`, e.g. the beam rate.
    pub fn new(rate_hz: f64) -> Self {
        Self { rate_hz }
    }

    /// Index of the nearest bin.
    ///
    /// `None` when the timestamp is not finite or its bin index does not fit
    /// in an `i64`.
    pub fn key(&self, timestamp: f64) -> Option<i64> {
        let scaled = (timestamp * self.rate_hz).round();
        // i64::MAX as f64 rounds up to 2^63, which is itself out of range
        if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled < i64::MAX as f64 {
            Some(scaled as i64)
        } else {
            None
        }
    }

    /// Time at the centre of bin `key`.
    pub fn bin_time(&self, key: i64) -> f64 {
        key as f64 / self.rate_hz
    }
}

type Bucket = HashMap<String, (DataValue, f64)>;

#[derive(Debug, Default)]
struct RouterState {
    buckets: BTreeMap<i64, Bucket>,
    slow_values: HashMap<String, (DataValue, f64)>,
}

/// Builds bundles from values saved by concurrent producers.
///
/// Share it between producer threads with `Arc`.
pub struct EventRouter {
    timed_names: HashSet<String>,
    slow_names: HashSet<String>,
    auto_clear: bool,
    binning: TimestampBinning,
    sink: Box<dyn EventSink>,
    state: Mutex<RouterState>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("timed_names", &self.timed_names)
            .field("slow_names", &self.slow_names)
            .field("auto_clear", &self.auto_clear)
            .field("binning", &self.binning)
            .finish()
    }
}

impl EventRouter {
    /// Router emitting into `sink`, clearing automatically at nanosecond binning.
    pub fn new<T, S>(timed_names: T, slow_names: S, sink: impl EventSink + 'static) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            timed_names: timed_names.into_iter().map(Into::into).collect(),
            slow_names: slow_names.into_iter().map(Into::into).collect(),
            auto_clear: true,
            binning: TimestampBinning::default(),
            sink: Box::new(sink),
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Router paired with a channel receiving every built event.
    pub fn channel<T, S>(
        timed_names: T,
        slow_names: S,
    ) -> (Self, mpsc::UnboundedReceiver<BuiltEvent>)
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(timed_names, slow_names, tx), rx)
    }

    /// Keep or discard buckets after emission.
    pub fn with_auto_clear(mut self, auto_clear: bool) -> Self {
        self.auto_clear = auto_clear;
        self
    }

    /// Use a different bin width.
    pub fn with_binning(mut self, binning: TimestampBinning) -> Self {
        self.binning = binning;
        self
    }

    /// Apply the configured binning and clearing policy.
    pub fn with_config(self, config: &EventBuilderConfig) -> Self {
        let binning = config
            .bin_rate_hz
            .map(TimestampBinning::new)
            .unwrap_or_default();
        self.with_auto_clear(config.auto_clear).with_binning(binning)
    }

    /// Submit a value; emits a bundle if this completes one.
    ///
    /// Names that are neither timed nor slow are ignored, as are values whose
    /// timestamp has no bin.
    pub fn save_value(&self, name: &str, value: DataValue, timestamp: f64) {
        let Some(key) = self.binning.key(timestamp) else {
            warn!(
                name,
                timestamp,
                rate_hz = self.binning.rate_hz,
                "timestamp out of range for binning, value dropped"
            );
            return;
        };
        let mut state = self.state.lock();

        if self.slow_names.contains(name) {
            state.slow_values.insert(name.to_string(), (value, timestamp));
        } else if self.timed_names.contains(name) {
            state
                .buckets
                .entry(key)
                .or_default()
                .insert(name.to_string(), (value, timestamp));
        } else {
            trace!(name, "value for unrouted field ignored");
            return;
        }

        if !self.is_ready(&state, key) {
            return;
        }

        let event = self.build(&state, key);
        debug!(key, fields = event.data.len(), "event built");
        self.sink.emit(event);

        if self.auto_clear {
            Self::clear_locked(&mut state, key, true);
        }
    }

    /// Whether the bundle for `timestamp` is complete.
    pub fn event_ready(&self, timestamp: f64) -> bool {
        let Some(key) = self.binning.key(timestamp) else {
            return false;
        };
        self.is_ready(&self.state.lock(), key)
    }

    /// Remove the bucket for `timestamp`; with `prev`, also every older one.
    pub fn clear(&self, timestamp: f64, prev: bool) {
        if let Some(key) = self.binning.key(timestamp) {
            Self::clear_locked(&mut self.state.lock(), key, prev);
        }
    }

    /// Number of buckets still waiting for fields.
    pub fn pending_buckets(&self) -> usize {
        self.state.lock().buckets.len()
    }

    fn is_ready(&self, state: &RouterState, key: i64) -> bool {
        if state.slow_values.len() < self.slow_names.len() {
            return false;
        }
        match state.buckets.get(&key) {
            Some(bucket) => self.timed_names.iter().all(|name| bucket.contains_key(name)),
            None => false,
        }
    }

    fn build(&self, state: &RouterState, key: i64) -> BuiltEvent {
        let mut data = HashMap::new();
        let mut timestamps = HashMap::new();
        let timed = state.buckets.get(&key).into_iter().flatten();
        for (name, (value, ts)) in state.slow_values.iter().chain(timed) {
            data.insert(name.clone(), value.clone());
            timestamps.insert(name.clone(), *ts);
        }
        BuiltEvent {
            data,
            timestamps,
            time: self.binning.bin_time(key),
        }
    }

    fn clear_locked(state: &mut RouterState, key: i64, prev: bool) {
        if prev {
            // Older buckets can no longer complete once a newer one has
            state.buckets = match key.checked_add(1) {
                Some(next) => state.buckets.split_off(&next),
                None => BTreeMap::new(),
            };
        } else {
            state.buckets.remove(&key);
        }
    }
}
