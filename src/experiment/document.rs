//! Run documents.
//!
//! Readings travel from the plan interpreter to callbacks as four kinds of
//! document, always in this order for one run:
//!
//! ```text
//! start ─┬─ descriptor "primary" ── event, event, ...
//!        ├─ descriptor "baseline" ─ event, ...
//!        └─ stop
//! ```
//!
//! A descriptor names a stream and declares the dtype of each field; events
//! carry one bundle of values and point back at their descriptor. The stop
//! document reports how the run ended and how many events each stream saw.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::core::ParameterValue;

/// Metadata key that overrides the averaging batch size for one run.
pub const AVERAGE_KEY: &str = "average";

/// Metadata key that turns elog posting on or off for one run.
pub const POST_KEY: &str = "post";

/// Fresh random uid for a document.
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |ns| ns.max(0) as u64)
}

/// Any of the four run documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Document {
    /// Opens a run
    Start(StartDoc),
    /// Declares a stream
    Descriptor(DescriptorDoc),
    /// Carries one bundle
    Event(EventDoc),
    /// Closes a run
    Stop(StopDoc),
}

impl Document {
    fn header(&self) -> (&str, &str, u64) {
        match self {
            // A start document's own uid names the run
            Document::Start(d) => (&d.uid, &d.uid, d.time_ns),
            Document::Descriptor(d) => (&d.uid, &d.run_uid, d.time_ns),
            Document::Event(d) => (&d.uid, &d.run_uid, d.time_ns),
            Document::Stop(d) => (&d.uid, &d.run_uid, d.time_ns),
        }
    }

    /// Uid of this document.
    pub fn uid(&self) -> &str {
        self.header().0
    }

    /// Uid of the run this document belongs to.
    pub fn run_uid(&self) -> &str {
        self.header().1
    }

    /// Creation time in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.header().2
    }
}

/// Opens a run.
///
/// `metadata` carries free-form run settings; callbacks read the
/// [`AVERAGE_KEY`] and [`POST_KEY`] entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartDoc {
    /// Run uid
    pub uid: String,
    /// Kind of plan, e.g. "scan" or "optimize"
    pub plan_type: String,
    /// Name shown to operators
    pub plan_name: String,
    /// Plan arguments rendered as text
    pub plan_args: HashMap<String, String>,
    /// Run metadata
    pub metadata: HashMap<String, ParameterValue>,
    /// Fields worth plotting first
    pub hints: Vec<String>,
    /// Creation time, ns
    pub time_ns: u64,
}

impl StartDoc {
    /// New start document with a fresh run uid.
    pub fn new(plan_type: &str, plan_name: &str) -> Self {
        Self {
            uid: new_uid(),
            plan_type: plan_type.into(),
            plan_name: plan_name.into(),
            plan_args: HashMap::new(),
            metadata: HashMap::new(),
            hints: Vec::new(),
            time_ns: now_ns(),
        }
    }

    /// Record a plan argument.
    pub fn with_arg(mut self, name: &str, value: &str) -> Self {
        self.plan_args.insert(name.into(), value.into());
        self
    }

    /// Record a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<ParameterValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a plotting hint.
    pub fn with_hint(mut self, field: &str) -> Self {
        self.hints.push(field.into());
        self
    }

    /// Batch size requested through the `average` metadata key.
    ///
    /// Values below 1 are ignored.
    pub fn batch_size_override(&self) -> Option<usize> {
        self.metadata
            .get(AVERAGE_KEY)
            .and_then(ParameterValue::as_i64)
            .filter(|n| *n >= 1)
            .map(|n| n as usize)
    }

    /// Elog posting flag from the `post` metadata key.
    pub fn post_flag(&self) -> Option<bool> {
        self.metadata.get(POST_KEY).and_then(ParameterValue::as_bool)
    }
}

/// Declares one stream of a run and the fields its events carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorDoc {
    /// Descriptor uid
    pub uid: String,
    /// Owning run
    pub run_uid: String,
    /// Stream name, usually "primary"
    pub name: String,
    /// Field name to schema
    pub data_keys: HashMap<String, DataKey>,
    /// Device settings in force for this stream
    pub configuration: HashMap<String, String>,
    /// Creation time, ns
    pub time_ns: u64,
}

impl DescriptorDoc {
    /// New descriptor for `run_uid` with no fields.
    pub fn new(run_uid: &str, name: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.into(),
            name: name.into(),
            data_keys: HashMap::new(),
            configuration: HashMap::new(),
            time_ns: now_ns(),
        }
    }

    /// Declare a field.
    pub fn with_data_key(mut self, field: &str, key: DataKey) -> Self {
        self.data_keys.insert(field.into(), key);
        self
    }

    /// Record a device setting.
    pub fn with_config(mut self, setting: &str, value: &str) -> Self {
        self.configuration.insert(setting.into(), value.into());
        self
    }
}

/// Declared type of a data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// Floating point scalar
    Number,
    /// Integer scalar
    Integer,
    /// Numeric array
    Array,
    /// Text
    String,
    /// Boolean flag
    Boolean,
}

impl Dtype {
    /// Whether fields of this type take part in averaging.
    pub fn is_numeric(self) -> bool {
        matches!(self, Dtype::Number | Dtype::Integer | Dtype::Array)
    }

    /// Lowercase name as it appears in descriptors.
    pub fn as_str(self) -> &'static str {
        match self {
            Dtype::Number => "number",
            Dtype::Integer => "integer",
            Dtype::Array => "array",
            Dtype::String => "string",
            Dtype::Boolean => "boolean",
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Value type
    pub dtype: Dtype,
    /// Array dimensions; empty for scalars
    pub shape: Vec<i32>,
    /// Device or signal the value comes from
    pub source: String,
    /// Engineering units, may be empty
    pub units: String,
}

impl DataKey {
    /// Key of any dtype with no units.
    pub fn new(dtype: Dtype, source: &str) -> Self {
        Self {
            dtype,
            shape: Vec::new(),
            source: source.into(),
            units: String::new(),
        }
    }

    /// Numeric scalar in `units`.
    pub fn scalar(source: &str, units: &str) -> Self {
        Self {
            units: units.into(),
            ..Self::new(Dtype::Number, source)
        }
    }

    /// Numeric array of `shape`.
    pub fn array(source: &str, shape: Vec<i32>) -> Self {
        Self {
            shape,
            ..Self::new(Dtype::Array, source)
        }
    }

    /// Key describing `value`, as used for derived streams.
    pub fn for_value(source: &str, value: &DataValue) -> Self {
        match value {
            DataValue::Array(items) => Self::array(source, vec![items.len() as i32]),
            other => Self::new(other.dtype(), source),
        }
    }
}

/// One reading inside an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Integer scalar
    Integer(i64),
    /// Floating point scalar
    Number(f64),
    /// Numeric array
    Array(Vec<f64>),
    /// Boolean flag
    Bool(bool),
    /// Text
    Text(String),
}

impl DataValue {
    /// Numeric scalar view.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            DataValue::Number(v) => Some(v),
            DataValue::Integer(v) => Some(v as f64),
            _ => None,
        }
    }

    /// Array view.
    pub fn as_array(&self) -> Option<&[f64]> {
        if let DataValue::Array(items) = self {
            Some(items)
        } else {
            None
        }
    }

    /// Type a descriptor would declare for this value.
    pub fn dtype(&self) -> Dtype {
        match self {
            DataValue::Integer(_) => Dtype::Integer,
            DataValue::Number(_) => Dtype::Number,
            DataValue::Array(_) => Dtype::Array,
            DataValue::Bool(_) => Dtype::Boolean,
            DataValue::Text(_) => Dtype::String,
        }
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        DataValue::Number(value)
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        DataValue::Integer(value)
    }
}

impl From<Vec<f64>> for DataValue {
    fn from(value: Vec<f64>) -> Self {
        DataValue::Array(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        DataValue::Bool(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        DataValue::Text(value.to_owned())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        DataValue::Text(value)
    }
}

/// One bundle of readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    /// Event uid
    pub uid: String,
    /// Owning run
    pub run_uid: String,
    /// Descriptor declaring the fields
    pub descriptor_uid: String,
    /// 1-based position within the descriptor's stream
    pub seq_num: u32,
    /// Event time, ns
    pub time_ns: u64,
    /// Field values
    pub data: HashMap<String, DataValue>,
    /// Acquisition time of each field, ns
    pub timestamps: HashMap<String, u64>,
}

impl EventDoc {
    /// Empty event under `descriptor_uid`.
    pub fn new(run_uid: &str, descriptor_uid: &str, seq_num: u32) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.into(),
            descriptor_uid: descriptor_uid.into(),
            seq_num,
            time_ns: now_ns(),
            data: HashMap::new(),
            timestamps: HashMap::new(),
        }
    }

    /// Add one reading, timestamped now.
    pub fn with_datum(mut self, field: &str, value: impl Into<DataValue>) -> Self {
        self.timestamps.insert(field.into(), now_ns());
        self.data.insert(field.into(), value.into());
        self
    }
}

/// Closes a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopDoc {
    /// Stop uid
    pub uid: String,
    /// Run being closed
    pub run_uid: String,
    /// "success", "abort" or "fail"
    pub exit_status: String,
    /// Why the run did not succeed; empty on success
    pub reason: String,
    /// Creation time, ns
    pub time_ns: u64,
    /// Events emitted per stream name
    pub num_events: HashMap<String, u32>,
}

impl StopDoc {
    fn closing(run_uid: &str, exit_status: &str, reason: &str) -> Self {
        Self {
            uid: new_uid(),
            run_uid: run_uid.into(),
            exit_status: exit_status.into(),
            reason: reason.into(),
            time_ns: now_ns(),
            num_events: HashMap::new(),
        }
    }

    /// Run completed normally.
    pub fn success(run_uid: &str) -> Self {
        Self::closing(run_uid, "success", "")
    }

    /// Run aborted by the user or a plan error.
    pub fn abort(run_uid: &str, reason: &str) -> Self {
        Self::closing(run_uid, "abort", reason)
    }

    /// Run failed.
    pub fn fail(run_uid: &str, reason: &str) -> Self {
        Self::closing(run_uid, "fail", reason)
    }

    /// Record an event count for a stream.
    pub fn with_count(mut self, stream: &str, count: u32) -> Self {
        self.num_events.insert(stream.into(), count);
        self
    }

    /// Total events across streams.
    pub fn total_events(&self) -> u32 {
        self.num_events.values().sum()
    }
}
