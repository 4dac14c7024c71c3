//! Plan instructions.
//!
//! A plan is an ordered sequence of [`Msg`] values. Each message names one
//! atomic operation for the interpreter to carry out on a device. Messages are
//! plain data; building a plan never touches hardware.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use crate::core::ParameterValue;

/// Operation requested by a [`Msg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Begin a run
    OpenRun,
    /// End a run
    CloseRun,
    /// Begin a bundle
    Create,
    /// Emit the bundle as an event
    Save,
    /// Discard the bundle
    Drop,
    /// Move a device
    Set,
    /// Start an acquisition
    Trigger,
    /// Add a device's reading to the bundle
    Read,
    /// Prepare a device for the plan
    Stage,
    /// Release a staged device
    Unstage,
    /// Change device configuration
    Configure,
    /// Block until a group completes
    Wait,
    /// Safe point to pause or resume
    Checkpoint,
    /// Start a flyer
    Kickoff,
    /// Ask a flyer to finish
    Complete,
    /// Gather a flyer's data
    Collect,
    /// No operation
    Null,
}

impl Command {
    /// Lowercase name, as the interpreter spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            Command::OpenRun => "open_run",
            Command::CloseRun => "close_run",
            Command::Create => "create",
            Command::Save => "save",
            Command::Drop => "drop",
            Command::Set => "set",
            Command::Trigger => "trigger",
            Command::Read => "read",
            Command::Stage => "stage",
            Command::Unstage => "unstage",
            Command::Configure => "configure",
            Command::Wait => "wait",
            Command::Checkpoint => "checkpoint",
            Command::Kickoff => "kickoff",
            Command::Complete => "complete",
            Command::Collect => "collect",
            Command::Null => "null",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named handle to a device the interpreter knows about.
///
/// Two handles are the same device when their names match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRef(Arc<str>);

impl DeviceRef {
    /// Name of the no-op device substituted for dropped stage/unstage targets.
    pub const PLACEHOLDER: &'static str = "noop_placeholder";

    /// Handle for the device called `name`.
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The neutral device that stages and unstages without effect.
    pub fn placeholder() -> Self {
        Self::new(Self::PLACEHOLDER)
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether this is the neutral placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.name() == Self::PLACEHOLDER
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<&DeviceRef> for ParameterValue {
    fn from(device: &DeviceRef) -> Self {
        ParameterValue::String(device.name().to_string())
    }
}

/// One plan instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    /// Operation
    pub command: Command,
    /// Device the operation applies to
    pub target: Option<DeviceRef>,
    /// Positional arguments
    pub args: Vec<ParameterValue>,
    /// Keyword arguments
    pub kwargs: BTreeMap<String, ParameterValue>,
    /// Completion group for `wait`
    pub group: Option<String>,
    /// Run key, for plans with several runs
    pub run: Option<String>,
}

impl Msg {
    /// Message with no target or arguments.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            target: None,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            group: None,
            run: None,
        }
    }

    /// Apply to `device`.
    pub fn on(mut self, device: &DeviceRef) -> Self {
        self.target = Some(device.clone());
        self
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<ParameterValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, key: &str, value: impl Into<ParameterValue>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    /// Put in a completion group.
    pub fn in_group(mut self, group: Option<&str>) -> Self {
        self.group = group.map(str::to_string);
        self
    }

    /// Tag with a run key.
    pub fn for_run(mut self, run: &str) -> Self {
        self.run = Some(run.to_string());
        self
    }

    /// Whether this message targets `device`.
    pub fn is_on(&self, device: &DeviceRef) -> bool {
        self.target.as_ref() == Some(device)
    }

    /// Name of the target device, if any.
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().map(DeviceRef::name)
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Msg({}", self.command)?;
        if let Some(target) = &self.target {
            write!(f, ", {}", target)?;
        }
        for arg in &self.args {
            write!(f, ", {}", arg)?;
        }
        for (key, value) in &self.kwargs {
            write!(f, ", {}={}", key, value)?;
        }
        if let Some(group) = &self.group {
            write!(f, ", group={}", group)?;
        }
        if let Some(run) = &self.run {
            write!(f, ", run={}", run)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_equality_by_name() {
        let a = DeviceRef::new("daq");
        let b = DeviceRef::from("daq");
        assert_eq!(a, b);
        assert!(DeviceRef::placeholder().is_placeholder());
        assert!(!a.is_placeholder());
    }

    #[test]
    fn test_msg_builder_and_display() {
        let motor = DeviceRef::new("stage_x");
        let msg = Msg::new(Command::Set)
            .on(&motor)
            .with_arg(1.5)
            .in_group(Some("g1"));

        assert!(msg.is_on(&motor));
        assert_eq!(msg.target_name(), Some("stage_x"));
        assert_eq!(msg.to_string(), "Msg(set, stage_x, 1.5, group=g1)");
    }

    #[test]
    fn test_command_serializes_snake_case() {
        let json = serde_json::to_string(&Command::OpenRun).unwrap();
        assert_eq!(json, "\"open_run\"");
        assert_eq!(Command::CloseRun.as_str(), "close_run");
    }
}
