//! Frontend (VM service) protocol vocabulary.
//!
//! Every "kind" string that crosses the wire is a closed enum here. Parsing an unknown tag
//! fails with [`ServiceError::InvalidArgument`] instead of being passed through.

mod types;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub use types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PauseStart,
    PauseExit,
    PauseBreakpoint,
    PauseInterrupted,
    PauseException,
    PausePostRequest,
    Resume,
    IsolateStart,
    IsolateRunnable,
    IsolateExit,
    IsolateUpdate,
    ServiceExtensionAdded,
    Extension,
    BreakpointAdded,
    BreakpointResolved,
    BreakpointRemoved,
    Inspect,
    WriteEvent,
    #[serde(rename = "GC")]
    Gc,
    #[serde(rename = "VMUpdate")]
    VmUpdate,
}

impl EventKind {
    pub fn is_pause(self) -> bool {
        matches!(
            self,
            EventKind::PauseStart
                | EventKind::PauseExit
                | EventKind::PauseBreakpoint
                | EventKind::PauseInterrupted
                | EventKind::PauseException
                | EventKind::PausePostRequest
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceKind {
    Null,
    Bool,
    Double,
    String,
    List,
    Map,
    PlainInstance,
    Closure,
    Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Regular,
    AsyncCausal,
    AsyncSuspensionMarker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeKind {
    /// Traceable to original source.
    Dart,
    /// Runtime-only generated code.
    Native,
    Stub,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamId {
    Debug,
    Isolate,
    Extension,
    #[serde(rename = "GC")]
    Gc,
    Timeline,
    Stdout,
    Stderr,
    #[serde(rename = "VM")]
    Vm,
    Logging,
    Service,
}

impl StreamId {
    pub const ALL: [StreamId; 10] = [
        StreamId::Debug,
        StreamId::Isolate,
        StreamId::Extension,
        StreamId::Gc,
        StreamId::Timeline,
        StreamId::Stdout,
        StreamId::Stderr,
        StreamId::Vm,
        StreamId::Logging,
        StreamId::Service,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamId::Debug => "Debug",
            StreamId::Isolate => "Isolate",
            StreamId::Extension => "Extension",
            StreamId::Gc => "GC",
            StreamId::Timeline => "Timeline",
            StreamId::Stdout => "Stdout",
            StreamId::Stderr => "Stderr",
            StreamId::Vm => "VM",
            StreamId::Logging => "Logging",
            StreamId::Service => "Service",
        }
    }

    /// Streams that ever carry events over this backend.
    pub fn is_backed(self) -> bool {
        matches!(
            self,
            StreamId::Debug
                | StreamId::Isolate
                | StreamId::Extension
                | StreamId::Stdout
                | StreamId::Stderr
                | StreamId::Vm
        )
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamId {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::ALL
            .into_iter()
            .find(|stream| stream.as_str() == s)
            .ok_or_else(|| ServiceError::invalid_argument(format!("unknown stream {s:?}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOption {
    Into,
    Over,
    OverAsyncSuspension,
    Out,
    Rewind,
}

impl FromStr for StepOption {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Into" => Ok(StepOption::Into),
            "Over" => Ok(StepOption::Over),
            "OverAsyncSuspension" => Ok(StepOption::OverAsyncSuspension),
            "Out" => Ok(StepOption::Out),
            "Rewind" => Ok(StepOption::Rewind),
            other => Err(ServiceError::invalid_argument(format!(
                "unknown step option {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionPauseMode {
    #[default]
    None,
    Unhandled,
    All,
}

impl ExceptionPauseMode {
    /// `Debugger.setPauseOnExceptions` state.
    pub fn backend_state(self) -> &'static str {
        match self {
            ExceptionPauseMode::None => "none",
            ExceptionPauseMode::Unhandled => "uncaught",
            ExceptionPauseMode::All => "all",
        }
    }
}

impl FromStr for ExceptionPauseMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ExceptionPauseMode::None),
            "unhandled" => Ok(ExceptionPauseMode::Unhandled),
            "all" => Ok(ExceptionPauseMode::All),
            _ => Err(ServiceError::invalid_argument(format!(
                "unknown exception pause mode {s:?}"
            ))),
        }
    }
}
