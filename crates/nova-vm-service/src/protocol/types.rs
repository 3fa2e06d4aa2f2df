use std::time::{SystemTime, UNIX_EPOCH};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::{CodeKind, EventKind, ExceptionPauseMode, FrameKind, InstanceKind};

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Success;

impl Serialize for Success {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("type", "Success")?;
        map.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "Version")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@VM")]
pub struct VmRef {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "VM", rename_all = "camelCase")]
pub struct Vm {
    pub name: String,
    pub architecture_bits: i64,
    pub host_cpu: String,
    pub operating_system: String,
    pub target_cpu: String,
    pub version: String,
    pub pid: i64,
    pub start_time: i64,
    pub isolates: Vec<IsolateRef>,
    pub isolate_groups: Vec<Value>,
    pub system_isolates: Vec<IsolateRef>,
    pub system_isolate_groups: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@Isolate", rename_all = "camelCase")]
pub struct IsolateRef {
    pub id: String,
    pub name: String,
    pub number: String,
    pub is_system_isolate: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Isolate", rename_all = "camelCase")]
pub struct Isolate {
    pub id: String,
    pub name: String,
    pub number: String,
    pub is_system_isolate: bool,
    pub start_time: i64,
    pub runnable: bool,
    pub live_ports: i64,
    pub pause_on_exit: bool,
    pub pause_event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_lib: Option<LibraryRef>,
    pub libraries: Vec<LibraryRef>,
    pub breakpoints: Vec<Breakpoint>,
    pub exception_pause_mode: ExceptionPauseMode,
    #[serde(rename = "extensionRPCs")]
    pub extension_rpcs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@Library")]
pub struct LibraryRef {
    pub id: String,
    pub name: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Library")]
pub struct Library {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub debuggable: bool,
    pub dependencies: Vec<Value>,
    pub scripts: Vec<ScriptRef>,
    pub variables: Vec<Value>,
    pub functions: Vec<Value>,
    pub classes: Vec<ClassRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "@Script")]
pub struct ScriptRef {
    pub id: String,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "ScriptList")]
pub struct ScriptList {
    pub scripts: Vec<ScriptRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Script", rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub uri: String,
    pub library: LibraryRef,
    pub line_offset: i64,
    pub column_offset: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Rows of `[line, tokenPos, column, tokenPos, column, ...]`.
    pub token_pos_table: Vec<Vec<i64>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@Class")]
pub struct ClassRef {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Class", rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<LibraryRef>,
    pub is_abstract: bool,
    pub is_const: bool,
    pub fields: Vec<Value>,
    pub functions: Vec<Value>,
    pub subclasses: Vec<ClassRef>,
    pub interfaces: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "SourceLocation", rename_all = "camelCase")]
pub struct SourceLocation {
    pub script: ScriptRef,
    pub token_pos: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "Breakpoint", rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: String,
    pub breakpoint_number: u32,
    pub enabled: bool,
    pub resolved: bool,
    pub location: SourceLocation,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "@Instance", rename_all = "camelCase")]
pub struct InstanceRef {
    pub id: String,
    pub kind: InstanceKind,
    #[serde(rename = "class")]
    pub class_ref: ClassRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_as_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_as_string_is_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapAssociation {
    pub key: InstanceRef,
    pub value: InstanceRef,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundField {
    pub name: String,
    pub value: InstanceRef,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Instance", rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub kind: InstanceKind,
    #[serde(rename = "class")]
    pub class_ref: ClassRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_as_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_as_string_is_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elements: Option<Vec<InstanceRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub associations: Option<Vec<MapAssociation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<BoundField>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    UnhandledException,
}

/// A value thrown while evaluating an expression. Returned as data, not as a failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@Error")]
pub struct ErrorRef {
    pub id: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvalResult {
    Instance(InstanceRef),
    Error(ErrorRef),
}

impl EvalResult {
    pub fn instance(&self) -> Option<&InstanceRef> {
        match self {
            EvalResult::Instance(instance) => Some(instance),
            EvalResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorRef> {
        match self {
            EvalResult::Error(error) => Some(error),
            EvalResult::Instance(_) => None,
        }
    }
}

/// Result of `getObject`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Obj {
    Library(Library),
    Class(Class),
    Script(Script),
    Breakpoint(Breakpoint),
    Instance(Instance),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "@Code")]
pub struct CodeRef {
    pub id: String,
    pub name: String,
    pub kind: CodeKind,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "BoundVariable", rename_all = "camelCase")]
pub struct BoundVariable {
    pub name: String,
    pub value: InstanceRef,
    pub declaration_token_pos: i64,
    pub scope_start_token_pos: i64,
    pub scope_end_token_pos: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Frame")]
pub struct Frame {
    pub index: usize,
    pub kind: FrameKind,
    pub code: CodeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    pub vars: Vec<BoundVariable>,
}

impl Frame {
    pub fn is_source_visible(&self) -> bool {
        self.code.kind == CodeKind::Dart
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Stack")]
pub struct Stack {
    pub frames: Vec<Frame>,
    pub messages: Vec<Value>,
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Event", rename_all = "camelCase")]
pub struct Event {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolate: Option<IsolateRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmRef>,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<Breakpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_breakpoints: Option<Vec<Breakpoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_frame: Option<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<InstanceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspectee: Option<InstanceRef>,
    #[serde(rename = "extensionRPC", skip_serializing_if = "Option::is_none")]
    pub extension_rpc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_data: Option<Value>,
    /// Base64 encoded output for `WriteEvent`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at_async_suspension: Option<bool>,
}

impl Event {
    pub fn new(kind: EventKind, isolate: Option<IsolateRef>) -> Self {
        Self {
            kind,
            isolate,
            vm: None,
            timestamp: now_millis(),
            breakpoint: None,
            pause_breakpoints: None,
            top_frame: None,
            exception: None,
            inspectee: None,
            extension_rpc: None,
            extension_kind: None,
            extension_data: None,
            bytes: None,
            at_async_suspension: None,
        }
    }

    pub fn isolate_id(&self) -> Option<&str> {
        self.isolate.as_ref().map(|isolate| isolate.id.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReportRange {
    pub script_index: usize,
    pub start_pos: i64,
    pub end_pos: i64,
    pub compiled: bool,
    pub possible_breakpoints: Vec<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "SourceReport")]
pub struct SourceReport {
    pub ranges: Vec<SourceReportRange>,
    pub scripts: Vec<ScriptRef>,
}
