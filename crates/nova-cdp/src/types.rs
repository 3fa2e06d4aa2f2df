use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CdpError>;

/// Error code Chrome uses for generic command failures (`Runtime.getProperties` on a
/// released object, duplicate breakpoints, ...).
pub const ERROR_SERVER: i64 = -32000;
/// Error code for commands the target does not implement.
pub const ERROR_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("CDP protocol error: {0}")]
    Protocol(String),
    #[error("CDP command {method} failed with error code {code}: {message}")]
    CommandFailed {
        method: String,
        code: i64,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("CDP message was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CDP request timed out")]
    Timeout,
    #[error("CDP request cancelled")]
    Cancelled,
    #[error("CDP connection closed")]
    ConnectionClosed,
}

impl CdpError {
    /// Numeric code reported by the target, if the command reached it.
    pub fn command_code(&self) -> Option<i64> {
        match self {
            CdpError::CommandFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteObjectType {
    Object,
    Function,
    Undefined,
    String,
    Number,
    Boolean,
    Symbol,
    Bigint,
}

/// Mirror object referencing an original JavaScript object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub type_: RemoteObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unserializable_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl RemoteObject {
    pub fn undefined() -> Self {
        Self {
            type_: RemoteObjectType::Undefined,
            subtype: None,
            class_name: None,
            value: None,
            unserializable_value: None,
            description: None,
            object_id: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.type_ == RemoteObjectType::Undefined
            || (self.type_ == RemoteObjectType::Object && self.subtype.as_deref() == Some("null"))
    }

    pub fn subtype_is(&self, subtype: &str) -> bool {
        self.subtype.as_deref() == Some(subtype)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeType {
    Global,
    Local,
    With,
    Closure,
    Catch,
    Block,
    Script,
    Eval,
    Module,
    WasmExpressionStack,
}

impl ScopeType {
    /// Scopes whose bindings are shown as frame variables. Global/script/module scopes hold
    /// the whole program and are never expanded eagerly.
    pub fn holds_frame_variables(self) -> bool {
        matches!(
            self,
            ScopeType::Local | ScopeType::Closure | ScopeType::Catch | ScopeType::Block
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(rename = "type")]
    pub type_: ScopeType,
    pub object: RemoteObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub this: Option<RemoteObject>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub enumerable: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalPropertyDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<RemoteObject>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesResult {
    #[serde(default)]
    pub result: Vec<PropertyDescriptor>,
    #[serde(default)]
    pub internal_properties: Vec<InternalPropertyDescriptor>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub exception_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: u32,
    #[serde(default)]
    pub column_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Human readable message: the thrown value's description when present
    /// (e.g. `ReferenceError: foo is not defined`), the summary text otherwise.
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

/// Result of `Runtime.evaluate`, `Runtime.callFunctionOn` and
/// `Debugger.evaluateOnCallFrame`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_details: Option<ExceptionDetails>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl CallArgument {
    pub fn object(object_id: impl Into<String>) -> Self {
        Self {
            value: None,
            object_id: Some(object_id.into()),
        }
    }

    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            object_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointResult {
    pub breakpoint_id: String,
    #[serde(default)]
    pub locations: Vec<Location>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

impl PausedEvent {
    pub fn is_exception(&self) -> bool {
        matches!(self.reason.as_str(), "exception" | "promiseRejection")
    }

    /// The thrown value for exception pauses. Chrome reports it as the event `data`.
    pub fn exception(&self) -> Option<RemoteObject> {
        if !self.is_exception() {
            return None;
        }
        self.data
            .clone()
            .and_then(|data| serde_json::from_value(data).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedEvent {
    pub script_id: String,
    pub url: String,
    #[serde(default)]
    pub start_line: u32,
    #[serde(default)]
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalledEvent {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    #[serde(default)]
    pub execution_context_id: i64,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrownEvent {
    #[serde(default)]
    pub timestamp: f64,
    pub exception_details: ExceptionDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectRequestedEvent {
    pub object: RemoteObject,
    #[serde(default)]
    pub hints: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: i64,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub name: String,
}

/// Backend notifications the bridge understands.
#[derive(Clone, Debug, PartialEq)]
pub enum CdpEvent {
    Paused(PausedEvent),
    Resumed,
    ScriptParsed(ScriptParsedEvent),
    ConsoleApiCalled(ConsoleApiCalledEvent),
    ExceptionThrown(ExceptionThrownEvent),
    InspectRequested(InspectRequestedEvent),
    ExecutionContextCreated(ExecutionContextDescription),
    ExecutionContextDestroyed { execution_context_id: i64 },
    ExecutionContextsCleared,
}

impl CdpEvent {
    /// Decode a notification. Methods outside the vocabulary above yield `Ok(None)`.
    pub fn from_notification(method: &str, params: Value) -> Result<Option<Self>> {
        let event = match method {
            "Debugger.paused" => CdpEvent::Paused(serde_json::from_value(params)?),
            "Debugger.resumed" => CdpEvent::Resumed,
            "Debugger.scriptParsed" => CdpEvent::ScriptParsed(serde_json::from_value(params)?),
            "Runtime.consoleAPICalled" => {
                CdpEvent::ConsoleApiCalled(serde_json::from_value(params)?)
            }
            "Runtime.exceptionThrown" => {
                CdpEvent::ExceptionThrown(serde_json::from_value(params)?)
            }
            "Runtime.inspectRequested" => {
                CdpEvent::InspectRequested(serde_json::from_value(params)?)
            }
            "Runtime.executionContextCreated" => {
                let context = params
                    .get("context")
                    .cloned()
                    .ok_or_else(|| CdpError::Protocol("executionContextCreated without context".into()))?;
                CdpEvent::ExecutionContextCreated(serde_json::from_value(context)?)
            }
            "Runtime.executionContextDestroyed" => CdpEvent::ExecutionContextDestroyed {
                execution_context_id: params
                    .get("executionContextId")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| {
                        CdpError::Protocol("executionContextDestroyed without id".into())
                    })?,
            },
            "Runtime.executionContextsCleared" => CdpEvent::ExecutionContextsCleared,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
