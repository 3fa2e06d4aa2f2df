use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use serde_json::{json, Value};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{MessageReader, MessageWriter},
    types::{ERROR_METHOD_NOT_FOUND, ERROR_SERVER},
};

/// A tiny scripted browser runtime used for unit/integration testing.
///
/// It supports a *small* subset of CDP sufficient to exercise nova-cdp and nova-vm-service
/// without launching a browser. Program execution is modelled as a fixed trace of stack
/// snapshots; resuming walks the trace until a stop hits a breakpoint, stepping walks it by
/// stack depth.
pub struct MockCdpServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug, Default)]
pub struct MockCdpServerConfig {
    /// Scripts announced through `Debugger.scriptParsed` once the debugger is enabled.
    pub scripts: Vec<MockScript>,
    /// Execution trace. Each entry is one statement boundary with its stack, top frame first.
    pub trace: Vec<MockStop>,
    /// Bindings visible to `Runtime.evaluate` and every frame.
    pub globals: Vec<(String, MockValue)>,
    /// Service extensions reachable through `$dartInvokeExtension`.
    pub extensions: Vec<MockExtension>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockScript {
    pub script_id: String,
    pub url: String,
    pub source: String,
}

impl MockScript {
    pub fn new(script_id: &str, url: &str, source: &str) -> Self {
        Self {
            script_id: script_id.to_string(),
            url: url.to_string(),
            source: source.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MockStop {
    pub frames: Vec<MockFrame>,
    /// Value thrown at this statement. Pauses when exception pausing is enabled.
    pub throws: Option<MockValue>,
}

impl MockStop {
    pub fn new(frames: Vec<MockFrame>) -> Self {
        Self {
            frames,
            throws: None,
        }
    }

    fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockFrame {
    pub function_name: String,
    pub script_id: String,
    /// 0-based line in the compiled script.
    pub line: u32,
    pub column: u32,
    pub locals: Vec<(String, MockValue)>,
    pub this: Option<MockValue>,
}

impl MockFrame {
    pub fn new(function_name: &str, script_id: &str, line: u32, column: u32) -> Self {
        Self {
            function_name: function_name.to_string(),
            script_id: script_id.to_string(),
            line,
            column,
            locals: Vec::new(),
            this: None,
        }
    }

    pub fn with_local(mut self, name: &str, value: MockValue) -> Self {
        self.locals.push((name.to_string(), value));
        self
    }

    pub fn with_this(mut self, value: MockValue) -> Self {
        self.this = Some(value);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<MockValue>),
    Map(Vec<(MockValue, MockValue)>),
    Object {
        class_name: String,
        fields: Vec<(String, MockValue)>,
    },
}

impl MockValue {
    pub fn str(value: &str) -> Self {
        MockValue::Str(value.to_string())
    }

    pub fn object(class_name: &str, fields: Vec<(&str, MockValue)>) -> Self {
        MockValue::Object {
            class_name: class_name.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            MockValue::Undefined => "undefined",
            MockValue::Null => "null",
            MockValue::Bool(_) => "boolean",
            MockValue::Number(_) => "number",
            MockValue::Str(_) => "string",
            MockValue::Array(_) | MockValue::Map(_) | MockValue::Object { .. } => "object",
        }
    }

    fn to_js_string(&self) -> String {
        match self {
            MockValue::Undefined => "undefined".to_string(),
            MockValue::Null => "null".to_string(),
            MockValue::Bool(b) => b.to_string(),
            MockValue::Number(n) => format_number(*n),
            MockValue::Str(s) => s.clone(),
            MockValue::Array(items) => items
                .iter()
                .map(MockValue::to_js_string)
                .collect::<Vec<_>>()
                .join(","),
            MockValue::Map(_) => "[object Map]".to_string(),
            MockValue::Object { .. } => "[object Object]".to_string(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            MockValue::Undefined | MockValue::Null => Value::Null,
            MockValue::Bool(b) => json!(b),
            MockValue::Number(n) => json!(n),
            MockValue::Str(s) => json!(s),
            MockValue::Array(items) => Value::Array(items.iter().map(MockValue::to_json).collect()),
            MockValue::Map(entries) => Value::Array(
                entries
                    .iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect(),
            ),
            MockValue::Object { fields, .. } => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockExtension {
    pub method: String,
    pub response: MockExtensionResponse,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MockExtensionResponse {
    Result(Value),
    Error {
        code: i64,
        message: String,
        details: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockBreakpoint {
    pub breakpoint_id: String,
    pub url: String,
    pub line: u32,
    pub column: Option<u32>,
}

#[derive(Clone, Debug)]
enum MockHandle {
    Value(MockValue),
    Entries(Vec<(MockValue, MockValue)>),
    Entry(MockValue, MockValue),
    Bindings(Vec<(String, MockValue)>),
}

#[derive(Debug)]
struct Runtime {
    started: bool,
    paused_at: Option<usize>,
    /// Next trace index to execute while running.
    cursor: usize,
    breakpoints: Vec<MockBreakpoint>,
    next_breakpoint: u32,
    pause_on_exceptions: String,
    objects: HashMap<String, MockHandle>,
    identities: HashMap<String, String>,
    next_object: u64,
    context_id: i64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            started: false,
            paused_at: None,
            cursor: 0,
            breakpoints: Vec::new(),
            next_breakpoint: 1,
            pause_on_exceptions: "none".to_string(),
            objects: HashMap::new(),
            identities: HashMap::new(),
            next_object: 1,
            context_id: 1,
        }
    }
}

struct State {
    config: MockCdpServerConfig,
    runtime: Mutex<Runtime>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    calls: Mutex<Vec<(String, Value)>>,
    extension_calls: Mutex<Vec<(String, Value)>>,
}

type Reply = std::result::Result<Value, (i64, String)>;

impl MockCdpServer {
    pub async fn spawn_with_config(config: MockCdpServerConfig) -> std::io::Result<Self> {
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let state = Arc::new(State {
            config,
            runtime: Mutex::new(Runtime::default()),
            outgoing: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            extension_calls: Mutex::new(Vec::new()),
        });

        tokio::spawn(accept_loop(listener, state.clone(), shutdown.clone()));

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Parameters of every received command with the given method, in arrival order.
    pub async fn calls(&self, method: &str) -> Vec<Value> {
        self.state
            .calls
            .lock()
            .await
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub async fn breakpoints(&self) -> Vec<MockBreakpoint> {
        self.state.runtime.lock().await.breakpoints.clone()
    }

    /// `(method, decoded args)` for every extension invocation.
    pub async fn extension_calls(&self) -> Vec<(String, Value)> {
        self.state.extension_calls.lock().await.clone()
    }

    /// Emit `Runtime.consoleAPICalled`.
    pub async fn emit_console(&self, kind: &str, args: Vec<MockValue>) {
        let event = {
            let mut rt = self.state.runtime.lock().await;
            let args: Vec<Value> = args.iter().map(|arg| rt.remote(arg)).collect();
            json!({
                "method": "Runtime.consoleAPICalled",
                "params": {
                    "type": kind,
                    "args": args,
                    "executionContextId": rt.context_id,
                    "timestamp": 0.0,
                }
            })
        };
        self.send(event).await;
    }

    /// Emit `Runtime.inspectRequested` (e.g. `inspect(obj)` from the page console).
    pub async fn emit_inspect(&self, value: MockValue) {
        let event = {
            let mut rt = self.state.runtime.lock().await;
            json!({
                "method": "Runtime.inspectRequested",
                "params": { "object": rt.remote(&value), "hints": {} }
            })
        };
        self.send(event).await;
    }

    pub async fn emit_exception_thrown(&self, description: &str) {
        let event = json!({
            "method": "Runtime.exceptionThrown",
            "params": {
                "timestamp": 0.0,
                "exceptionDetails": exception_details(error_object("Error", description)),
            }
        });
        self.send(event).await;
    }

    /// Simulate a page navigation: contexts are cleared, a new context is created and all
    /// scripts are parsed again. Breakpoints set by URL survive, like in Chrome.
    pub async fn navigate(&self) {
        let context_id = {
            let mut rt = self.state.runtime.lock().await;
            rt.started = false;
            rt.paused_at = None;
            rt.cursor = 0;
            rt.objects.clear();
            rt.identities.clear();
            rt.context_id += 1;
            rt.context_id
        };

        self.send(json!({ "method": "Runtime.executionContextsCleared", "params": {} }))
            .await;
        self.send(context_created_event(context_id)).await;
        for event in script_parsed_events(&self.state.config, context_id) {
            self.send(event).await;
        }
    }

    async fn send(&self, message: Value) {
        if let Some(tx) = self.state.outgoing.lock().await.as_ref() {
            let _ = tx.send(message);
        }
    }
}

impl Drop for MockCdpServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = listener.accept() => res,
        };
        let Ok((stream, _)) = accepted else {
            return;
        };
        tokio::spawn(serve_connection(stream, state.clone(), shutdown.clone()));
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    state: Arc<State>,
    shutdown: CancellationToken,
) {
    let (read, write) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    *state.outgoing.lock().await = Some(tx.clone());

    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        let mut writer = MessageWriter::new(write);
        loop {
            let message = tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            if writer.write_value(&message).await.is_err() {
                break;
            }
        }
    });

    let mut reader = MessageReader::new(read);
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = reader.read_value() => res,
        };
        let Ok(Some(message)) = message else {
            break;
        };

        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        state.calls.lock().await.push((method.clone(), params.clone()));

        let (reply, events) = handle_command(&state, &method, &params).await;
        let reply = match reply {
            Ok(result) => json!({ "id": id, "result": result }),
            Err((code, message)) => json!({ "id": id, "error": { "code": code, "message": message } }),
        };
        if tx.send(reply).is_err() {
            break;
        }
        for event in events {
            let _ = tx.send(event);
        }
    }

    state.outgoing.lock().await.take();
    drop(tx);
    let _ = writer.await;
}

fn not_paused() -> (i64, String) {
    (
        ERROR_SERVER,
        "Can only perform operation while paused.".to_string(),
    )
}

async fn handle_command(state: &State, method: &str, params: &Value) -> (Reply, Vec<Value>) {
    let config = &state.config;
    let mut rt = state.runtime.lock().await;

    match method {
        "Debugger.enable" => (
            Ok(json!({ "debuggerId": "mock-debugger" })),
            script_parsed_events(config, rt.context_id),
        ),
        "Runtime.enable" => (Ok(json!({})), vec![context_created_event(rt.context_id)]),
        "Runtime.runIfWaitingForDebugger" => {
            if rt.started {
                return (Ok(json!({})), Vec::new());
            }
            rt.started = true;
            let events = rt.run_from(config, 0);
            (Ok(json!({})), events)
        }
        "Debugger.pause" => {
            if rt.paused_at.is_some() || config.trace.is_empty() {
                return (Ok(json!({})), Vec::new());
            }
            let at = rt.cursor.min(config.trace.len() - 1);
            rt.started = true;
            let event = rt.pause_at(config, at, "other", Vec::new(), None);
            (Ok(json!({})), vec![event])
        }
        "Debugger.resume" => {
            let Some(at) = rt.paused_at.take() else {
                return (Err(not_paused()), Vec::new());
            };
            let mut events = vec![json!({ "method": "Debugger.resumed", "params": {} })];
            events.extend(rt.run_from(config, at + 1));
            (Ok(json!({})), events)
        }
        "Debugger.stepInto" | "Debugger.stepOver" | "Debugger.stepOut" => {
            let Some(at) = rt.paused_at.take() else {
                return (Err(not_paused()), Vec::new());
            };
            let mut events = vec![json!({ "method": "Debugger.resumed", "params": {} })];
            events.extend(rt.step_from(config, at, method));
            (Ok(json!({})), events)
        }
        "Debugger.setBreakpointByUrl" => {
            let url = params.get("url").and_then(Value::as_str).unwrap_or_default();
            let Some(line) = params.get("lineNumber").and_then(Value::as_u64) else {
                return (
                    Err((-32602, "lineNumber is required".to_string())),
                    Vec::new(),
                );
            };
            let line = line as u32;
            let column = params
                .get("columnNumber")
                .and_then(Value::as_u64)
                .map(|c| c as u32);
            if rt
                .breakpoints
                .iter()
                .any(|bp| bp.url == url && bp.line == line && bp.column == column)
            {
                return (
                    Err((
                        ERROR_SERVER,
                        "Breakpoint at specified location already exists.".to_string(),
                    )),
                    Vec::new(),
                );
            }

            let n = rt.next_breakpoint;
            rt.next_breakpoint += 1;
            let breakpoint_id = format!("{n}:{line}:{}:{url}", column.unwrap_or(0));
            rt.breakpoints.push(MockBreakpoint {
                breakpoint_id: breakpoint_id.clone(),
                url: url.to_string(),
                line,
                column,
            });

            let locations: Vec<Value> = config
                .scripts
                .iter()
                .filter(|s| s.url == url)
                .map(|s| {
                    json!({
                        "scriptId": s.script_id,
                        "lineNumber": line,
                        "columnNumber": column.unwrap_or(0),
                    })
                })
                .collect();
            (
                Ok(json!({ "breakpointId": breakpoint_id, "locations": locations })),
                Vec::new(),
            )
        }
        "Debugger.removeBreakpoint" => {
            let id = params
                .get("breakpointId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            rt.breakpoints.retain(|bp| bp.breakpoint_id != id);
            (Ok(json!({})), Vec::new())
        }
        "Debugger.setPauseOnExceptions" => {
            let state = params.get("state").and_then(Value::as_str).unwrap_or_default();
            if !matches!(state, "none" | "uncaught" | "all" | "caught") {
                return (
                    Err((-32602, format!("Unknown pause on exceptions mode: {state}"))),
                    Vec::new(),
                );
            }
            rt.pause_on_exceptions = state.to_string();
            (Ok(json!({})), Vec::new())
        }
        "Debugger.getScriptSource" => {
            let script_id = params.get("scriptId").and_then(Value::as_str).unwrap_or_default();
            match config.scripts.iter().find(|s| s.script_id == script_id) {
                Some(script) => (Ok(json!({ "scriptSource": script.source })), Vec::new()),
                None => (
                    Err((ERROR_SERVER, "No script for id: ".to_string() + script_id)),
                    Vec::new(),
                ),
            }
        }
        "Debugger.evaluateOnCallFrame" => {
            let call_frame_id = params
                .get("callFrameId")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let expression = params.get("expression").and_then(Value::as_str).unwrap_or_default();
            let Some(frame) = rt.frame_for_call_frame_id(config, call_frame_id) else {
                return (
                    Err((ERROR_SERVER, "Could not find call frame with given id".to_string())),
                    Vec::new(),
                );
            };
            let mut env = Env::new(config, state);
            env.bindings = frame.locals.clone();
            env.this = frame.this.clone();
            let outcome = evaluate_source(&mut env, expression).await;
            (Ok(rt.evaluate_result(outcome, false)), Vec::new())
        }
        "Runtime.evaluate" => {
            let expression = params.get("expression").and_then(Value::as_str).unwrap_or_default();
            let by_value = params
                .get("returnByValue")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let mut env = Env::new(config, state);
            let outcome = evaluate_source(&mut env, expression).await;
            (Ok(rt.evaluate_result(outcome, by_value)), Vec::new())
        }
        "Runtime.callFunctionOn" => {
            let declaration = params
                .get("functionDeclaration")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let Some((names, body)) = parse_function_declaration(declaration) else {
                return (
                    Err((ERROR_SERVER, "Given expression does not evaluate to a function".into())),
                    Vec::new(),
                );
            };

            let this = match params.get("objectId").and_then(Value::as_str) {
                Some(object_id) => match rt.objects.get(object_id) {
                    Some(MockHandle::Value(value)) => Some(value.clone()),
                    _ => {
                        return (
                            Err((ERROR_SERVER, "Could not find object with given id".into())),
                            Vec::new(),
                        )
                    }
                },
                None => None,
            };

            let mut bindings = Vec::new();
            let args = params
                .get("arguments")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for (name, arg) in names.iter().zip(args.iter()) {
                let value = if let Some(object_id) = arg.get("objectId").and_then(Value::as_str) {
                    match rt.objects.get(object_id) {
                        Some(MockHandle::Value(value)) => value.clone(),
                        _ => {
                            return (
                                Err((ERROR_SERVER, "Could not find object with given id".into())),
                                Vec::new(),
                            )
                        }
                    }
                } else {
                    json_to_mock(arg.get("value").unwrap_or(&Value::Null))
                };
                bindings.push((name.clone(), value));
            }

            let mut env = Env::new(config, state);
            env.bindings = bindings;
            env.this = this;
            let outcome = evaluate_source(&mut env, &body).await;
            (Ok(rt.evaluate_result(outcome, false)), Vec::new())
        }
        "Runtime.getProperties" => {
            let object_id = params.get("objectId").and_then(Value::as_str).unwrap_or_default();
            match rt.properties(config, object_id) {
                Some(result) => (Ok(result), Vec::new()),
                None => (
                    Err((ERROR_SERVER, "Could not find object with given id".to_string())),
                    Vec::new(),
                ),
            }
        }
        "Runtime.releaseObjectGroup" => (Ok(json!({})), Vec::new()),
        _ => (
            Err((ERROR_METHOD_NOT_FOUND, format!("'{method}' wasn't found"))),
            Vec::new(),
        ),
    }
}

fn script_parsed_events(config: &MockCdpServerConfig, context_id: i64) -> Vec<Value> {
    config
        .scripts
        .iter()
        .map(|script| {
            let end_line = script.source.lines().count() as u32;
            json!({
                "method": "Debugger.scriptParsed",
                "params": {
                    "scriptId": script.script_id,
                    "url": script.url,
                    "startLine": 0,
                    "endLine": end_line,
                    "executionContextId": context_id,
                }
            })
        })
        .collect()
}

fn context_created_event(context_id: i64) -> Value {
    json!({
        "method": "Runtime.executionContextCreated",
        "params": {
            "context": { "id": context_id, "origin": "http://localhost:8080", "name": "" }
        }
    })
}

fn error_object(class_name: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "subtype": "error",
        "className": class_name,
        "description": description,
        "objectId": format!("error:{description}"),
    })
}

fn exception_details(exception: Value) -> Value {
    json!({
        "exceptionId": 1,
        "text": "Uncaught",
        "lineNumber": 0,
        "columnNumber": 0,
        "exception": exception,
    })
}

impl Runtime {
    /// Run from `start` until a stop hits a breakpoint (or a pausing exception).
    fn run_from(&mut self, config: &MockCdpServerConfig, start: usize) -> Vec<Value> {
        for index in start..config.trace.len() {
            if let Some(event) = self.stop_event_if_any(config, index) {
                return vec![event];
            }
        }
        self.cursor = config.trace.len();
        Vec::new()
    }

    fn step_from(&mut self, config: &MockCdpServerConfig, at: usize, method: &str) -> Vec<Value> {
        let depth = config.trace[at].depth();
        let target = (at + 1..config.trace.len()).find(|&i| {
            let d = config.trace[i].depth();
            match method {
                "Debugger.stepInto" => true,
                "Debugger.stepOver" => d <= depth,
                _ => d < depth,
            }
        });

        let Some(target) = target else {
            // Stepping off the end of the program: run to completion, honouring breakpoints.
            return self.run_from(config, at + 1);
        };

        for index in at + 1..target {
            if let Some(event) = self.stop_event_if_any(config, index) {
                return vec![event];
            }
        }
        let hits = self.hit_breakpoints(config, target);
        vec![self.pause_at(config, target, "other", hits, None)]
    }

    fn stop_event_if_any(&mut self, config: &MockCdpServerConfig, index: usize) -> Option<Value> {
        let stop = &config.trace[index];
        if let Some(thrown) = &stop.throws {
            if self.pause_on_exceptions != "none" {
                let thrown = thrown.clone();
                return Some(self.pause_at(config, index, "exception", Vec::new(), Some(thrown)));
            }
        }
        let hits = self.hit_breakpoints(config, index);
        if hits.is_empty() {
            return None;
        }
        Some(self.pause_at(config, index, "other", hits, None))
    }

    fn hit_breakpoints(&self, config: &MockCdpServerConfig, index: usize) -> Vec<String> {
        let Some(top) = config.trace[index].frames.first() else {
            return Vec::new();
        };
        let Some(script) = config.scripts.iter().find(|s| s.script_id == top.script_id) else {
            return Vec::new();
        };
        self.breakpoints
            .iter()
            .filter(|bp| {
                bp.url == script.url
                    && bp.line == top.line
                    && bp.column.map_or(true, |c| c == top.column)
            })
            .map(|bp| bp.breakpoint_id.clone())
            .collect()
    }

    fn pause_at(
        &mut self,
        config: &MockCdpServerConfig,
        index: usize,
        reason: &str,
        hits: Vec<String>,
        thrown: Option<MockValue>,
    ) -> Value {
        self.paused_at = Some(index);
        self.cursor = index;

        let stop = &config.trace[index];
        let mut frames = Vec::with_capacity(stop.frames.len());
        for (k, frame) in stop.frames.iter().enumerate() {
            let url = config
                .scripts
                .iter()
                .find(|s| s.script_id == frame.script_id)
                .map(|s| s.url.clone())
                .unwrap_or_default();
            let scope_id = format!("scope:{index}:{k}");
            self.objects
                .insert(scope_id.clone(), MockHandle::Bindings(frame.locals.clone()));
            let this = match &frame.this {
                Some(value) => self.remote(value),
                None => json!({ "type": "undefined" }),
            };
            frames.push(json!({
                "callFrameId": format!("{index}:{k}"),
                "functionName": frame.function_name,
                "url": url,
                "location": {
                    "scriptId": frame.script_id,
                    "lineNumber": frame.line,
                    "columnNumber": frame.column,
                },
                "scopeChain": [
                    {
                        "type": "local",
                        "object": { "type": "object", "className": "Object", "objectId": scope_id },
                    },
                    {
                        "type": "global",
                        "object": { "type": "object", "className": "Window", "objectId": "global" },
                    },
                ],
                "this": this,
            }));
        }

        let mut params = json!({
            "callFrames": frames,
            "reason": reason,
            "hitBreakpoints": hits,
        });
        if let Some(thrown) = thrown {
            params["data"] = self.remote(&thrown);
        }
        json!({ "method": "Debugger.paused", "params": params })
    }

    fn frame_for_call_frame_id(
        &self,
        config: &MockCdpServerConfig,
        call_frame_id: &str,
    ) -> Option<MockFrame> {
        let (stop, frame) = call_frame_id.split_once(':')?;
        let stop: usize = stop.parse().ok()?;
        let frame: usize = frame.parse().ok()?;
        if self.paused_at != Some(stop) {
            return None;
        }
        config.trace.get(stop)?.frames.get(frame).cloned()
    }

    fn alloc_object(&mut self, identity: String, handle: MockHandle) -> String {
        if let Some(id) = self.identities.get(&identity) {
            return id.clone();
        }
        let id = format!("obj:{}", self.next_object);
        self.next_object += 1;
        self.identities.insert(identity, id.clone());
        self.objects.insert(id.clone(), handle);
        id
    }

    fn remote(&mut self, value: &MockValue) -> Value {
        match value {
            MockValue::Undefined => json!({ "type": "undefined" }),
            MockValue::Null => json!({ "type": "object", "subtype": "null", "value": null }),
            MockValue::Bool(b) => json!({ "type": "boolean", "value": b }),
            MockValue::Number(n) => {
                json!({ "type": "number", "value": n, "description": format_number(*n) })
            }
            MockValue::Str(s) => json!({ "type": "string", "value": s }),
            MockValue::Array(items) => {
                let id = self.alloc_object(format!("{value:?}"), MockHandle::Value(value.clone()));
                json!({
                    "type": "object",
                    "subtype": "array",
                    "className": "Array",
                    "description": format!("Array({})", items.len()),
                    "objectId": id,
                })
            }
            MockValue::Map(entries) => {
                let id = self.alloc_object(format!("{value:?}"), MockHandle::Value(value.clone()));
                json!({
                    "type": "object",
                    "subtype": "map",
                    "className": "Map",
                    "description": format!("Map({})", entries.len()),
                    "objectId": id,
                })
            }
            MockValue::Object { class_name, .. } => {
                let id = self.alloc_object(format!("{value:?}"), MockHandle::Value(value.clone()));
                json!({
                    "type": "object",
                    "className": class_name,
                    "description": class_name,
                    "objectId": id,
                })
            }
        }
    }

    fn properties(&mut self, config: &MockCdpServerConfig, object_id: &str) -> Option<Value> {
        if object_id == "global" {
            let globals = config.globals.clone();
            return Some(self.bindings_properties(&globals));
        }

        let handle = self.objects.get(object_id)?.clone();
        let result = match handle {
            MockHandle::Value(MockValue::Array(items)) => {
                let mut props: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        json!({ "name": i.to_string(), "value": self.remote(item), "enumerable": true })
                    })
                    .collect();
                props.push(json!({
                    "name": "length",
                    "value": self.remote(&MockValue::Number(items.len() as f64)),
                    "enumerable": false,
                }));
                json!({ "result": props })
            }
            MockHandle::Value(MockValue::Map(entries)) => {
                let entries_id = format!("entries:{object_id}");
                self.objects
                    .insert(entries_id.clone(), MockHandle::Entries(entries.clone()));
                json!({
                    "result": [{
                        "name": "size",
                        "value": self.remote(&MockValue::Number(entries.len() as f64)),
                        "enumerable": false,
                    }],
                    "internalProperties": [{
                        "name": "[[Entries]]",
                        "value": {
                            "type": "object",
                            "subtype": "array",
                            "className": "Array",
                            "description": format!("Array({})", entries.len()),
                            "objectId": entries_id,
                        }
                    }]
                })
            }
            MockHandle::Value(MockValue::Object { fields, .. }) => {
                self.bindings_properties(&fields)
            }
            MockHandle::Value(_) => json!({ "result": [] }),
            MockHandle::Entries(entries) => {
                let mut props = Vec::with_capacity(entries.len() + 1);
                for (i, (key, value)) in entries.iter().enumerate() {
                    let entry_id = format!("entry:{object_id}:{i}");
                    self.objects.insert(
                        entry_id.clone(),
                        MockHandle::Entry(key.clone(), value.clone()),
                    );
                    props.push(json!({
                        "name": i.to_string(),
                        "value": {
                            "type": "object",
                            "subtype": "internal#entry",
                            "objectId": entry_id,
                        },
                        "enumerable": true,
                    }));
                }
                props.push(json!({
                    "name": "length",
                    "value": self.remote(&MockValue::Number(entries.len() as f64)),
                    "enumerable": false,
                }));
                json!({ "result": props })
            }
            MockHandle::Entry(key, value) => json!({
                "result": [
                    { "name": "key", "value": self.remote(&key), "enumerable": true },
                    { "name": "value", "value": self.remote(&value), "enumerable": true },
                ]
            }),
            MockHandle::Bindings(bindings) => self.bindings_properties(&bindings),
        };
        Some(result)
    }

    fn bindings_properties(&mut self, bindings: &[(String, MockValue)]) -> Value {
        let props: Vec<Value> = bindings
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": self.remote(value), "enumerable": true }))
            .collect();
        json!({ "result": props })
    }

    fn evaluate_result(
        &mut self,
        outcome: std::result::Result<MockValue, Thrown>,
        by_value: bool,
    ) -> Value {
        match outcome {
            Ok(value) if by_value => json!({
                "result": { "type": value.type_name(), "value": value.to_json() }
            }),
            Ok(value) => json!({ "result": self.remote(&value) }),
            Err(thrown) => {
                let exception = error_object(thrown.class_name, &thrown.description());
                json!({
                    "result": exception.clone(),
                    "exceptionDetails": exception_details(exception),
                })
            }
        }
    }
}

fn json_to_mock(value: &Value) -> MockValue {
    match value {
        Value::Null => MockValue::Null,
        Value::Bool(b) => MockValue::Bool(*b),
        Value::Number(n) => MockValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => MockValue::Str(s.clone()),
        Value::Array(items) => MockValue::Array(items.iter().map(json_to_mock).collect()),
        Value::Object(map) => MockValue::Object {
            class_name: "Object".to_string(),
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_mock(v)))
                .collect(),
        },
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Parse `function(a, b) { return <expr>; }`.
fn parse_function_declaration(declaration: &str) -> Option<(Vec<String>, String)> {
    let rest = declaration.trim().strip_prefix("function")?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let (params, rest) = rest.split_once(')')?;
    let names = params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    let body = rest.trim().strip_prefix('{')?.strip_suffix('}')?.trim();
    let body = body.strip_prefix("return")?.trim();
    let body = body.strip_suffix(';').unwrap_or(body).trim();
    Some((names, body.to_string()))
}

// Expression evaluation: just enough JavaScript for debugger tests.

#[derive(Debug)]
struct Thrown {
    class_name: &'static str,
    message: String,
}

impl Thrown {
    fn reference(name: &str) -> Self {
        Self {
            class_name: "ReferenceError",
            message: format!("{name} is not defined"),
        }
    }

    fn type_error(message: String) -> Self {
        Self {
            class_name: "TypeError",
            message,
        }
    }

    fn syntax(message: String) -> Self {
        Self {
            class_name: "SyntaxError",
            message,
        }
    }

    fn description(&self) -> String {
        format!("{}: {}", self.class_name, self.message)
    }
}

struct Env<'a> {
    config: &'a MockCdpServerConfig,
    state: &'a State,
    bindings: Vec<(String, MockValue)>,
    this: Option<MockValue>,
}

impl<'a> Env<'a> {
    fn new(config: &'a MockCdpServerConfig, state: &'a State) -> Self {
        Self {
            config,
            state,
            bindings: Vec::new(),
            this: None,
        }
    }

    fn lookup(&self, name: &str) -> Option<MockValue> {
        if name == "this" {
            return Some(self.this.clone().unwrap_or(MockValue::Undefined));
        }
        self.bindings
            .iter()
            .rev()
            .chain(self.config.globals.iter())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(char),
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, Thrown> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| Thrown::syntax(format!("Invalid number {text}")))?;
            tokens.push(Token::Number(n));
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(Thrown::syntax("Invalid or unexpected token".to_string()));
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        return Err(Thrown::syntax("Invalid or unexpected token".to_string()));
                    };
                    i += 1;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    text.push(ch);
                }
            }
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*().,[]".contains(c) {
            tokens.push(Token::Punct(c));
            i += 1;
        } else {
            return Err(Thrown::syntax(format!("Unexpected token '{c}'")));
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Binary(char, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> std::result::Result<(), Thrown> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(Thrown::syntax(format!("missing {c}")))
        }
    }

    fn expression(&mut self) -> std::result::Result<Expr, Thrown> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct(c @ ('+' | '-'))) => *c,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> std::result::Result<Expr, Thrown> {
        let mut lhs = self.postfix()?;
        while self.eat('*') {
            let rhs = self.postfix()?;
            lhs = Expr::Binary('*', Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn postfix(&mut self) -> std::result::Result<Expr, Thrown> {
        let mut expr = self.primary()?;
        loop {
            if self.eat('.') {
                match self.tokens.get(self.pos).cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err(Thrown::syntax("Unexpected token '.'".to_string())),
                }
            } else if self.eat('(') {
                let mut args = Vec::new();
                if !self.eat(')') {
                    loop {
                        args.push(self.expression()?);
                        if self.eat(')') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat('[') {
                let index = self.expression()?;
                self.expect(']')?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> std::result::Result<Expr, Thrown> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| Thrown::syntax("Unexpected end of input".to_string()))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Punct('(') => {
                let inner = self.expression()?;
                self.expect(')')?;
                Ok(inner)
            }
            Token::Punct('-') => {
                let inner = self.postfix()?;
                Ok(Expr::Binary('-', Box::new(Expr::Number(0.0)), Box::new(inner)))
            }
            Token::Punct(c) => Err(Thrown::syntax(format!("Unexpected token '{c}'"))),
        }
    }
}

async fn evaluate_source(
    env: &mut Env<'_>,
    source: &str,
) -> std::result::Result<MockValue, Thrown> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Thrown::syntax("Unexpected token".to_string()));
    }
    eval(env, &expr).await
}

fn callee_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::Member(target, name) => Some(format!("{}.{name}", callee_path(target)?)),
        _ => None,
    }
}

fn number_arg(args: &[MockValue], i: usize) -> f64 {
    match args.get(i) {
        Some(MockValue::Number(n)) => *n,
        Some(MockValue::Str(s)) => s.trim().parse().unwrap_or(f64::NAN),
        Some(MockValue::Bool(true)) => 1.0,
        Some(MockValue::Bool(false)) | Some(MockValue::Null) => 0.0,
        _ => f64::NAN,
    }
}

fn eval<'a>(
    env: &'a mut Env<'_>,
    expr: &'a Expr,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = std::result::Result<MockValue, Thrown>> + Send + 'a>,
> {
    Box::pin(async move {
        match expr {
            Expr::Number(n) => Ok(MockValue::Number(*n)),
            Expr::Str(s) => Ok(MockValue::Str(s.clone())),
            Expr::Ident(name) => match name.as_str() {
                "true" => Ok(MockValue::Bool(true)),
                "false" => Ok(MockValue::Bool(false)),
                "null" => Ok(MockValue::Null),
                "undefined" => Ok(MockValue::Undefined),
                _ => env.lookup(name).ok_or_else(|| Thrown::reference(name)),
            },
            Expr::Member(target, name) => {
                let target = eval(env, target).await?;
                member(&target, name)
            }
            Expr::Index(target, index) => {
                let target = eval(env, target).await?;
                let index = eval(env, index).await?;
                let i = number_arg(std::slice::from_ref(&index), 0);
                match target {
                    MockValue::Array(items) => Ok(items
                        .get(i as usize)
                        .cloned()
                        .unwrap_or(MockValue::Undefined)),
                    MockValue::Str(s) => Ok(s
                        .chars()
                        .nth(i as usize)
                        .map(|c| MockValue::Str(c.to_string()))
                        .unwrap_or(MockValue::Undefined)),
                    other => member(&other, &index.to_js_string()),
                }
            }
            Expr::Call(callee, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval(env, arg).await?);
                }
                let Some(path) = callee_path(callee) else {
                    return Err(Thrown::type_error("expression is not a function".to_string()));
                };
                call_builtin(env, &path, values).await
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = eval(env, lhs).await?;
                let rhs = eval(env, rhs).await?;
                Ok(binary(*op, &lhs, &rhs))
            }
        }
    })
}

fn member(target: &MockValue, name: &str) -> std::result::Result<MockValue, Thrown> {
    match (target, name) {
        (MockValue::Undefined | MockValue::Null, _) => Err(Thrown::type_error(format!(
            "Cannot read properties of {} (reading '{name}')",
            target.to_js_string()
        ))),
        (MockValue::Str(s), "length") => Ok(MockValue::Number(s.chars().count() as f64)),
        (MockValue::Array(items), "length") => Ok(MockValue::Number(items.len() as f64)),
        (MockValue::Map(entries), "size") => Ok(MockValue::Number(entries.len() as f64)),
        (MockValue::Object { fields, .. }, _) => Ok(fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .unwrap_or(MockValue::Undefined)),
        _ => Ok(MockValue::Undefined),
    }
}

fn binary(op: char, lhs: &MockValue, rhs: &MockValue) -> MockValue {
    if op == '+' && (matches!(lhs, MockValue::Str(_)) || matches!(rhs, MockValue::Str(_))) {
        return MockValue::Str(lhs.to_js_string() + &rhs.to_js_string());
    }
    let a = number_arg(std::slice::from_ref(lhs), 0);
    let b = number_arg(std::slice::from_ref(rhs), 0);
    MockValue::Number(match op {
        '+' => a + b,
        '-' => a - b,
        _ => a * b,
    })
}

async fn call_builtin(
    env: &mut Env<'_>,
    path: &str,
    args: Vec<MockValue>,
) -> std::result::Result<MockValue, Thrown> {
    match path {
        "Math.max" => Ok(MockValue::Number(
            (0..args.len()).map(|i| number_arg(&args, i)).fold(f64::NEG_INFINITY, f64::max),
        )),
        "Math.min" => Ok(MockValue::Number(
            (0..args.len()).map(|i| number_arg(&args, i)).fold(f64::INFINITY, f64::min),
        )),
        "Math.abs" => Ok(MockValue::Number(number_arg(&args, 0).abs())),
        "String" => Ok(MockValue::Str(
            args.first().map(MockValue::to_js_string).unwrap_or_default(),
        )),
        "$dartInvokeExtension" => {
            let method = args.first().map(MockValue::to_js_string).unwrap_or_default();
            let raw_args = args.get(1).map(MockValue::to_js_string).unwrap_or_default();
            let decoded: Value = serde_json::from_str(&raw_args).unwrap_or(Value::Null);
            env.state
                .extension_calls
                .lock()
                .await
                .push((method.clone(), decoded));

            let Some(extension) = env.config.extensions.iter().find(|e| e.method == method)
            else {
                return Err(Thrown::type_error(format!("No extension registered for {method}")));
            };
            let response = match &extension.response {
                MockExtensionResponse::Result(value) => json!({ "result": value }),
                MockExtensionResponse::Error {
                    code,
                    message,
                    details,
                } => json!({
                    "error": { "code": code, "message": message, "details": details }
                }),
            };
            Ok(MockValue::Str(response.to_string()))
        }
        _ => {
            let root = path.split('.').next().unwrap_or(path);
            if env.lookup(root).is_none() {
                Err(Thrown::reference(root))
            } else {
                Err(Thrown::type_error(format!("{path} is not a function")))
            }
        }
    }
}
