//! The frontend-facing coordinator.
//!
//! [`ProxyService`] owns the single tracked isolate and implements every frontend operation on
//! top of a [`CdpClient`]. Backend notifications are consumed by one event task that applies
//! each of them to the isolate and publishes the resulting frontend events under the same
//! lock, so a subscriber that sees an event also sees the state it describes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use nova_cdp::{CdpClient, CdpEvent, ConsoleApiCalledEvent, PausedEvent, RemoteObject};
use nova_config::ServiceConfig;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::compiler::{ExpressionCompiler, FrameTarget};
use crate::error::{ServiceError, ServiceResult, CODE_SERVER_ERROR};
use crate::eval::{self, EvalTarget, FrameEvalTarget};
use crate::events::{encode_output, translate_console, ConsoleAction, EventReceiver, StreamRegistry};
use crate::execution::{self, call_argument, capture_frames, FrameContext, RunState};
use crate::instances::{class_ref, Inspector};
use crate::isolate::IsolateState;
use crate::locations::{token_pos, AssetReader, LocationTranslator};
use crate::object_registry::ObjectRegistry;
use crate::protocol::{
    Breakpoint, Class, EvalResult, Event, EventKind, ExceptionPauseMode, Isolate, IsolateRef,
    Library, Obj, Script, ScriptList, SourceReport, SourceReportRange, Stack, StepOption,
    StreamId, Success, Version, Vm, VmRef,
};

pub const PROTOCOL_MAJOR: u32 = 3;
pub const PROTOCOL_MINOR: u32 = 61;

/// The only report kind this backend can produce.
pub const POSSIBLE_BREAKPOINTS: &str = "PossibleBreakpoints";

/// Frontend methods with no equivalent over the backend protocol.
pub const UNSUPPORTED_METHODS: &[&str] = &[
    "getAllocationProfile",
    "getClassList",
    "getInstances",
    "getInboundReferences",
    "getRetainingPath",
    "kill",
    "registerService",
    "reloadSources",
    "setFlag",
    "setLibraryDebuggable",
    "setVMTimelineFlags",
    "getVMTimeline",
    "getVMTimelineFlags",
    "clearVMTimeline",
    "getClientName",
    "setClientName",
    "requirePermissionToResume",
];

const LOG_TARGET: &str = "nova.vm_service";

struct Session {
    vm_name: String,
    isolate: Option<IsolateState>,
    next_isolate_number: u64,
    /// Backend script id to URL, from `Debugger.scriptParsed`.
    script_urls: HashMap<String, String>,
    /// Latest backend execution context.
    context_id: Option<i64>,
    /// Backend exception pausing, which outlives navigation.
    exception_pause_mode: ExceptionPauseMode,
}

impl Session {
    fn isolate(&self, id: &str) -> ServiceResult<&IsolateState> {
        self.isolate
            .as_ref()
            .filter(|isolate| isolate.id == id)
            .ok_or_else(|| unknown_isolate(id))
    }

    fn isolate_mut(&mut self, id: &str) -> ServiceResult<&mut IsolateState> {
        self.isolate
            .as_mut()
            .filter(|isolate| isolate.id == id)
            .ok_or_else(|| unknown_isolate(id))
    }
}

fn unknown_isolate(id: &str) -> ServiceError {
    ServiceError::invalid_argument(format!("unknown isolate {id}"))
}

struct Inner {
    client: CdpClient,
    translator: Arc<dyn LocationTranslator>,
    assets: Arc<dyn AssetReader>,
    compiler: Arc<dyn ExpressionCompiler>,
    start_time: i64,
    session: Mutex<Session>,
    objects: Mutex<ObjectRegistry>,
    streams: StreamRegistry,
    /// Serialises execution control (pause, resume, step) against the isolate.
    exec: tokio::sync::Mutex<()>,
    /// Serialises breakpoint placement so find-or-create is atomic across the backend call.
    breakpoint_ops: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// VM-service facade over a browser runtime.
#[derive(Clone)]
pub struct ProxyService {
    inner: Arc<Inner>,
}

impl ProxyService {
    pub fn new(
        client: CdpClient,
        translator: Arc<dyn LocationTranslator>,
        assets: Arc<dyn AssetReader>,
        compiler: Arc<dyn ExpressionCompiler>,
        config: ServiceConfig,
    ) -> Self {
        let inner = Inner {
            client,
            translator,
            assets,
            compiler,
            start_time: crate::protocol::now_millis(),
            session: Mutex::new(Session {
                vm_name: config.vm_name,
                isolate: None,
                next_isolate_number: 1,
                script_urls: HashMap::new(),
                context_id: None,
                exception_pause_mode: ExceptionPauseMode::None,
            }),
            objects: Mutex::new(ObjectRegistry::with_max_tracked(config.max_tracked_objects)),
            streams: StreamRegistry::new(config.subscriber_queue_size),
            exec: tokio::sync::Mutex::new(()),
            breakpoint_ops: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Attach to the backend: start consuming its events, enable the debugger domains and
    /// create the isolate.
    pub async fn start(&self) -> ServiceResult<()> {
        let events = self.inner.client.event_stream().await;
        tokio::spawn(run_backend_events(
            Arc::downgrade(&self.inner),
            events,
            self.inner.shutdown.clone(),
        ));

        self.inner.client.runtime_enable().await?;
        self.inner.client.debugger_enable().await?;
        self.create_isolate();
        tracing::info!(target: LOG_TARGET, "attached to backend");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.client.shutdown();
    }

    // Isolate lifecycle hooks.

    /// Create the isolate if none is tracked and return it.
    pub fn create_isolate(&self) -> IsolateRef {
        self.inner.create_isolate()
    }

    /// Tear the isolate down. Its breakpoints are dropped and its object ids invalidated.
    pub async fn destroy_isolate(&self) {
        self.inner.destroy_isolate().await
    }

    /// Replace the isolate with a fresh one.
    pub async fn restart(&self) -> IsolateRef {
        self.inner.destroy_isolate().await;
        self.inner.create_isolate()
    }

    // VM and isolate queries.

    pub fn get_version(&self) -> Version {
        Version {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
        }
    }

    pub fn get_vm(&self) -> Vm {
        let session = self.inner.session.lock();
        Vm {
            name: session.vm_name.clone(),
            architecture_bits: 64,
            host_cpu: std::env::consts::ARCH.to_string(),
            operating_system: std::env::consts::OS.to_string(),
            target_cpu: "javascript".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: i64::from(std::process::id()),
            start_time: self.inner.start_time,
            isolates: session
                .isolate
                .iter()
                .map(IsolateState::isolate_ref)
                .collect(),
            isolate_groups: Vec::new(),
            system_isolates: Vec::new(),
            system_isolate_groups: Vec::new(),
        }
    }

    pub fn get_isolate(&self, isolate_id: &str) -> ServiceResult<Isolate> {
        Ok(self.inner.session.lock().isolate(isolate_id)?.to_isolate())
    }

    pub fn get_scripts(&self, isolate_id: &str) -> ServiceResult<ScriptList> {
        let session = self.inner.session.lock();
        let isolate = session.isolate(isolate_id)?;
        Ok(ScriptList {
            scripts: isolate.scripts.iter().map(|e| e.script.clone()).collect(),
        })
    }

    pub async fn get_object(
        &self,
        isolate_id: &str,
        object_id: &str,
        offset: Option<usize>,
        count: Option<usize>,
    ) -> ServiceResult<Obj> {
        enum Target {
            Library(Library),
            Script(Script),
            Breakpoint(Breakpoint),
            Other,
        }

        let target = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            if let Some(entry) = isolate.library(object_id) {
                Target::Library(Library {
                    id: entry.library.id.clone(),
                    name: entry.library.name.clone(),
                    uri: entry.library.uri.clone(),
                    debuggable: true,
                    dependencies: Vec::new(),
                    scripts: isolate
                        .scripts
                        .iter()
                        .filter(|s| s.library_id == entry.library.id)
                        .map(|s| s.script.clone())
                        .collect(),
                    variables: Vec::new(),
                    functions: Vec::new(),
                    classes: Vec::new(),
                })
            } else if let Some(entry) = isolate.script(object_id) {
                let library = isolate
                    .library(&entry.library_id)
                    .map(|l| l.library.clone())
                    .ok_or_else(|| {
                        ServiceError::invalid_argument(format!("script {object_id} has no library"))
                    })?;
                Target::Script(Script {
                    id: entry.script.id.clone(),
                    uri: entry.script.uri.clone(),
                    library,
                    line_offset: 0,
                    column_offset: 0,
                    source: None,
                    token_pos_table: Vec::new(),
                })
            } else if let Some(breakpoint) = isolate.breakpoints.get(object_id) {
                Target::Breakpoint(breakpoint.clone())
            } else {
                Target::Other
            }
        };

        match target {
            Target::Library(library) => Ok(Obj::Library(library)),
            Target::Breakpoint(breakpoint) => Ok(Obj::Breakpoint(breakpoint)),
            Target::Script(mut script) => {
                script.source = Some(self.inner.assets.source(&script.uri).await?);
                script.token_pos_table = token_pos_table(&self.inner.translator.positions(&script.uri));
                Ok(Obj::Script(script))
            }
            Target::Other => {
                if let Some(name) = object_id.strip_prefix("classes/") {
                    let class = class_ref(name);
                    return Ok(Obj::Class(Class {
                        id: class.id,
                        name: class.name,
                        library: None,
                        is_abstract: false,
                        is_const: false,
                        fields: Vec::new(),
                        functions: Vec::new(),
                        subclasses: Vec::new(),
                        interfaces: Vec::new(),
                    }));
                }
                if !object_id.starts_with("objects/") {
                    return Err(ServiceError::invalid_argument(format!(
                        "unknown object id {object_id}"
                    )));
                }
                let instance = self.inner.inspector().instance(object_id, offset, count).await?;
                Ok(Obj::Instance(instance))
            }
        }
    }

    pub fn set_name(&self, isolate_id: &str, name: &str) -> ServiceResult<Success> {
        let mut session = self.inner.session.lock();
        let isolate = session.isolate_mut(isolate_id)?;
        isolate.name = name.to_string();
        let event = isolate.event(EventKind::IsolateUpdate);
        self.inner.streams.publish(StreamId::Isolate, event);
        Ok(Success)
    }

    pub fn set_vm_name(&self, name: &str) -> ServiceResult<Success> {
        let mut session = self.inner.session.lock();
        session.vm_name = name.to_string();
        let mut event = Event::new(EventKind::VmUpdate, None);
        event.vm = Some(VmRef {
            name: name.to_string(),
        });
        self.inner.streams.publish(StreamId::Vm, event);
        Ok(Success)
    }

    // Breakpoints.

    pub async fn add_breakpoint(
        &self,
        isolate_id: &str,
        script_id: &str,
        line: u32,
    ) -> ServiceResult<Breakpoint> {
        let _ops = self.inner.breakpoint_ops.lock().await;

        let (script, location) = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            let entry = isolate.script(script_id).ok_or_else(|| {
                ServiceError::invalid_argument(format!("unknown script {script_id}"))
            })?;
            let location = self
                .inner
                .translator
                .to_backend(&entry.script.uri, line)
                .ok_or_else(|| {
                    ServiceError::InvalidLocation(format!(
                        "{}:{line} has no executable code",
                        entry.script.uri
                    ))
                })?;
            if let Some(existing) = isolate.breakpoints.find_at(&location) {
                return Ok(existing);
            }
            (entry.script.clone(), location)
        };

        let placed = self
            .inner
            .client
            .set_breakpoint_by_url(&location.url, location.line, Some(location.column))
            .await?;

        let column = self
            .inner
            .translator
            .to_source(&location.url, location.line, location.column)
            .filter(|pos| pos.uri == script.uri && pos.line == line)
            .map(|pos| pos.column)
            .unwrap_or(1);

        let backend_id = placed.breakpoint_id.clone();
        let resolved = !placed.locations.is_empty();
        let added = {
            let mut session = self.inner.session.lock();
            match session.isolate_mut(isolate_id) {
                Ok(isolate) => {
                    let breakpoint = isolate.breakpoints.insert(
                        script,
                        line,
                        column,
                        location,
                        placed.breakpoint_id,
                        resolved,
                    );
                    let mut event = isolate.event(EventKind::BreakpointAdded);
                    event.breakpoint = Some(breakpoint.clone());
                    self.inner.streams.publish(StreamId::Debug, event);
                    Some(breakpoint)
                }
                Err(_) => None,
            }
        };

        match added {
            Some(breakpoint) => Ok(breakpoint),
            None => {
                // The isolate went away while the backend call was in flight.
                if let Err(err) = self.inner.client.remove_breakpoint(&backend_id).await {
                    tracing::warn!(target: LOG_TARGET, error = %err, "failed to remove orphaned breakpoint");
                }
                Err(unknown_isolate(isolate_id))
            }
        }
    }

    pub async fn add_breakpoint_with_script_uri(
        &self,
        isolate_id: &str,
        uri: &str,
        line: u32,
    ) -> ServiceResult<Breakpoint> {
        let script_id = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            self.inner
                .translator
                .canonical_uri(uri)
                .and_then(|canonical| isolate.script_by_uri(&canonical))
                .map(|entry| entry.script.id.clone())
                .ok_or_else(|| ServiceError::invalid_argument(format!("unknown script uri {uri}")))?
        };
        self.add_breakpoint(isolate_id, &script_id, line).await
    }

    pub async fn remove_breakpoint(
        &self,
        isolate_id: Option<&str>,
        breakpoint_id: Option<&str>,
    ) -> ServiceResult<Success> {
        let isolate_id =
            isolate_id.ok_or_else(|| ServiceError::invalid_argument("isolateId is required"))?;
        let breakpoint_id = breakpoint_id
            .ok_or_else(|| ServiceError::invalid_argument("breakpointId is required"))?;
        let _ops = self.inner.breakpoint_ops.lock().await;

        let backend_id = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            isolate
                .breakpoints
                .backend_id(breakpoint_id)
                .map(str::to_string)
                .ok_or_else(|| {
                    ServiceError::invalid_argument(format!("unknown breakpoint {breakpoint_id}"))
                })?
        };

        self.inner.client.remove_breakpoint(&backend_id).await?;

        let mut session = self.inner.session.lock();
        let isolate = session.isolate_mut(isolate_id)?;
        if let Some((breakpoint, _)) = isolate.breakpoints.remove(breakpoint_id) {
            let mut event = isolate.event(EventKind::BreakpointRemoved);
            event.breakpoint = Some(breakpoint);
            self.inner.streams.publish(StreamId::Debug, event);
        }
        Ok(Success)
    }

    // Execution control.

    pub async fn pause(&self, isolate_id: &str) -> ServiceResult<Success> {
        let _exec = self.inner.exec.lock().await;
        {
            let mut session = self.inner.session.lock();
            let isolate = session.isolate_mut(isolate_id)?;
            if !isolate.execution.is_running() {
                return Ok(Success);
            }
            isolate.execution.begin_step(None);
        }
        self.inner.client.pause().await?;
        Ok(Success)
    }

    pub async fn resume(&self, isolate_id: &str, step: Option<&str>) -> ServiceResult<Success> {
        let step = step.map(str::parse::<StepOption>).transpose()?;
        if step == Some(StepOption::Rewind) {
            return Err(ServiceError::Unsupported("resume with step Rewind".into()));
        }

        enum Plan {
            Start(RunState),
            Continue(u64),
        }

        let _exec = self.inner.exec.lock().await;
        let plan = {
            let mut session = self.inner.session.lock();
            let isolate = session.isolate_mut(isolate_id)?;
            if isolate.execution.is_running() {
                return Err(ServiceError::NotPaused(format!("{isolate_id} is running")));
            }
            match isolate.execution.pause_generation() {
                Some(generation) => {
                    isolate.execution.begin_step(step);
                    Plan::Continue(generation)
                }
                None => {
                    isolate.execution.set_running();
                    let event = isolate.event(EventKind::Resume);
                    self.inner.streams.publish(StreamId::Debug, event);
                    Plan::Start(RunState::NotStarted)
                }
            }
        };

        match plan {
            Plan::Start(previous) => {
                if let Err(err) = self.inner.client.run_if_waiting_for_debugger().await {
                    let mut session = self.inner.session.lock();
                    if let Ok(isolate) = session.isolate_mut(isolate_id) {
                        if isolate.execution.is_running() {
                            isolate.execution.restore(previous);
                        }
                    }
                    return Err(err.into());
                }
            }
            Plan::Continue(generation) => {
                if let Err(err) = execution::step(&self.inner.client, step).await {
                    let mut session = self.inner.session.lock();
                    if let Ok(isolate) = session.isolate_mut(isolate_id) {
                        isolate.execution.begin_step(None);
                    }
                    return Err(err);
                }
                let mut session = self.inner.session.lock();
                if let Ok(isolate) = session.isolate_mut(isolate_id) {
                    // The backend may already have reported the resume, or even the next pause.
                    if isolate.execution.pause_generation() == Some(generation)
                        && isolate.execution.set_running()
                    {
                        let event = isolate.event(EventKind::Resume);
                        self.inner.streams.publish(StreamId::Debug, event);
                    }
                }
            }
        }
        Ok(Success)
    }

    /// The paused stack, or `None` while the isolate is running.
    pub fn get_stack(&self, isolate_id: &str) -> ServiceResult<Option<Stack>> {
        Ok(self.inner.session.lock().isolate(isolate_id)?.execution.stack())
    }

    // Evaluation.

    pub async fn evaluate(
        &self,
        isolate_id: &str,
        target_id: &str,
        expression: &str,
        scope: Option<BTreeMap<String, String>>,
    ) -> ServiceResult<EvalResult> {
        let inspector = self.inner.inspector();
        let (library_uri, context_id, is_library) = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            let context_id = isolate.context_id.or(session.context_id);
            match isolate.library(target_id) {
                Some(entry) => (entry.library.uri.clone(), context_id, true),
                None => {
                    let root = isolate
                        .root_library()
                        .map(|l| l.uri.clone())
                        .unwrap_or_default();
                    (root, context_id, false)
                }
            }
        };

        let this = if is_library {
            None
        } else {
            let remote = inspector.resolve(target_id)?;
            let object_id = remote.object_id.ok_or_else(|| {
                ServiceError::invalid_argument(format!(
                    "{target_id} is not a library or an object reference"
                ))
            })?;
            Some(object_id)
        };

        let mut bindings = Vec::new();
        for (name, id) in scope.unwrap_or_default() {
            let value = inspector.resolve(&id)?;
            bindings.push((name, call_argument(&value)));
        }

        eval::evaluate(
            &self.inner.client,
            self.inner.compiler.as_ref(),
            &inspector,
            EvalTarget {
                library_uri,
                this,
                context_id,
            },
            expression,
            bindings,
        )
        .await
    }

    pub async fn evaluate_in_frame(
        &self,
        isolate_id: &str,
        frame_index: usize,
        expression: &str,
    ) -> ServiceResult<EvalResult> {
        let target = {
            let session = self.inner.session.lock();
            let isolate = session.isolate(isolate_id)?;
            if isolate.execution.is_running() {
                return Err(ServiceError::NotPaused(format!("{isolate_id} is running")));
            }
            let frame = isolate.execution.frame(frame_index).ok_or_else(|| {
                ServiceError::invalid_argument(format!(
                    "frame index {frame_index} is out of range (0..{})",
                    isolate.execution.frame_count()
                ))
            })?;
            FrameEvalTarget {
                call_frame_id: frame.call_frame_id.clone(),
                library_uri: frame
                    .library_uri
                    .clone()
                    .or_else(|| isolate.root_library().map(|l| l.uri.clone()))
                    .unwrap_or_default(),
                position: frame.position.as_ref().map(|pos| FrameTarget {
                    uri: pos.uri.clone(),
                    line: pos.line,
                    column: pos.column,
                }),
                scope: frame.bindings.iter().map(|(name, _)| name.clone()).collect(),
            }
        };

        eval::evaluate_in_frame(
            &self.inner.client,
            self.inner.compiler.as_ref(),
            &self.inner.inspector(),
            target,
            expression,
        )
        .await
    }

    // Reports and modes.

    pub fn get_source_report(
        &self,
        isolate_id: Option<&str>,
        report_kinds: &[String],
        script_id: Option<&str>,
    ) -> ServiceResult<SourceReport> {
        let isolate_id =
            isolate_id.ok_or_else(|| ServiceError::invalid_argument("isolateId is required"))?;
        if report_kinds.is_empty() {
            return Err(ServiceError::invalid_argument("reports must not be empty"));
        }
        if let Some(kind) = report_kinds.iter().find(|k| *k != POSSIBLE_BREAKPOINTS) {
            return Err(ServiceError::invalid_argument(format!(
                "unsupported source report kind {kind}"
            )));
        }

        let session = self.inner.session.lock();
        let isolate = session.isolate(isolate_id)?;
        let scripts: Vec<_> = match script_id {
            Some(id) => vec![isolate
                .script(id)
                .ok_or_else(|| ServiceError::invalid_argument(format!("unknown script {id}")))?
                .script
                .clone()],
            None => isolate.scripts.iter().map(|e| e.script.clone()).collect(),
        };

        let ranges = scripts
            .iter()
            .enumerate()
            .map(|(script_index, script)| {
                let possible: Vec<i64> = self
                    .inner
                    .translator
                    .positions(&script.uri)
                    .into_iter()
                    .map(|(line, column)| token_pos(line, column))
                    .collect();
                SourceReportRange {
                    script_index,
                    start_pos: possible.first().copied().unwrap_or(-1),
                    end_pos: possible.last().copied().unwrap_or(-1),
                    compiled: !possible.is_empty(),
                    possible_breakpoints: possible,
                }
            })
            .collect();

        Ok(SourceReport { ranges, scripts })
    }

    pub async fn set_exception_pause_mode(
        &self,
        isolate_id: &str,
        mode: &str,
    ) -> ServiceResult<Success> {
        let mode: ExceptionPauseMode = mode.parse()?;
        self.inner.session.lock().isolate(isolate_id)?;
        self.inner
            .client
            .set_pause_on_exceptions(mode.backend_state())
            .await?;
        let mut session = self.inner.session.lock();
        session.exception_pause_mode = mode;
        if let Ok(isolate) = session.isolate_mut(isolate_id) {
            isolate.exception_pause_mode = mode;
        }
        Ok(Success)
    }

    // Service extensions.

    pub async fn call_service_extension(
        &self,
        method: &str,
        isolate_id: Option<&str>,
        args: Map<String, Value>,
    ) -> ServiceResult<Value> {
        let context_id = {
            let session = self.inner.session.lock();
            let isolate = match isolate_id {
                Some(id) => session.isolate(id)?,
                None => session
                    .isolate
                    .as_ref()
                    .ok_or_else(|| ServiceError::MethodNotFound(method.to_string()))?,
            };
            if !isolate.extension_rpcs.iter().any(|rpc| rpc == method) {
                return Err(ServiceError::MethodNotFound(method.to_string()));
            }
            isolate.context_id.or(session.context_id)
        };

        let expression = extension_invocation(method, args)?;
        let reply = self
            .inner
            .client
            .evaluate(&expression, context_id, true)
            .await?;
        if let Some(details) = reply.exception_details {
            return Err(ServiceError::Extension {
                code: CODE_SERVER_ERROR,
                message: details.message(),
                details: details.text,
            });
        }
        parse_extension_reply(reply.result.value)
    }

    // Streams.

    pub fn stream_listen(&self, stream_id: &str) -> ServiceResult<Success> {
        let stream: StreamId = stream_id.parse()?;
        self.inner.streams.listen(stream);
        Ok(Success)
    }

    pub fn stream_cancel(&self, stream_id: &str) -> ServiceResult<Success> {
        let stream: StreamId = stream_id.parse()?;
        self.inner.streams.cancel(stream)?;
        Ok(Success)
    }

    /// A new independent subscription to `stream_id`.
    pub fn on_event(&self, stream_id: &str) -> ServiceResult<EventReceiver> {
        let stream: StreamId = stream_id.parse()?;
        Ok(self.inner.streams.subscribe(stream))
    }

    /// Fails every method in [`UNSUPPORTED_METHODS`].
    pub fn unsupported(&self, method: &str) -> ServiceError {
        ServiceError::Unsupported(method.to_string())
    }
}

fn token_pos_table(positions: &[(u32, u32)]) -> Vec<Vec<i64>> {
    let mut by_line: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for &(line, column) in positions {
        by_line.entry(line).or_default().push(column);
    }
    by_line
        .into_iter()
        .map(|(line, columns)| {
            let mut row = vec![i64::from(line)];
            for column in columns {
                row.push(token_pos(line, column));
                row.push(i64::from(column));
            }
            row
        })
        .collect()
}

/// Backend expression invoking a registered extension. Argument values that are not strings
/// are JSON encoded.
fn extension_invocation(method: &str, args: Map<String, Value>) -> ServiceResult<String> {
    let args: Map<String, Value> = args
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(_) => (key, value),
            other => (key, Value::String(other.to_string())),
        })
        .collect();
    let encoded = serde_json::to_string(&Value::Object(args)).map_err(nova_cdp::CdpError::from)?;
    let method = serde_json::to_string(method).map_err(nova_cdp::CdpError::from)?;
    let encoded = serde_json::to_string(&encoded).map_err(nova_cdp::CdpError::from)?;
    Ok(format!("$dartInvokeExtension({method}, {encoded})"))
}

fn parse_extension_reply(value: Option<Value>) -> ServiceResult<Value> {
    let reply = match value {
        Some(Value::String(text)) => serde_json::from_str::<Value>(&text)
            .map_err(|err| ServiceError::Extension {
                code: CODE_SERVER_ERROR,
                message: "malformed extension reply".to_string(),
                details: err.to_string(),
            })?,
        Some(other) => other,
        None => Value::Null,
    };
    if let Some(error) = reply.get("error") {
        return Err(ServiceError::Extension {
            code: error
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(CODE_SERVER_ERROR),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            details: match error.get("details") {
                Some(Value::String(details)) => details.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        });
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}

impl Inner {
    fn inspector(&self) -> Inspector<'_> {
        Inspector::new(&self.client, &self.objects)
    }

    fn create_isolate(&self) -> IsolateRef {
        let mut session = self.session.lock();
        if let Some(isolate) = &session.isolate {
            return isolate.isolate_ref();
        }
        let number = session.next_isolate_number;
        session.next_isolate_number += 1;
        let mut isolate = IsolateState::new(number, self.translator.as_ref());
        isolate.context_id = session.context_id;
        isolate.exception_pause_mode = session.exception_pause_mode;
        let isolate_ref = isolate.isolate_ref();
        self.streams
            .publish(StreamId::Isolate, isolate.event(EventKind::IsolateStart));
        self.streams
            .publish(StreamId::Isolate, isolate.event(EventKind::IsolateRunnable));
        tracing::debug!(target: LOG_TARGET, isolate = %isolate.id, "isolate created");
        session.isolate = Some(isolate);
        isolate_ref
    }

    async fn destroy_isolate(&self) {
        let stale = {
            let mut session = self.session.lock();
            let Some(mut isolate) = session.isolate.take() else {
                return;
            };
            self.streams
                .publish(StreamId::Isolate, isolate.event(EventKind::IsolateExit));
            tracing::debug!(target: LOG_TARGET, isolate = %isolate.id, "isolate destroyed");
            isolate.breakpoints.drain()
        };
        self.objects.lock().clear();

        for backend_id in stale {
            if let Err(err) = self.client.remove_breakpoint(&backend_id).await {
                tracing::debug!(
                    target: LOG_TARGET,
                    breakpoint = %backend_id,
                    error = %err,
                    "failed to remove breakpoint of destroyed isolate"
                );
            }
        }
    }

    async fn handle_backend_event(&self, event: CdpEvent) {
        match event {
            CdpEvent::Paused(paused) => self.on_paused(paused).await,
            CdpEvent::Resumed => {
                let mut session = self.session.lock();
                if let Some(isolate) = session.isolate.as_mut() {
                    if isolate.execution.set_running() {
                        let event = isolate.event(EventKind::Resume);
                        self.streams.publish(StreamId::Debug, event);
                    }
                }
            }
            CdpEvent::ScriptParsed(script) => {
                self.session
                    .lock()
                    .script_urls
                    .insert(script.script_id, script.url);
            }
            CdpEvent::ConsoleApiCalled(call) => self.on_console(&call),
            CdpEvent::ExceptionThrown(thrown) => {
                self.write_output(StreamId::Stderr, &thrown.exception_details.message());
            }
            CdpEvent::InspectRequested(request) => self.publish_inspect(&request.object),
            CdpEvent::ExecutionContextCreated(context) => {
                self.session.lock().context_id = Some(context.id);
                self.create_isolate();
                let mut session = self.session.lock();
                if let Some(isolate) = session.isolate.as_mut() {
                    isolate.context_id.get_or_insert(context.id);
                }
            }
            CdpEvent::ExecutionContextDestroyed {
                execution_context_id,
            } => {
                let current = {
                    let mut session = self.session.lock();
                    if session.context_id == Some(execution_context_id) {
                        session.context_id = None;
                    }
                    session
                        .isolate
                        .as_ref()
                        .is_some_and(|i| i.context_id == Some(execution_context_id))
                };
                if current {
                    self.destroy_isolate().await;
                }
            }
            CdpEvent::ExecutionContextsCleared => {
                self.session.lock().context_id = None;
                self.destroy_isolate().await;
            }
        }
    }

    async fn on_paused(&self, paused: PausedEvent) {
        let (isolate_id, pending_step, context) = {
            let session = self.session.lock();
            let Some(isolate) = session.isolate.as_ref() else {
                tracing::debug!(target: LOG_TARGET, "backend paused without an isolate");
                return;
            };
            (
                isolate.id.clone(),
                isolate.execution.pending_step(),
                FrameContext {
                    scripts: isolate.scripts.clone(),
                    libraries: isolate.libraries.clone(),
                    script_urls: session.script_urls.clone(),
                },
            )
        };

        if let Some(step) = pending_step {
            let top_visible = paused
                .call_frames
                .first()
                .is_some_and(|frame| context.source_position(self.translator.as_ref(), frame).is_some());
            if !top_visible && !paused.is_exception() && paused.hit_breakpoints.is_empty() {
                tracing::trace!(target: LOG_TARGET, ?step, "stepping through runtime-only code");
                if let Err(err) = execution::continue_step(&self.client, step).await {
                    tracing::warn!(target: LOG_TARGET, error = %err, "failed to continue step");
                }
                return;
            }
        }

        let inspector = self.inspector();
        let frames = match capture_frames(
            &self.client,
            &inspector,
            self.translator.as_ref(),
            &context,
            &paused.call_frames,
        )
        .await
        {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, error = %err, "failed to capture paused frames");
                Vec::new()
            }
        };
        let exception = paused.exception().map(|thrown| inspector.instance_ref(&thrown));

        let mut session = self.session.lock();
        let Some(isolate) = session.isolate.as_mut().filter(|i| i.id == isolate_id) else {
            return;
        };
        let hits = isolate.breakpoints.hits(&paused.hit_breakpoints);
        let kind = execution::pause_kind(&paused, hits.len());
        let mut event = isolate.event(kind);
        event.top_frame = frames.first().map(|info| info.frame.clone());
        match kind {
            EventKind::PauseBreakpoint => {
                event.breakpoint = hits.first().cloned();
                event.pause_breakpoints = Some(hits);
            }
            EventKind::PauseException => event.exception = exception,
            _ => {}
        }
        isolate.execution.set_paused(event.clone(), frames);
        self.streams.publish(StreamId::Debug, event);
    }

    fn on_console(&self, call: &ConsoleApiCalledEvent) {
        match translate_console(call) {
            ConsoleAction::RegisterExtension(name) => {
                let mut session = self.session.lock();
                let Some(isolate) = session.isolate.as_mut() else {
                    tracing::warn!(target: LOG_TARGET, extension = %name, "extension registered without an isolate");
                    return;
                };
                if !isolate.extension_rpcs.contains(&name) {
                    isolate.extension_rpcs.push(name.clone());
                }
                let mut event = isolate.event(EventKind::ServiceExtensionAdded);
                event.extension_rpc = Some(name);
                self.streams.publish(StreamId::Isolate, event);
            }
            ConsoleAction::PostEvent { kind, data } => {
                let isolate = self.current_isolate_ref();
                let mut event = Event::new(EventKind::Extension, isolate);
                event.extension_kind = Some(kind);
                event.extension_data = Some(data);
                self.streams.publish(StreamId::Extension, event);
            }
            ConsoleAction::Inspect(object) => self.publish_inspect(&object),
            ConsoleAction::Write { stream, text } => self.write_output(stream, &text),
        }
    }

    fn publish_inspect(&self, object: &RemoteObject) {
        let inspectee = self.inspector().instance_ref(object);
        let mut event = Event::new(EventKind::Inspect, self.current_isolate_ref());
        event.inspectee = Some(inspectee);
        self.streams.publish(StreamId::Debug, event);
    }

    fn write_output(&self, stream: StreamId, text: &str) {
        let mut event = Event::new(EventKind::WriteEvent, self.current_isolate_ref());
        event.bytes = Some(encode_output(text));
        self.streams.publish(stream, event);
    }

    fn current_isolate_ref(&self) -> Option<IsolateRef> {
        self.session.lock().isolate.as_ref().map(IsolateState::isolate_ref)
    }
}

async fn run_backend_events(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            tracing::info!(target: LOG_TARGET, "backend event feed closed");
            return;
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_backend_event(event).await;
    }
}
