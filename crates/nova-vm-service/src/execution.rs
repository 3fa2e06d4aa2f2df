//! Execution state of the isolate and translation of backend pauses.

use std::collections::HashMap;

use nova_cdp::{CallArgument, CallFrame, CdpClient, PausedEvent, RemoteObject};

use crate::error::{ServiceError, ServiceResult};
use crate::instances::Inspector;
use crate::isolate::{LibraryEntry, ScriptEntry};
use crate::locations::{token_pos, LocationTranslator, SourcePosition};
use crate::protocol::{
    BoundVariable, CodeKind, CodeRef, Event, EventKind, Frame, FrameKind, IsolateRef,
    SourceLocation, Stack, StepOption,
};

/// A frame captured at a pause, with what evaluation needs to run in it.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub frame: Frame,
    pub call_frame_id: String,
    /// Frame variables by name, in `frame.vars` order.
    pub bindings: Vec<(String, CallArgument)>,
    pub position: Option<SourcePosition>,
    pub library_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PauseSnapshot {
    pub generation: u64,
    pub event: Event,
    pub frames: Vec<FrameInfo>,
}

#[derive(Debug, Clone, Default)]
pub enum RunState {
    /// Loaded, waiting for the first resume.
    #[default]
    NotStarted,
    Running,
    Paused(Box<PauseSnapshot>),
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    run: RunState,
    generation: u64,
    pending_step: Option<StepOption>,
}

impl ExecutionState {
    pub fn is_running(&self) -> bool {
        matches!(self.run, RunState::Running)
    }

    /// Generation of the current pause, if paused.
    pub fn pause_generation(&self) -> Option<u64> {
        match &self.run {
            RunState::Paused(snapshot) => Some(snapshot.generation),
            _ => None,
        }
    }

    pub fn pause_event(&self, isolate: IsolateRef) -> Event {
        match &self.run {
            RunState::NotStarted => Event::new(EventKind::PauseStart, Some(isolate)),
            RunState::Running => Event::new(EventKind::Resume, Some(isolate)),
            RunState::Paused(snapshot) => snapshot.event.clone(),
        }
    }

    /// The current stack. `None` while running; empty before the program has started.
    pub fn stack(&self) -> Option<Stack> {
        let frames = match &self.run {
            RunState::Running => return None,
            RunState::NotStarted => Vec::new(),
            RunState::Paused(snapshot) => snapshot.frames.iter().map(|f| f.frame.clone()).collect(),
        };
        Some(Stack {
            frames,
            messages: Vec::new(),
            truncated: false,
        })
    }

    pub fn frame(&self, index: usize) -> Option<&FrameInfo> {
        match &self.run {
            RunState::Paused(snapshot) => snapshot.frames.get(index),
            _ => None,
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.run {
            RunState::Paused(snapshot) => snapshot.frames.len(),
            _ => 0,
        }
    }

    pub fn set_paused(&mut self, event: Event, frames: Vec<FrameInfo>) {
        self.generation += 1;
        self.pending_step = None;
        self.run = RunState::Paused(Box::new(PauseSnapshot {
            generation: self.generation,
            event,
            frames,
        }));
    }

    /// Switch to running. Returns `false` if already running.
    pub fn set_running(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.run = RunState::Running;
        true
    }

    /// Restore the state saved before a failed resume.
    pub fn restore(&mut self, run: RunState) {
        self.run = run;
    }

    pub fn begin_step(&mut self, step: Option<StepOption>) {
        self.pending_step = step;
    }

    pub fn pending_step(&self) -> Option<StepOption> {
        self.pending_step
    }
}

/// Issue the backend command for a frontend step.
pub async fn step(client: &CdpClient, step: Option<StepOption>) -> ServiceResult<()> {
    match step {
        None => client.resume().await?,
        Some(StepOption::Into) => client.step_into().await?,
        Some(StepOption::Over) | Some(StepOption::OverAsyncSuspension) => {
            client.step_over().await?
        }
        Some(StepOption::Out) => client.step_out().await?,
        Some(StepOption::Rewind) => {
            return Err(ServiceError::Unsupported("resume with step Rewind".into()))
        }
    }
    Ok(())
}

/// Continue a step that stopped in runtime-only code.
pub async fn continue_step(client: &CdpClient, step: StepOption) -> ServiceResult<()> {
    match step {
        StepOption::Out => client.step_out().await?,
        _ => client.step_into().await?,
    }
    Ok(())
}

/// Kind of the frontend pause event for a backend pause.
pub fn pause_kind(paused: &PausedEvent, breakpoint_hits: usize) -> EventKind {
    if paused.is_exception() {
        EventKind::PauseException
    } else if breakpoint_hits > 0 {
        EventKind::PauseBreakpoint
    } else {
        EventKind::PauseInterrupted
    }
}

/// Lookup tables captured from the isolate before talking to the backend.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    pub scripts: Vec<ScriptEntry>,
    pub libraries: Vec<LibraryEntry>,
    /// Backend script id to URL, from `Debugger.scriptParsed`.
    pub script_urls: HashMap<String, String>,
}

impl FrameContext {
    fn url<'a>(&'a self, frame: &'a CallFrame) -> &'a str {
        if !frame.url.is_empty() {
            return &frame.url;
        }
        self.script_urls
            .get(&frame.location.script_id)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Source position of a backend frame, `None` for runtime-only code.
    pub fn source_position(
        &self,
        translator: &dyn LocationTranslator,
        frame: &CallFrame,
    ) -> Option<SourcePosition> {
        let url = self.url(frame);
        if url.is_empty() {
            return None;
        }
        translator.to_source(
            url,
            frame.location.line_number,
            frame.location.column_number.unwrap_or(0),
        )
    }

    fn script_for(&self, uri: &str) -> Option<&ScriptEntry> {
        self.scripts.iter().find(|entry| entry.script.uri == uri)
    }

    fn library_uri(&self, library_id: &str) -> Option<String> {
        self.libraries
            .iter()
            .find(|entry| entry.library.id == library_id)
            .map(|entry| entry.library.uri.clone())
    }
}

/// Translate the backend call frames of a pause, most recent first.
pub async fn capture_frames(
    client: &CdpClient,
    inspector: &Inspector<'_>,
    translator: &dyn LocationTranslator,
    context: &FrameContext,
    call_frames: &[CallFrame],
) -> ServiceResult<Vec<FrameInfo>> {
    let mut frames = Vec::with_capacity(call_frames.len());
    for (index, call_frame) in call_frames.iter().enumerate() {
        let position = context.source_position(translator, call_frame);
        let script = position
            .as_ref()
            .and_then(|pos| context.script_for(&pos.uri));

        let name = if call_frame.function_name.is_empty() {
            "<anonymous closure>".to_string()
        } else {
            call_frame.function_name.clone()
        };

        let (Some(position), Some(script)) = (position, script) else {
            frames.push(FrameInfo {
                frame: Frame {
                    index,
                    kind: FrameKind::Regular,
                    code: CodeRef {
                        id: format!("code/{index}"),
                        name,
                        kind: CodeKind::Native,
                    },
                    location: None,
                    vars: Vec::new(),
                },
                call_frame_id: call_frame.call_frame_id.clone(),
                bindings: Vec::new(),
                position: None,
                library_uri: None,
            });
            continue;
        };

        let pos = token_pos(position.line, position.column);
        let mut vars = Vec::new();
        let mut bindings: Vec<(String, CallArgument)> = Vec::new();
        for scope in &call_frame.scope_chain {
            if !scope.type_.holds_frame_variables() {
                continue;
            }
            let Some(object_id) = scope.object.object_id.as_deref() else {
                continue;
            };
            for property in client.get_properties(object_id).await?.result {
                let Some(value) = property.value else {
                    continue;
                };
                // Inner scopes shadow outer ones.
                if bindings.iter().any(|(name, _)| *name == property.name) {
                    continue;
                }
                vars.push(BoundVariable {
                    name: property.name.clone(),
                    value: inspector.instance_ref(&value),
                    declaration_token_pos: pos,
                    scope_start_token_pos: pos,
                    scope_end_token_pos: pos,
                });
                bindings.push((property.name, call_argument(&value)));
            }
        }

        frames.push(FrameInfo {
            frame: Frame {
                index,
                kind: FrameKind::Regular,
                code: CodeRef {
                    id: format!("code/{index}"),
                    name,
                    kind: CodeKind::Dart,
                },
                location: Some(SourceLocation {
                    script: script.script.clone(),
                    token_pos: pos,
                    line: Some(position.line),
                    column: Some(position.column),
                }),
                vars,
            },
            call_frame_id: call_frame.call_frame_id.clone(),
            bindings,
            library_uri: context.library_uri(&script.library_id),
            position: Some(position),
        });
    }
    Ok(frames)
}

/// Pass a backend value back to the backend as a function argument.
pub fn call_argument(remote: &RemoteObject) -> CallArgument {
    if let Some(object_id) = &remote.object_id {
        return CallArgument::object(object_id.clone());
    }
    CallArgument::value(remote.value.clone().unwrap_or(serde_json::Value::Null))
}
