//! The tracked isolate and its static tables.

use crate::breakpoints::BreakpointManager;
use crate::execution::ExecutionState;
use crate::locations::LocationTranslator;
use crate::protocol::{
    now_millis, Event, EventKind, ExceptionPauseMode, Isolate, IsolateRef, LibraryRef, ScriptRef,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub library: LibraryRef,
    /// Compiled script holding the library.
    pub module_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptEntry {
    pub script: ScriptRef,
    /// Id of the owning library.
    pub library_id: String,
}

/// One execution target as seen by the frontend.
#[derive(Debug)]
pub struct IsolateState {
    pub id: String,
    pub number: u64,
    pub name: String,
    pub start_time: i64,
    pub libraries: Vec<LibraryEntry>,
    pub scripts: Vec<ScriptEntry>,
    pub breakpoints: BreakpointManager,
    pub exception_pause_mode: ExceptionPauseMode,
    pub extension_rpcs: Vec<String>,
    pub execution: ExecutionState,
    /// Backend execution context the isolate runs in, once known.
    pub context_id: Option<i64>,
}

impl IsolateState {
    pub fn new(number: u64, translator: &dyn LocationTranslator) -> Self {
        let libraries: Vec<LibraryEntry> = translator
            .libraries()
            .into_iter()
            .enumerate()
            .map(|(i, info)| LibraryEntry {
                library: LibraryRef {
                    id: format!("libraries/{}", i + 1),
                    name: info.name,
                    uri: info.uri,
                },
                module_url: info.module_url,
            })
            .collect();

        let scripts = translator
            .sources()
            .into_iter()
            .filter_map(|source| {
                let owner = libraries.iter().find(|l| l.library.uri == source.library)?;
                Some((source, owner.library.id.clone()))
            })
            .enumerate()
            .map(|(i, (source, library_id))| ScriptEntry {
                script: ScriptRef {
                    id: format!("scripts/{}", i + 1),
                    uri: source.uri,
                },
                library_id,
            })
            .collect();

        Self {
            id: format!("isolates/{number}"),
            number,
            name: "main".to_string(),
            start_time: now_millis(),
            libraries,
            scripts,
            breakpoints: BreakpointManager::new(),
            exception_pause_mode: ExceptionPauseMode::None,
            extension_rpcs: Vec::new(),
            execution: ExecutionState::default(),
            context_id: None,
        }
    }

    pub fn isolate_ref(&self) -> IsolateRef {
        IsolateRef {
            id: self.id.clone(),
            name: self.name.clone(),
            number: self.number.to_string(),
            is_system_isolate: false,
        }
    }

    pub fn event(&self, kind: EventKind) -> Event {
        Event::new(kind, Some(self.isolate_ref()))
    }

    pub fn root_library(&self) -> Option<&LibraryRef> {
        self.libraries.first().map(|entry| &entry.library)
    }

    pub fn library(&self, id: &str) -> Option<&LibraryEntry> {
        self.libraries.iter().find(|entry| entry.library.id == id)
    }

    pub fn script(&self, id: &str) -> Option<&ScriptEntry> {
        self.scripts.iter().find(|entry| entry.script.id == id)
    }

    pub fn script_by_uri(&self, uri: &str) -> Option<&ScriptEntry> {
        self.scripts.iter().find(|entry| entry.script.uri == uri)
    }

    pub fn to_isolate(&self) -> Isolate {
        Isolate {
            id: self.id.clone(),
            name: self.name.clone(),
            number: self.number.to_string(),
            is_system_isolate: false,
            start_time: self.start_time,
            runnable: true,
            live_ports: 0,
            pause_on_exit: false,
            pause_event: self.execution.pause_event(self.isolate_ref()),
            root_lib: self.root_library().cloned(),
            libraries: self.libraries.iter().map(|e| e.library.clone()).collect(),
            breakpoints: self.breakpoints.all(),
            exception_pause_mode: self.exception_pause_mode,
            extension_rpcs: self.extension_rpcs.clone(),
        }
    }
}
