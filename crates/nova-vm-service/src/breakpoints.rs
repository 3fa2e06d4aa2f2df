use std::collections::BTreeMap;

use crate::locations::{token_pos, JsLocation};
use crate::protocol::{Breakpoint, ScriptRef, SourceLocation};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedBreakpoint {
    breakpoint: Breakpoint,
    backend_id: String,
    location: JsLocation,
}

/// Frontend breakpoints of one isolate.
///
/// Breakpoints are keyed by their resolved compiled location, so at most one exists per
/// executable position. Ids are `breakpoints/<n>` and are never reused within the isolate.
#[derive(Debug)]
pub struct BreakpointManager {
    next_number: u32,
    by_number: BTreeMap<u32, TrackedBreakpoint>,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self {
            next_number: 1,
            by_number: BTreeMap::new(),
        }
    }
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The breakpoint already covering `location`, if any.
    pub fn find_at(&self, location: &JsLocation) -> Option<Breakpoint> {
        self.by_number
            .values()
            .find(|tracked| &tracked.location == location)
            .map(|tracked| tracked.breakpoint.clone())
    }

    /// Record a breakpoint the backend has accepted.
    pub fn insert(
        &mut self,
        script: ScriptRef,
        line: u32,
        column: u32,
        location: JsLocation,
        backend_id: String,
        resolved: bool,
    ) -> Breakpoint {
        let number = self.next_number;
        self.next_number += 1;
        let breakpoint = Breakpoint {
            id: format!("breakpoints/{number}"),
            breakpoint_number: number,
            enabled: true,
            resolved,
            location: SourceLocation {
                script,
                token_pos: token_pos(line, column),
                line: Some(line),
                column: Some(column),
            },
        };
        self.by_number.insert(
            number,
            TrackedBreakpoint {
                breakpoint: breakpoint.clone(),
                backend_id,
                location,
            },
        );
        breakpoint
    }

    pub fn get(&self, id: &str) -> Option<&Breakpoint> {
        let number = parse_id(id)?;
        self.by_number.get(&number).map(|tracked| &tracked.breakpoint)
    }

    /// Backend id of a tracked breakpoint.
    pub fn backend_id(&self, id: &str) -> Option<&str> {
        let number = parse_id(id)?;
        self.by_number
            .get(&number)
            .map(|tracked| tracked.backend_id.as_str())
    }

    /// Forget a breakpoint, returning it and its backend id.
    pub fn remove(&mut self, id: &str) -> Option<(Breakpoint, String)> {
        let number = parse_id(id)?;
        self.by_number
            .remove(&number)
            .map(|tracked| (tracked.breakpoint, tracked.backend_id))
    }

    /// Frontend breakpoints matching the backend ids reported by a pause.
    pub fn hits(&self, backend_ids: &[String]) -> Vec<Breakpoint> {
        self.by_number
            .values()
            .filter(|tracked| backend_ids.contains(&tracked.backend_id))
            .map(|tracked| tracked.breakpoint.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Breakpoint> {
        self.by_number
            .values()
            .map(|tracked| tracked.breakpoint.clone())
            .collect()
    }

    /// Drop every breakpoint and return the backend ids that must be removed.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.by_number)
            .into_values()
            .map(|tracked| tracked.backend_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

fn parse_id(id: &str) -> Option<u32> {
    id.strip_prefix("breakpoints/")?.parse().ok()
}
