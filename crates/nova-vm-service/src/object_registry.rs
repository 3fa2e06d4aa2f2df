use std::collections::{HashMap, VecDeque};

use nova_cdp::{RemoteObject, RemoteObjectType};

/// Default maximum number of backend values tracked at once.
///
/// Backend handles die with the pause or evaluation that produced them, so a
/// long session expanding large object graphs would otherwise grow without bound.
pub const DEFAULT_MAX_TRACKED: usize = 10_000;

const ID_PREFIX: &str = "objects/";

/// Frontend object id of a tracked backend value (`objects/<n>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub fn parse(id: &str) -> Option<Self> {
        let raw: u64 = id.strip_prefix(ID_PREFIX)?.parse().ok()?;
        (raw > 0).then_some(Self(raw))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{ID_PREFIX}{}", self.0)
    }
}

/// Backend identity of a value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ObjectKey {
    /// Backend `objectId`.
    Remote(String),
    /// Strings and other values without a backend handle are identified by content.
    Value(String),
}

impl ObjectKey {
    fn of(remote: &RemoteObject) -> Self {
        if let Some(object_id) = &remote.object_id {
            return ObjectKey::Remote(object_id.clone());
        }
        let content = match (&remote.value, &remote.description) {
            (Some(value), _) => value.to_string(),
            (None, Some(description)) => description.clone(),
            (None, None) => String::new(),
        };
        ObjectKey::Value(format!("{:?}:{content}", remote.type_))
    }
}

#[derive(Clone, Debug)]
struct ObjectEntry {
    key: ObjectKey,
    remote: RemoteObject,
}

/// Maps frontend object ids to backend values.
///
/// The registry is a bounded FIFO: when more than `max_tracked` values are registered the
/// oldest ones are forgotten and their ids stop resolving.
pub struct ObjectRegistry {
    next_handle: u64,
    key_to_handle: HashMap<ObjectKey, ObjectHandle>,
    handle_to_entry: HashMap<ObjectHandle, ObjectEntry>,
    max_tracked: usize,
    fifo: VecDeque<ObjectHandle>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self {
            next_handle: 1,
            key_to_handle: HashMap::new(),
            handle_to_entry: HashMap::new(),
            max_tracked: DEFAULT_MAX_TRACKED,
            fifo: VecDeque::new(),
        }
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tracked(max_tracked: usize) -> Self {
        Self {
            max_tracked: max_tracked.max(1),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.handle_to_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle_to_entry.is_empty()
    }

    /// Forget every tracked value. Handle numbers keep increasing so stale ids never alias.
    pub fn clear(&mut self) {
        self.key_to_handle.clear();
        self.handle_to_entry.clear();
        self.fifo.clear();
    }

    /// Allocate or reuse the id for `remote`. Repeated calls for the same backend identity
    /// return the same handle while it is tracked.
    pub fn track(&mut self, remote: &RemoteObject) -> ObjectHandle {
        let key = ObjectKey::of(remote);
        if let Some(handle) = self.key_to_handle.get(&key).copied() {
            if let Some(entry) = self.handle_to_entry.get_mut(&handle) {
                entry.remote = remote.clone();
            }
            return handle;
        }

        let handle = ObjectHandle(self.next_handle);
        self.next_handle = self.next_handle.saturating_add(1);
        self.key_to_handle.insert(key.clone(), handle);
        self.handle_to_entry.insert(
            handle,
            ObjectEntry {
                key,
                remote: remote.clone(),
            },
        );
        self.fifo.push_back(handle);
        self.maybe_evict();
        handle
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&RemoteObject> {
        self.handle_to_entry.get(&handle).map(|entry| &entry.remote)
    }

    /// Resolve a frontend id (`objects/<n>`).
    pub fn lookup(&self, id: &str) -> Option<&RemoteObject> {
        self.get(ObjectHandle::parse(id)?)
    }

    fn maybe_evict(&mut self) {
        while self.fifo.len() > self.max_tracked {
            let Some(handle) = self.fifo.pop_front() else {
                break;
            };
            let Some(entry) = self.handle_to_entry.remove(&handle) else {
                continue;
            };
            self.key_to_handle.remove(&entry.key);
        }
    }
}

/// Whether a value is rendered through a synthetic id instead of a registry entry.
pub fn is_primitive(remote: &RemoteObject) -> bool {
    match remote.type_ {
        RemoteObjectType::Undefined
        | RemoteObjectType::Boolean
        | RemoteObjectType::Number
        | RemoteObjectType::Bigint => true,
        RemoteObjectType::Object => remote.is_null(),
        _ => false,
    }
}
