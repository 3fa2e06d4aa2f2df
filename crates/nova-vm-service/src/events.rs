//! Frontend event streams and translation of backend console traffic.

use std::collections::{BTreeSet, HashMap};

use base64::Engine as _;
use nova_cdp::{ConsoleApiCalledEvent, RemoteObject, RemoteObjectType};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ServiceError, ServiceResult};
use crate::protocol::{Event, StreamId};

pub const DEFAULT_QUEUE_SIZE: usize = 1024;

const REGISTER_EXTENSION: &str = "dart.developer.registerExtension";
const POST_EVENT: &str = "dart.developer.postEvent";
const INSPECT: &str = "dart.developer.inspect";

/// Per-stream publish/subscribe registry.
///
/// Every subscriber gets its own bounded queue. A subscriber that falls behind loses the
/// oldest events and is told how many it skipped.
pub struct StreamRegistry {
    queue_size: usize,
    senders: Mutex<HashMap<StreamId, broadcast::Sender<Event>>>,
    listening: Mutex<BTreeSet<StreamId>>,
}

impl StreamRegistry {
    pub fn new(queue_size: usize) -> Self {
        Self {
            queue_size: queue_size.max(1),
            senders: Mutex::new(HashMap::new()),
            listening: Mutex::new(BTreeSet::new()),
        }
    }

    fn sender(&self, stream: StreamId) -> broadcast::Sender<Event> {
        self.senders
            .lock()
            .entry(stream)
            .or_insert_with(|| broadcast::channel(self.queue_size).0)
            .clone()
    }

    /// Deliver `event` to every current subscriber of `stream`.
    pub fn publish(&self, stream: StreamId, event: Event) -> usize {
        tracing::trace!(target: "nova.vm_service", stream = %stream, kind = ?event.kind, "event");
        self.sender(stream).send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, stream: StreamId) -> EventReceiver {
        EventReceiver {
            stream,
            inner: self.sender(stream).subscribe(),
        }
    }

    pub fn listen(&self, stream: StreamId) {
        self.listening.lock().insert(stream);
    }

    pub fn cancel(&self, stream: StreamId) -> ServiceResult<()> {
        if !stream.is_backed() {
            return Err(ServiceError::Unsupported(format!("streamCancel for {stream}")));
        }
        if !self.listening.lock().remove(&stream) {
            return Err(ServiceError::invalid_argument(format!(
                "stream {stream} is not subscribed"
            )));
        }
        Ok(())
    }

    pub fn is_listening(&self, stream: StreamId) -> bool {
        self.listening.lock().contains(&stream)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

/// One subscriber's view of a stream.
pub struct EventReceiver {
    stream: StreamId,
    inner: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Next event, or `None` once the service is gone. Lagging skips the oldest events.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "nova.vm_service",
                        stream = %self.stream,
                        skipped,
                        "event subscriber lagged; dropped oldest events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`EventReceiver::recv`].
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// What a backend console call means to the frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    RegisterExtension(String),
    PostEvent { kind: String, data: Value },
    Inspect(RemoteObject),
    Write { stream: StreamId, text: String },
}

pub fn translate_console(event: &ConsoleApiCalledEvent) -> ConsoleAction {
    let first = event.args.first().and_then(string_arg);
    match first.as_deref() {
        Some(REGISTER_EXTENSION) => {
            if let Some(name) = event.args.get(1).and_then(string_arg) {
                return ConsoleAction::RegisterExtension(name);
            }
        }
        Some(POST_EVENT) => {
            if let Some(kind) = event.args.get(1).and_then(string_arg) {
                let data = event
                    .args
                    .get(2)
                    .and_then(string_arg)
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or(Value::Null);
                return ConsoleAction::PostEvent { kind, data };
            }
        }
        Some(INSPECT) => {
            if let Some(value) = event.args.get(1) {
                return ConsoleAction::Inspect(value.clone());
            }
        }
        _ => {}
    }

    let stream = match event.type_.as_str() {
        "error" | "warning" | "assert" => StreamId::Stderr,
        _ => StreamId::Stdout,
    };
    let text = event
        .args
        .iter()
        .map(display_arg)
        .collect::<Vec<_>>()
        .join(" ");
    ConsoleAction::Write { stream, text }
}

fn string_arg(remote: &RemoteObject) -> Option<String> {
    if remote.type_ != RemoteObjectType::String {
        return None;
    }
    remote.value.as_ref()?.as_str().map(str::to_string)
}

fn display_arg(remote: &RemoteObject) -> String {
    if let Some(text) = string_arg(remote) {
        return text;
    }
    if remote.type_ == RemoteObjectType::Undefined {
        return "undefined".to_string();
    }
    if let Some(description) = &remote.description {
        return description.clone();
    }
    match &remote.value {
        Some(value) => value.to_string(),
        None => remote.unserializable_value.clone().unwrap_or_default(),
    }
}

/// Base64 payload of a `WriteEvent` for one line of output.
pub fn encode_output(text: &str) -> String {
    let mut line = text.to_string();
    if !line.ends_with('\n') {
        line.push('\n');
    }
    base64::engine::general_purpose::STANDARD.encode(line)
}
