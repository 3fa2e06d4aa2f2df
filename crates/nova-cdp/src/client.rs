use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{MessageReader, MessageWriter},
    types::{
        CallArgument, CdpError, CdpEvent, EvaluateResult, GetPropertiesResult, Result,
        SetBreakpointResult,
    },
};

#[derive(Debug, Clone)]
pub struct CdpClientConfig {
    pub reply_timeout: Duration,
    pub event_channel_size: usize,
}

impl Default for CdpClientConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(10),
            event_channel_size: 1024,
        }
    }
}

type PendingReply = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct Inner {
    outgoing: mpsc::UnboundedSender<Value>,
    pending: Mutex<HashMap<u64, (String, PendingReply)>>,
    next_id: AtomicU64,
    events: broadcast::Sender<CdpEvent>,
    /// Lossless feeds, see [`CdpClient::event_stream`].
    streams: Mutex<Vec<mpsc::UnboundedSender<CdpEvent>>>,
    shutdown: CancellationToken,
    config: CdpClientConfig,
}

/// Async CDP client.
///
/// Commands are correlated with replies by id; notifications are decoded into
/// [`CdpEvent`]s and fanned out on a broadcast channel in the order the target sent them.
#[derive(Clone, Debug)]
pub struct CdpClient {
    inner: Arc<Inner>,
}

impl CdpClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, CdpClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: CdpClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Ok(Self::from_stream(stream, config))
    }

    /// Drive the protocol over an already established byte stream.
    ///
    /// Must be called from within a tokio runtime: the reader and writer tasks are spawned
    /// immediately.
    pub fn from_stream<S>(stream: S, config: CdpClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));

        let inner = Arc::new(Inner {
            outgoing,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            streams: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(write_loop(writer, outgoing_rx, inner.shutdown.clone()));
        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// A token that is cancelled when the client shuts down, either explicitly via
    /// [`CdpClient::shutdown`] or because the underlying connection closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Bounded feed of notifications. A slow receiver skips the oldest ones.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CdpEvent> {
        self.inner.events.subscribe()
    }

    /// Unbounded feed of notifications that never skips, for consumers whose state must
    /// track every pause and resume of the target.
    pub async fn event_stream(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.streams.lock().await.push(tx);
        rx
    }

    /// Send a raw command and wait for its `result`.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CdpError::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, (method.to_string(), tx));
        }

        tracing::trace!(target: "nova.cdp", id, method, "sending command");
        let message = json!({ "id": id, "method": method, "params": params });
        if self.inner.outgoing.send(message).is_err() {
            self.remove_pending(id).await;
            return Err(CdpError::ConnectionClosed);
        }

        tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(id).await;
                Err(CdpError::Cancelled)
            }
            res = tokio::time::timeout(self.inner.config.reply_timeout, rx) => {
                match res {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(_closed)) => Err(CdpError::ConnectionClosed),
                    Err(_elapsed) => {
                        self.remove_pending(id).await;
                        Err(CdpError::Timeout)
                    }
                }
            }
        }
    }

    async fn send_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let result = self.send_command(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn remove_pending(&self, id: u64) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&id);
    }

    pub async fn debugger_enable(&self) -> Result<()> {
        self.send_command("Debugger.enable", json!({})).await?;
        Ok(())
    }

    pub async fn runtime_enable(&self) -> Result<()> {
        self.send_command("Runtime.enable", json!({})).await?;
        Ok(())
    }

    pub async fn run_if_waiting_for_debugger(&self) -> Result<()> {
        self.send_command("Runtime.runIfWaitingForDebugger", json!({}))
            .await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.send_command("Debugger.pause", json!({})).await?;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.send_command("Debugger.resume", json!({})).await?;
        Ok(())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.send_command("Debugger.stepInto", json!({})).await?;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.send_command("Debugger.stepOver", json!({})).await?;
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.send_command("Debugger.stepOut", json!({})).await?;
        Ok(())
    }

    pub async fn set_breakpoint_by_url(
        &self,
        url: &str,
        line_number: u32,
        column_number: Option<u32>,
    ) -> Result<SetBreakpointResult> {
        let mut params = json!({ "url": url, "lineNumber": line_number });
        if let Some(column) = column_number {
            params["columnNumber"] = json!(column);
        }
        self.send_typed("Debugger.setBreakpointByUrl", params).await
    }

    pub async fn remove_breakpoint(&self, breakpoint_id: &str) -> Result<()> {
        self.send_command(
            "Debugger.removeBreakpoint",
            json!({ "breakpointId": breakpoint_id }),
        )
        .await?;
        Ok(())
    }

    /// `state` is one of `none`, `uncaught`, `all`.
    pub async fn set_pause_on_exceptions(&self, state: &str) -> Result<()> {
        self.send_command("Debugger.setPauseOnExceptions", json!({ "state": state }))
            .await?;
        Ok(())
    }

    pub async fn get_script_source(&self, script_id: &str) -> Result<String> {
        let result = self
            .send_command("Debugger.getScriptSource", json!({ "scriptId": script_id }))
            .await?;
        result
            .get("scriptSource")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CdpError::Protocol("getScriptSource reply without scriptSource".into()))
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        context_id: Option<i64>,
        return_by_value: bool,
    ) -> Result<EvaluateResult> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": return_by_value,
            "awaitPromise": true,
        });
        if let Some(context_id) = context_id {
            params["contextId"] = json!(context_id);
        }
        self.send_typed("Runtime.evaluate", params).await
    }

    pub async fn evaluate_on_call_frame(
        &self,
        call_frame_id: &str,
        expression: &str,
    ) -> Result<EvaluateResult> {
        self.send_typed(
            "Debugger.evaluateOnCallFrame",
            json!({ "callFrameId": call_frame_id, "expression": expression }),
        )
        .await
    }

    /// `Runtime.callFunctionOn`: either `object_id` (binds `this`) or `context_id` must be set.
    pub async fn call_function_on(
        &self,
        object_id: Option<&str>,
        context_id: Option<i64>,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<EvaluateResult> {
        let mut params = json!({
            "functionDeclaration": function_declaration,
            "arguments": arguments,
            "awaitPromise": true,
        });
        if let Some(object_id) = object_id {
            params["objectId"] = json!(object_id);
        }
        if let Some(context_id) = context_id {
            params["executionContextId"] = json!(context_id);
        }
        self.send_typed("Runtime.callFunctionOn", params).await
    }

    pub async fn get_properties(&self, object_id: &str) -> Result<GetPropertiesResult> {
        self.send_typed(
            "Runtime.getProperties",
            json!({ "objectId": object_id, "ownProperties": true }),
        )
        .await
    }
}

async fn write_loop<W>(
    writer: W,
    mut outgoing: mpsc::UnboundedReceiver<Value>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = MessageWriter::new(writer);
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = outgoing.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        if let Err(err) = writer.write_value(&message).await {
            tracing::warn!(target: "nova.cdp", error = %err, "failed to write CDP command");
            shutdown.cancel();
            break;
        }
    }
}

async fn read_loop<R>(reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = MessageReader::new(reader);

    loop {
        let message = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read_value() => res,
        };

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(target: "nova.cdp", error = %err, "CDP connection failed");
                break;
            }
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            let entry = {
                let mut pending = inner.pending.lock().await;
                pending.remove(&id)
            };
            let Some((method, tx)) = entry else {
                tracing::debug!(target: "nova.cdp", id, "reply for unknown request");
                continue;
            };
            let reply = match message.get("error") {
                Some(error) => Err(CdpError::CommandFailed {
                    method,
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }),
                None => Ok(message.get("result").cloned().unwrap_or_else(|| json!({}))),
            };
            let _ = tx.send(reply);
        } else if let Some(method) = message.get("method").and_then(Value::as_str) {
            let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
            match CdpEvent::from_notification(method, params) {
                Ok(Some(event)) => {
                    inner
                        .streams
                        .lock()
                        .await
                        .retain(|tx| tx.send(event.clone()).is_ok());
                    // No receivers is fine: nobody is attached yet.
                    let _ = inner.events.send(event);
                }
                Ok(None) => {
                    tracing::trace!(target: "nova.cdp", method, "ignoring notification");
                }
                Err(err) => {
                    tracing::warn!(
                        target: "nova.cdp",
                        method,
                        error = %err,
                        "dropping malformed notification"
                    );
                }
            }
        }
    }

    inner.shutdown.cancel();
    inner.streams.lock().await.clear();

    let pending = {
        let mut pending = inner.pending.lock().await;
        std::mem::take(&mut *pending)
    };
    for (_id, (_method, tx)) in pending {
        let _ = tx.send(Err(CdpError::ConnectionClosed));
    }
}
