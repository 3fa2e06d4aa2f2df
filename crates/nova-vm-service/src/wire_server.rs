//! JSON-RPC 2.0 frontend over `Content-Length` framed messages.

use std::collections::{BTreeMap, HashMap};

use nova_cdp::codec::{MessageReader, MessageWriter};
use nova_cdp::CdpError;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ServiceError, ServiceResult};
use crate::protocol::StreamId;
use crate::service::{ProxyService, UNSUPPORTED_METHODS};

#[derive(Debug, Error)]
pub enum WireServerError {
    #[error(transparent)]
    Codec(#[from] CdpError),
}

type Result<T> = std::result::Result<T, WireServerError>;

/// Serve the frontend protocol over stdio.
pub async fn run_stdio(service: ProxyService) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, service).await.map_err(anyhow::Error::from)
}

pub async fn run<R, W>(reader: R, writer: W, service: ProxyService) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer_task = tokio::spawn(async move {
        let mut writer = MessageWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(err) = writer.write_value(&msg).await {
                tracing::warn!(target: "nova.vm_service", error = %err, "failed to write frontend message");
                break;
            }
        }
    });

    let mut reader = MessageReader::new(reader);
    let mut forwarders: HashMap<StreamId, CancellationToken> = HashMap::new();

    while let Some(message) = reader.read_value().await? {
        let id = message.get("id").cloned();
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string)
        else {
            if let Some(id) = id {
                send_error(
                    &out_tx,
                    id,
                    &ServiceError::invalid_argument("request without method"),
                );
            }
            continue;
        };
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
        tracing::debug!(target: "nova.vm_service", %method, "frontend request");

        match method.as_str() {
            // Stream bookkeeping happens inline so forwarding starts before the reply.
            "streamListen" | "streamCancel" => {
                let reply = stream_request(&service, &method, &params, &mut forwarders, &out_tx);
                if let Some(id) = id {
                    send_reply(&out_tx, id, reply);
                }
            }
            _ => {
                let service = service.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let reply = dispatch(&service, &method, &params).await;
                    match id {
                        Some(id) => send_reply(&out_tx, id, reply),
                        None => {
                            if let Err(err) = reply {
                                tracing::debug!(target: "nova.vm_service", %method, error = %err, "notification failed");
                            }
                        }
                    }
                });
            }
        }
    }

    for token in forwarders.into_values() {
        token.cancel();
    }
    drop(out_tx);
    if let Err(err) = writer_task.await {
        tracing::warn!(target: "nova.vm_service", error = %err, "frontend writer task failed");
    }
    Ok(())
}

fn stream_request(
    service: &ProxyService,
    method: &str,
    params: &Value,
    forwarders: &mut HashMap<StreamId, CancellationToken>,
    out_tx: &mpsc::UnboundedSender<Value>,
) -> ServiceResult<Value> {
    let stream_id = str_param(params, "streamId")?;
    let stream: StreamId = stream_id.parse()?;
    if method == "streamCancel" {
        let reply = service.stream_cancel(stream_id)?;
        if let Some(token) = forwarders.remove(&stream) {
            token.cancel();
        }
        return to_json(reply);
    }

    let reply = service.stream_listen(stream_id)?;
    if !forwarders.contains_key(&stream) {
        let mut events = service.on_event(stream_id)?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancelled.cancelled() => return,
                    event = events.recv() => event,
                };
                let Some(event) = event else {
                    return;
                };
                let event = match serde_json::to_value(&event) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(target: "nova.vm_service", error = %err, "failed to encode event");
                        continue;
                    }
                };
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "streamNotify",
                    "params": { "streamId": stream.as_str(), "event": event },
                });
                if out_tx.send(notification).is_err() {
                    return;
                }
            }
        });
        forwarders.insert(stream, token);
    }
    to_json(reply)
}

/// Route one request to the service.
pub async fn dispatch(service: &ProxyService, method: &str, params: &Value) -> ServiceResult<Value> {
    match method {
        "getVersion" => to_json(service.get_version()),
        "getVM" => to_json(service.get_vm()),
        "getIsolate" => to_json(service.get_isolate(str_param(params, "isolateId")?)?),
        "getScripts" => to_json(service.get_scripts(str_param(params, "isolateId")?)?),
        "getObject" => to_json(
            service
                .get_object(
                    str_param(params, "isolateId")?,
                    str_param(params, "objectId")?,
                    usize_param(params, "offset")?,
                    usize_param(params, "count")?,
                )
                .await?,
        ),
        "getStack" => to_json(service.get_stack(str_param(params, "isolateId")?)?),
        "addBreakpoint" => to_json(
            service
                .add_breakpoint(
                    str_param(params, "isolateId")?,
                    str_param(params, "scriptId")?,
                    line_param(params)?,
                )
                .await?,
        ),
        "addBreakpointWithScriptUri" => to_json(
            service
                .add_breakpoint_with_script_uri(
                    str_param(params, "isolateId")?,
                    str_param(params, "scriptUri")?,
                    line_param(params)?,
                )
                .await?,
        ),
        "removeBreakpoint" => to_json(
            service
                .remove_breakpoint(
                    opt_str_param(params, "isolateId"),
                    opt_str_param(params, "breakpointId"),
                )
                .await?,
        ),
        "pause" => to_json(service.pause(str_param(params, "isolateId")?).await?),
        "resume" => to_json(
            service
                .resume(str_param(params, "isolateId")?, opt_str_param(params, "step"))
                .await?,
        ),
        "evaluate" => {
            let scope = match params.get("scope") {
                None | Some(Value::Null) => None,
                Some(scope) => Some(
                    serde_json::from_value::<BTreeMap<String, String>>(scope.clone()).map_err(
                        |err| ServiceError::invalid_argument(format!("invalid scope: {err}")),
                    )?,
                ),
            };
            to_json(
                service
                    .evaluate(
                        str_param(params, "isolateId")?,
                        str_param(params, "targetId")?,
                        str_param(params, "expression")?,
                        scope,
                    )
                    .await?,
            )
        }
        "evaluateInFrame" => to_json(
            service
                .evaluate_in_frame(
                    str_param(params, "isolateId")?,
                    usize_param(params, "frameIndex")?
                        .ok_or_else(|| missing("frameIndex"))?,
                    str_param(params, "expression")?,
                )
                .await?,
        ),
        "getSourceReport" => {
            let reports: Vec<String> = match params.get("reports") {
                Some(reports) => serde_json::from_value(reports.clone()).map_err(|err| {
                    ServiceError::invalid_argument(format!("invalid reports: {err}"))
                })?,
                None => return Err(missing("reports")),
            };
            to_json(service.get_source_report(
                opt_str_param(params, "isolateId"),
                &reports,
                opt_str_param(params, "scriptId"),
            )?)
        }
        "setExceptionPauseMode" => to_json(
            service
                .set_exception_pause_mode(
                    str_param(params, "isolateId")?,
                    str_param(params, "mode")?,
                )
                .await?,
        ),
        "setName" => to_json(service.set_name(
            str_param(params, "isolateId")?,
            str_param(params, "name")?,
        )?),
        "setVMName" => to_json(service.set_vm_name(str_param(params, "name")?)?),
        method if UNSUPPORTED_METHODS.contains(&method) => Err(service.unsupported(method)),
        method if method.starts_with("ext.") => {
            let args = match params {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            service
                .call_service_extension(method, opt_str_param(params, "isolateId"), args)
                .await
        }
        method => Err(ServiceError::MethodNotFound(method.to_string())),
    }
}

fn to_json<T: Serialize>(value: T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|err| ServiceError::Backend(CdpError::from(err)))
}

fn missing(name: &str) -> ServiceError {
    ServiceError::invalid_argument(format!("missing required parameter {name}"))
}

fn str_param<'a>(params: &'a Value, name: &str) -> ServiceResult<&'a str> {
    opt_str_param(params, name).ok_or_else(|| missing(name))
}

fn opt_str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

fn usize_param(params: &Value, name: &str) -> ServiceResult<Option<usize>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                ServiceError::invalid_argument(format!("{name} must be a non-negative integer"))
            }),
    }
}

fn line_param(params: &Value) -> ServiceResult<u32> {
    params
        .get("line")
        .and_then(Value::as_u64)
        .and_then(|line| u32::try_from(line).ok())
        .filter(|line| *line > 0)
        .ok_or_else(|| ServiceError::invalid_argument("line must be a positive integer"))
}

fn send_reply(tx: &mpsc::UnboundedSender<Value>, id: Value, reply: ServiceResult<Value>) {
    match reply {
        Ok(result) => {
            let _ = tx.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }));
        }
        Err(err) => send_error(tx, id, &err),
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Value>, id: Value, err: &ServiceError) {
    let mut error = json!({ "code": err.code(), "message": err.to_string() });
    if let Some(data) = err.data() {
        error["data"] = data;
    }
    let _ = tx.send(json!({ "jsonrpc": "2.0", "id": id, "error": error }));
}
