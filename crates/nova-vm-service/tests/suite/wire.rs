use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use nova_cdp::codec::{MessageReader, MessageWriter};
use nova_vm_service::wire_server;
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

use crate::harness::{Harness, MAIN_DART};

struct Client {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: MessageWriter<WriteHalf<DuplexStream>>,
    next_id: i64,
}

impl Client {
    fn connect(harness: &Harness) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let service = harness.service.clone();
        let task = tokio::spawn(async move {
            wire_server::run(server_read, server_write, service)
                .await
                .unwrap();
        });
        let (client_read, client_write) = tokio::io::split(client);
        (
            Self {
                reader: MessageReader::new(client_read),
                writer: MessageWriter::new(client_write),
                next_id: 1,
            },
            task,
        )
    }

    async fn send(&mut self, method: &str, params: Value) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.writer
            .write_value(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await
            .unwrap();
        id
    }

    async fn read(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.reader.read_value())
            .await
            .expect("timed out waiting for a message")
            .unwrap()
            .expect("server closed the stream")
    }

    /// Read until the reply to `id`, keeping notifications seen on the way.
    async fn reply(&mut self, id: i64, notifications: &mut Vec<Value>) -> Value {
        loop {
            let message = self.read().await;
            if message.get("id") == Some(&json!(id)) {
                return message;
            }
            notifications.push(message);
        }
    }

    async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.send(method, params).await;
        self.reply(id, &mut Vec::new()).await
    }
}

#[tokio::test]
async fn requests_get_json_rpc_replies() {
    let harness = Harness::start().await;
    let (mut client, _server) = Client::connect(&harness);

    let version = client.call("getVersion", json!({})).await;
    assert_eq!(version["jsonrpc"], "2.0");
    assert_eq!(version["result"]["type"], "Version");
    assert_eq!(version["result"]["major"], 3);

    let vm = client.call("getVM", json!({})).await;
    assert_eq!(vm["result"]["type"], "VM");
    assert_eq!(vm["result"]["isolates"][0]["id"], harness.isolate_id());

    let isolate = client
        .call("getIsolate", json!({ "isolateId": harness.isolate_id() }))
        .await;
    assert_eq!(isolate["result"]["type"], "Isolate");
    assert_eq!(isolate["result"]["pauseEvent"]["kind"], "PauseStart");
}

#[tokio::test]
async fn failures_carry_codes() {
    let harness = Harness::start().await;
    let (mut client, _server) = Client::connect(&harness);

    let unknown = client.call("getFlux", json!({})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let unsupported = client.call("getClassList", json!({})).await;
    assert_eq!(unsupported["error"]["code"], -32601);

    let missing = client.call("getIsolate", json!({})).await;
    assert_eq!(missing["error"]["code"], -32602);

    let script = harness.script_id(MAIN_DART);
    let bad_line = client
        .call(
            "addBreakpoint",
            json!({ "isolateId": harness.isolate_id(), "scriptId": script, "line": 1 }),
        )
        .await;
    assert_eq!(bad_line["error"]["code"], 102);

    let compile = client
        .call(
            "evaluate",
            json!({
                "isolateId": harness.isolate_id(),
                "targetId": harness.root_library_id(),
                "expression": " ",
            }),
        )
        .await;
    assert_eq!(compile["error"]["code"], 113);
    assert!(compile["error"]["data"]["details"].is_string());
}

#[tokio::test]
async fn listened_streams_are_forwarded_as_notifications() {
    let harness = Harness::start().await;
    let (mut client, _server) = Client::connect(&harness);

    let listen = client.call("streamListen", json!({ "streamId": "Isolate" })).await;
    assert_eq!(listen["result"]["type"], "Success");

    let id = client
        .send(
            "setName",
            json!({ "isolateId": harness.isolate_id(), "name": "renamed" }),
        )
        .await;
    let mut notifications = Vec::new();
    let reply = client.reply(id, &mut notifications).await;
    assert_eq!(reply["result"]["type"], "Success");
    while notifications.is_empty() {
        notifications.push(client.read().await);
    }

    let notification = &notifications[0];
    assert_eq!(notification["method"], "streamNotify");
    assert_eq!(notification["params"]["streamId"], "Isolate");
    assert_eq!(notification["params"]["event"]["kind"], "IsolateUpdate");
    assert_eq!(notification["params"]["event"]["isolate"]["name"], "renamed");

    let cancel = client.call("streamCancel", json!({ "streamId": "Isolate" })).await;
    assert_eq!(cancel["result"]["type"], "Success");
    let again = client.call("streamCancel", json!({ "streamId": "Isolate" })).await;
    assert_eq!(again["error"]["code"], -32602);
}

#[tokio::test]
async fn breakpoints_and_pauses_round_trip() {
    let harness = Harness::start().await;
    let (mut client, _server) = Client::connect(&harness);
    let isolate = harness.isolate_id();

    client.call("streamListen", json!({ "streamId": "Debug" })).await;
    let added = client
        .call(
            "addBreakpointWithScriptUri",
            json!({ "isolateId": isolate, "scriptUri": MAIN_DART, "line": 3 }),
        )
        .await;
    assert_eq!(added["result"]["type"], "Breakpoint");
    let breakpoint_id = added["result"]["id"].clone();

    let id = client.send("resume", json!({ "isolateId": isolate })).await;
    let mut notifications = Vec::new();
    let resumed = client.reply(id, &mut notifications).await;
    assert_eq!(resumed["result"]["type"], "Success");

    while !notifications
        .iter()
        .any(|n| n["params"]["event"]["kind"] == "PauseBreakpoint")
    {
        notifications.push(client.read().await);
    }
    let pause = notifications
        .iter()
        .find(|n| n["params"]["event"]["kind"] == "PauseBreakpoint")
        .expect("pause notification");
    assert_eq!(pause["params"]["event"]["breakpoint"]["id"], breakpoint_id);
    assert_eq!(pause["params"]["event"]["topFrame"]["location"]["line"], 3);

    let stack = client.call("getStack", json!({ "isolateId": isolate })).await;
    assert_eq!(stack["result"]["type"], "Stack");
    assert_eq!(stack["result"]["frames"][0]["vars"][0]["name"], "total");

    let frame = client
        .call(
            "evaluateInFrame",
            json!({ "isolateId": isolate, "frameIndex": 0, "expression": "total + 1" }),
        )
        .await;
    assert_eq!(frame["result"]["valueAsString"], "1");

    let removed = client
        .call(
            "removeBreakpoint",
            json!({ "isolateId": isolate, "breakpointId": breakpoint_id }),
        )
        .await;
    assert_eq!(removed["result"]["type"], "Success");
}

#[tokio::test]
async fn the_server_stops_when_the_client_hangs_up() {
    let harness = Harness::start().await;
    let (client, server) = Client::connect(&harness);
    drop(client);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
}

/// Writer that panics on first use.
struct ExplodingWriter;

impl AsyncWrite for ExplodingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        panic!("frontend writer exploded");
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn a_failed_writer_does_not_take_the_server_down() {
    let harness = Harness::start().await;
    let (client, server) = tokio::io::duplex(64 * 1024);
    let service = harness.service.clone();
    let task = tokio::spawn(wire_server::run(server, ExplodingWriter, service));

    let mut writer = MessageWriter::new(client);
    writer
        .write_value(&json!({ "jsonrpc": "2.0", "id": 1, "method": "getVersion", "params": {} }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(writer);

    let served = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("server did not stop")
        .expect("server task panicked");
    assert!(served.is_ok());
}
